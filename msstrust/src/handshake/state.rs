// Handshake stages and per-call status.

use bytes::Bytes;

/// Where an engine is in its lifecycle.
///
/// Client: `Initial -> ServerHello -> [FinishWait] -> Done`, with one permitted
/// `ServerHello -> Initial` loop on a hello-retry.
/// Server: `ClientHello -> [RetryKeyExchange] -> [PreflightWait -> FinishWait] -> Done`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Client: about to write a client hello.
    Initial,
    /// Client: client hello sent, waiting for the server hello.
    ServerHello,
    /// Server: waiting for the client hello.
    ClientHello,
    /// Server: hello-retry sent, waiting for a second client hello.
    RetryKeyExchange,
    /// Server: hello sent with a certificate request; early data may arrive.
    PreflightWait,
    /// Client: finishing extensions are being flushed.
    /// Server: processing the client's finishing extensions.
    FinishWait,
    Done,
    /// Terminal after a fatal error.
    Fail,
    /// Terminal after `close()`.
    Closed,
}

impl Stage {
    /// Human-readable label for the current stage (used in logs and errors).
    pub fn label(self) -> &'static str {
        match self {
            Stage::Initial => "Initial",
            Stage::ServerHello => "ServerHello",
            Stage::ClientHello => "ClientHello",
            Stage::RetryKeyExchange => "RetryKeyExchange",
            Stage::PreflightWait => "PreflightWait",
            Stage::FinishWait => "FinishWait",
            Stage::Done => "Done",
            Stage::Fail => "Fail",
            Stage::Closed => "Closed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Fail | Stage::Closed)
    }
}

/// Outcome of one `Engine::handshake` call. Fatal failures are `Err` instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeStatus {
    /// Progress was made; flush any output and call again.
    Ok,
    /// The handshake is complete. Output may still need flushing.
    Done,
    /// The output buffer needs this many more bytes of spare capacity.
    NeedOutput(usize),
    /// This many more input bytes are needed.
    NeedInput(usize),
    /// Early application data decrypted while waiting for the client to finish.
    EarlyData(Bytes),
}
