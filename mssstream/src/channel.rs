//! Secure channel over any `AsyncRead + AsyncWrite` transport.
//!
//! [`SecureChannel`] drives an [`Engine`] through its handshake, shuttling
//! packets between the engine and the transport, then carries application
//! data as sealed records. When the engine fails with an error the peer must
//! hear about, the channel makes one best-effort attempt to send the engine's
//! alert before returning the error.

use std::collections::VecDeque;
use std::sync::Arc;

use bytes::BytesMut;
use msstrust::{Alert, ClientConfig, Engine, HandshakeStatus, MssError, ServerConfig, Stage};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Result, StreamError};
use crate::record::{Incoming, RecordLayer};

/// Initial output buffer offered to the engine on each handshake step.
const HANDSHAKE_BUFFER: usize = 4096;

/// Bytes reserved for each transport read.
const READ_CHUNK: usize = 16 * 1024;

pub struct SecureChannel<S> {
    stream: S,
    engine: Engine,
    records: RecordLayer,
    /// Early data recovered while the handshake was still running.
    early: VecDeque<Vec<u8>>,
    out_capacity: usize,
}

impl<S: AsyncRead + AsyncWrite + Unpin> SecureChannel<S> {
    /// Run the client handshake over `stream`.
    pub async fn connect(stream: S, config: Arc<ClientConfig>) -> Result<Self> {
        Self::establish(stream, Engine::client(config)?, &[]).await
    }

    /// Run the client handshake, sending `early_data` as 0-RTT data when a
    /// cached session allows it. Otherwise, or when the server did not accept
    /// it, the data is sent as ordinary records once the handshake is done.
    pub async fn connect_with_early_data(
        stream: S,
        config: Arc<ClientConfig>,
        early_data: &[u8],
    ) -> Result<Self> {
        Self::establish(stream, Engine::client(config)?, early_data).await
    }

    /// Run the server handshake over `stream`.
    pub async fn accept(stream: S, config: Arc<ServerConfig>) -> Result<Self> {
        Self::establish(stream, Engine::server(config)?, &[]).await
    }

    /// Drive an already-built engine (e.g. one with a custom random source).
    pub async fn establish(stream: S, engine: Engine, early_data: &[u8]) -> Result<Self> {
        let mut channel = Self {
            stream,
            engine,
            records: RecordLayer::new(),
            early: VecDeque::new(),
            out_capacity: HANDSHAKE_BUFFER,
        };
        channel.run_handshake(early_data).await?;
        Ok(channel)
    }

    async fn run_handshake(&mut self, early_data: &[u8]) -> Result<()> {
        let mut early_sent = false;
        loop {
            let mut out = BytesMut::with_capacity(self.out_capacity);
            let status = match self.engine.handshake(&mut out, self.records.input_mut()) {
                Ok(status) => status,
                Err(err) => return Err(self.fail(err).await),
            };
            if !out.is_empty() {
                self.stream.write_all(&out).await?;
            }
            if !early_sent && !early_data.is_empty() && self.engine.sends_early_data() {
                let mut sealed = BytesMut::new();
                if let Err(err) = RecordLayer::seal_early(&mut self.engine, early_data, &mut sealed) {
                    return Err(self.fail(err).await);
                }
                self.stream.write_all(&sealed).await?;
                early_sent = true;
                tracing::debug!(len = early_data.len(), "early data sent");
            }
            match status {
                HandshakeStatus::Done => break,
                HandshakeStatus::Ok => {}
                HandshakeStatus::NeedOutput(need) => {
                    tracing::trace!(need, "growing handshake output buffer");
                    self.out_capacity += need;
                }
                HandshakeStatus::NeedInput(_) => {
                    self.stream.flush().await?;
                    self.fill().await?;
                }
                HandshakeStatus::EarlyData(data) => self.early.push_back(data.to_vec()),
            }
        }
        self.stream.flush().await?;

        if !early_data.is_empty() && !(early_sent && self.engine.early_data_accepted()) {
            tracing::debug!(len = early_data.len(), "early data not accepted, resending");
            self.send(early_data).await?;
        }
        tracing::debug!(
            client = self.engine.is_client_mode(),
            suite = ?self.engine.cipher_suite(),
            alpn = ?self.engine.alpn(),
            "secure channel established"
        );
        Ok(())
    }

    /// Read more transport bytes into the record buffer.
    async fn fill(&mut self) -> Result<usize> {
        let input = self.records.input_mut();
        input.reserve(READ_CHUNK);
        let n = self.stream.read_buf(input).await?;
        if n == 0 {
            return Err(StreamError::UnexpectedEof);
        }
        Ok(n)
    }

    /// Report a fatal engine error to the peer, best effort, and hand it back.
    async fn fail(&mut self, err: MssError) -> StreamError {
        if err.should_notify() {
            if let Some(alert) = self.engine.take_alert() {
                if let Err(e) = self.write_alert(&alert).await {
                    tracing::warn!(error = %e, code = alert.code, "failed to send alert");
                }
            }
        }
        StreamError::Engine(err)
    }

    async fn write_alert(&mut self, alert: &Alert) -> Result<()> {
        let mut wire = BytesMut::with_capacity(alert.encoded_len());
        alert.encode(&mut wire)?;
        self.stream.write_all(&wire).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Send `data` as one or more sealed records.
    pub async fn send(&mut self, data: &[u8]) -> Result<()> {
        let mut wire = BytesMut::new();
        if let Err(err) = RecordLayer::seal(&mut self.engine, data, &mut wire) {
            return Err(self.fail(err).await);
        }
        self.stream.write_all(&wire).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Receive the next record's plaintext. `Ok(None)` on a clean end of
    /// stream; early data from a resuming client comes first.
    pub async fn recv(&mut self) -> Result<Option<Vec<u8>>> {
        if let Some(data) = self.early.pop_front() {
            return Ok(Some(data));
        }
        loop {
            match self.records.open(&mut self.engine) {
                Ok(Some(Incoming::Data(data) | Incoming::EarlyData(data))) => return Ok(Some(data)),
                Ok(None) => {}
                Err(err) => return Err(self.fail(err).await),
            }
            match self.fill().await {
                Ok(_) => {}
                Err(StreamError::UnexpectedEof) if self.records.buffered() == 0 => return Ok(None),
                Err(err) => return Err(err),
            }
        }
    }

    /// Destroy the engine's keys and shut the transport down for writing.
    pub async fn close(&mut self) -> Result<()> {
        if self.engine.stage() == Stage::Closed {
            return Err(StreamError::Closed);
        }
        self.engine.close();
        self.stream.shutdown().await?;
        Ok(())
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Give back the transport. Buffered input is dropped.
    pub fn into_inner(self) -> S {
        self.stream
    }
}

impl<S> std::fmt::Debug for SecureChannel<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureChannel")
            .field("engine", &self.engine)
            .field("buffered", &self.records.buffered())
            .field("early", &self.early.len())
            .finish_non_exhaustive()
    }
}
