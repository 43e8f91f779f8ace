// MSS engine error types

use thiserror::Error;

use crate::alert::ErrorCode;

/// Top-level error type for the MSS engine.
#[derive(Debug, Error)]
pub enum MssError {
    // ── Protocol errors (fatal, reported to the peer) ───────────────────
    #[error("{code}: {reason}")]
    Protocol { code: ErrorCode, reason: String },

    #[error("peer sent alert {code}: {reason}")]
    PeerAlert {
        code: u8,
        reason: String,
        /// Whether the alert carried a tag that verified under our key schedule.
        authenticated: bool,
    },

    // ── Lifecycle errors ────────────────────────────────────────────────
    #[error("engine has failed and can no longer be used")]
    Failed,

    #[error("engine is closed")]
    Closed,

    #[error("invalid engine state: {0}")]
    InvalidState(&'static str),

    // ── Local crypto / setup errors ─────────────────────────────────────
    #[error("invalid key material: {0}")]
    InvalidKey(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("buffer too small: need {need}, have {have}")]
    BufferTooSmall { need: usize, have: usize },
}

impl MssError {
    /// Shorthand for a fatal protocol error.
    pub fn protocol(code: ErrorCode, reason: impl Into<String>) -> Self {
        MssError::Protocol {
            code,
            reason: reason.into(),
        }
    }

    pub fn illegal_packet(reason: impl Into<String>) -> Self {
        Self::protocol(ErrorCode::IllegalPacket, reason)
    }

    pub fn illegal_param(reason: impl Into<String>) -> Self {
        Self::protocol(ErrorCode::IllegalParam, reason)
    }

    pub fn negotiation_failed(reason: impl Into<String>) -> Self {
        Self::protocol(ErrorCode::NegotiationFailed, reason)
    }

    pub fn cipher_fault(reason: impl Into<String>) -> Self {
        Self::protocol(ErrorCode::CipherFault, reason)
    }

    /// Whether the channel adapter must try to send an alert for this error.
    pub fn should_notify(&self) -> bool {
        matches!(self, MssError::Protocol { .. })
    }

    /// The wire error code carried by this error, if any.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            MssError::Protocol { code, .. } => Some(*code),
            MssError::PeerAlert { code, .. } => ErrorCode::from_u8(*code),
            _ => None,
        }
    }
}

/// Crate-level result alias.
pub type Result<T> = std::result::Result<T, MssError>;
