use msstrust::MssError;
use thiserror::Error;

/// All errors produced by the MssStream channel adapter.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("engine error: {0}")]
    Engine(#[from] MssError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("connection closed before the record was complete")]
    UnexpectedEof,

    #[error("channel is closed")]
    Closed,
}

impl StreamError {
    /// The engine error behind this failure, if there is one.
    pub fn engine_error(&self) -> Option<&MssError> {
        match self {
            StreamError::Engine(err) => Some(err),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, StreamError>;
