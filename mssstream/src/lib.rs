// MssStream: record framing and handshake driving for MSS over async byte
// streams.
//
// Crate root: module declarations and public re-exports.

pub mod channel;
pub mod error;
pub mod record;

pub use channel::SecureChannel;
pub use error::{Result, StreamError};
pub use record::{Incoming, RecordLayer, MAX_RECORD_PLAINTEXT};
