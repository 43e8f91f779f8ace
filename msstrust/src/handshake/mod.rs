// Handshake state machine: client and server roles over a shared core.

mod client;
mod engine;
pub mod messages;
mod server;
pub mod state;

pub use engine::Engine;
pub use state::{HandshakeStatus, Stage};
