// MssTrust: the MSS secure-channel engine.
//
// Crate root: module declarations and public re-exports. The engine is
// transport-agnostic; it consumes and produces raw packet bytes and leaves
// socket I/O to the caller (see the `mssstream` crate).

pub mod alert;
pub mod codec;
pub mod config;
pub mod crypto;
pub mod error;
pub mod extension;
pub mod handshake;
pub mod packet;
pub mod session;

// Re-export key types at crate root for convenience.
pub use alert::{Alert, ErrorCode};
pub use config::{ClientConfig, HandshakeSettings, ServerConfig};
pub use crypto::keys::{AcceptAnyKey, CertificateVerifier, KeyFormat, KeyPair, PinnedKeys, PublicKey};
pub use crypto::kex::KeyExchangeAlgorithm;
pub use crypto::suite::CipherSuite;
pub use error::{MssError, Result};
pub use handshake::{Engine, HandshakeStatus, Stage};
pub use packet::PacketType;
pub use session::{InMemorySessionCache, Session, SessionCache};
