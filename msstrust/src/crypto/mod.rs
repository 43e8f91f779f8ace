// Crypto module declarations

pub mod aead;
pub mod kex;
pub mod keys;
pub mod schedule;
pub mod suite;

use rand::{CryptoRng, RngCore};

/// Random source an engine draws hello randoms and ephemeral keys from.
pub trait SecureRandom: RngCore + CryptoRng + Send {}

impl<T: RngCore + CryptoRng + Send> SecureRandom for T {}
