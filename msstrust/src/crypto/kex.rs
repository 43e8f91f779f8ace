// Ephemeral key exchange: X25519 and P-256 ECDH.
//
// Public keys on the wire: X25519 as 32 raw bytes, P-256 as a 65-byte SEC1
// uncompressed point.

use p256::elliptic_curve::sec1::ToEncodedPoint;
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use x25519_dalek::StaticSecret;
use zeroize::Zeroizing;

use crate::error::{MssError, Result};

/// Key-exchange algorithm, identified on the wire by a one-byte id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyExchangeAlgorithm {
    X25519,
    P256,
}

impl KeyExchangeAlgorithm {
    pub const ALL: [KeyExchangeAlgorithm; 2] =
        [KeyExchangeAlgorithm::X25519, KeyExchangeAlgorithm::P256];

    pub fn id(self) -> u8 {
        match self {
            KeyExchangeAlgorithm::X25519 => 0,
            KeyExchangeAlgorithm::P256 => 1,
        }
    }

    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            0 => Some(KeyExchangeAlgorithm::X25519),
            1 => Some(KeyExchangeAlgorithm::P256),
            _ => None,
        }
    }

    /// Bit used for this algorithm in a hello-retry bitmap.
    pub fn bit(self) -> u32 {
        1 << self.id()
    }

    /// Length of the encoded public key.
    pub fn public_key_len(self) -> usize {
        match self {
            KeyExchangeAlgorithm::X25519 => 32,
            KeyExchangeAlgorithm::P256 => 65,
        }
    }

    pub fn bitmap(algorithms: &[Self]) -> u32 {
        algorithms.iter().fold(0, |acc, a| acc | a.bit())
    }

    /// Entries of `preferred` whose bit is set in `bitmap`, order preserved.
    pub fn select(preferred: &[Self], bitmap: u32) -> Vec<Self> {
        preferred
            .iter()
            .copied()
            .filter(|a| bitmap & a.bit() != 0)
            .collect()
    }
}

enum Secret {
    X25519(StaticSecret),
    P256(p256::SecretKey),
}

/// One side of an ephemeral key exchange. Consumed by [`KeyExchange::agree`].
pub struct KeyExchange {
    algorithm: KeyExchangeAlgorithm,
    secret: Secret,
    public: Vec<u8>,
}

impl KeyExchange {
    /// Generate a fresh ephemeral key pair.
    pub fn generate<R: RngCore + CryptoRng + ?Sized>(
        algorithm: KeyExchangeAlgorithm,
        rng: &mut R,
    ) -> Self {
        match algorithm {
            KeyExchangeAlgorithm::X25519 => {
                let mut seed = Zeroizing::new([0u8; 32]);
                rng.fill_bytes(seed.as_mut());
                let secret = StaticSecret::from(*seed);
                let public = x25519_dalek::PublicKey::from(&secret).as_bytes().to_vec();
                Self {
                    algorithm,
                    secret: Secret::X25519(secret),
                    public,
                }
            }
            KeyExchangeAlgorithm::P256 => {
                let mut rng = rng;
                let secret = p256::SecretKey::random(&mut rng);
                let public = secret
                    .public_key()
                    .to_encoded_point(false)
                    .as_bytes()
                    .to_vec();
                Self {
                    algorithm,
                    secret: Secret::P256(secret),
                    public,
                }
            }
        }
    }

    pub fn algorithm(&self) -> KeyExchangeAlgorithm {
        self.algorithm
    }

    /// Encoded public half, as sent in a hello.
    pub fn public_key(&self) -> &[u8] {
        &self.public
    }

    /// Derive the raw shared secret from the peer's encoded public key.
    pub fn agree(self, peer_public: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        match self.secret {
            Secret::X25519(secret) => {
                let peer: [u8; 32] = peer_public.try_into().map_err(|_| {
                    MssError::illegal_param(format!(
                        "x25519 public key must be 32 bytes, got {}",
                        peer_public.len()
                    ))
                })?;
                let shared = secret.diffie_hellman(&x25519_dalek::PublicKey::from(peer));
                if !shared.was_contributory() {
                    return Err(MssError::illegal_param("non-contributory x25519 public key"));
                }
                Ok(Zeroizing::new(shared.as_bytes().to_vec()))
            }
            Secret::P256(secret) => {
                let peer = p256::PublicKey::from_sec1_bytes(peer_public)
                    .map_err(|_| MssError::illegal_param("invalid p256 public key"))?;
                let shared =
                    p256::ecdh::diffie_hellman(secret.to_nonzero_scalar(), peer.as_affine());
                Ok(Zeroizing::new(shared.raw_secret_bytes().to_vec()))
            }
        }
    }
}

impl std::fmt::Debug for KeyExchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyExchange")
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}
