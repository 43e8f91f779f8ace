// Certificate keys: Ed25519 and ECDSA-P256 key pairs, public-key credentials,
// fingerprints and trust verification.

use std::collections::HashSet;
use std::fmt;

use ed25519_dalek::{Signer, Verifier};
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};

use crate::error::{MssError, Result};

/// Credential encoding, identified on the wire by a one-byte id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyFormat {
    Ed25519,
    EcdsaP256,
}

impl KeyFormat {
    pub const ALL: [KeyFormat; 2] = [KeyFormat::Ed25519, KeyFormat::EcdsaP256];

    pub fn id(self) -> u8 {
        match self {
            KeyFormat::Ed25519 => 0,
            KeyFormat::EcdsaP256 => 1,
        }
    }

    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            0 => Some(KeyFormat::Ed25519),
            1 => Some(KeyFormat::EcdsaP256),
            _ => None,
        }
    }

    /// Bit used for this format in the client hello's certificate bitmap.
    pub fn bit(self) -> u32 {
        1 << self.id()
    }

    pub fn bitmap(formats: &[Self]) -> u32 {
        formats.iter().fold(0, |acc, f| acc | f.bit())
    }
}

/// 32-byte BLAKE3 fingerprint of `format id || encoded key`.
pub type Fingerprint = [u8; 32];

#[derive(Clone)]
enum VerifyKey {
    Ed25519(ed25519_dalek::VerifyingKey),
    EcdsaP256(p256::ecdsa::VerifyingKey),
}

/// A parsed public-key credential together with its wire encoding.
#[derive(Clone)]
pub struct PublicKey {
    key: VerifyKey,
    encoded: Vec<u8>,
}

impl PublicKey {
    /// Parse a credential received from the peer.
    pub fn from_bytes(format: KeyFormat, encoded: &[u8]) -> Result<Self> {
        let key = match format {
            KeyFormat::Ed25519 => {
                let bytes: [u8; 32] = encoded.try_into().map_err(|_| {
                    MssError::InvalidKey(format!("ed25519 key must be 32 bytes, got {}", encoded.len()))
                })?;
                VerifyKey::Ed25519(
                    ed25519_dalek::VerifyingKey::from_bytes(&bytes)
                        .map_err(|e| MssError::InvalidKey(format!("{e}")))?,
                )
            }
            KeyFormat::EcdsaP256 => VerifyKey::EcdsaP256(
                p256::ecdsa::VerifyingKey::from_sec1_bytes(encoded)
                    .map_err(|e| MssError::InvalidKey(format!("{e}")))?,
            ),
        };
        Ok(Self {
            key,
            encoded: encoded.to_vec(),
        })
    }

    pub fn format(&self) -> KeyFormat {
        match self.key {
            VerifyKey::Ed25519(_) => KeyFormat::Ed25519,
            VerifyKey::EcdsaP256(_) => KeyFormat::EcdsaP256,
        }
    }

    /// Wire encoding of the key (without the format byte).
    pub fn encoded(&self) -> &[u8] {
        &self.encoded
    }

    pub fn fingerprint(&self) -> Fingerprint {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&[self.format().id()]);
        hasher.update(&self.encoded);
        *hasher.finalize().as_bytes()
    }

    /// Verify `signature` over `message`.
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> Result<()> {
        let bad = || MssError::illegal_param("signature verification failed");
        match &self.key {
            VerifyKey::Ed25519(vk) => {
                let sig = ed25519_dalek::Signature::from_slice(signature).map_err(|_| bad())?;
                vk.verify(message, &sig).map_err(|_| bad())
            }
            VerifyKey::EcdsaP256(vk) => {
                let sig = p256::ecdsa::Signature::from_slice(signature).map_err(|_| bad())?;
                vk.verify(message, &sig).map_err(|_| bad())
            }
        }
    }
}

impl PartialEq for PublicKey {
    fn eq(&self, other: &Self) -> bool {
        self.format() == other.format() && self.encoded == other.encoded
    }
}

impl Eq for PublicKey {}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublicKey")
            .field("format", &self.format())
            .field("fingerprint", &hex(&self.fingerprint()[..8]))
            .finish()
    }
}

enum SigningKey {
    Ed25519(ed25519_dalek::SigningKey),
    EcdsaP256(p256::ecdsa::SigningKey),
}

/// A certificate key pair: the private key plus its public credential.
pub struct KeyPair {
    signing: SigningKey,
    public: PublicKey,
}

impl KeyPair {
    /// Generate a fresh key pair.
    pub fn generate<R: RngCore + CryptoRng + ?Sized>(format: KeyFormat, rng: &mut R) -> Self {
        match format {
            KeyFormat::Ed25519 => {
                let mut rng = rng;
                Self::from_ed25519(ed25519_dalek::SigningKey::generate(&mut rng))
            }
            KeyFormat::EcdsaP256 => {
                let mut rng = rng;
                Self::from_p256(p256::ecdsa::SigningKey::random(&mut rng))
            }
        }
    }

    /// Reconstruct an Ed25519 key pair from its 32-byte seed.
    pub fn ed25519_from_seed(seed: &[u8; 32]) -> Self {
        Self::from_ed25519(ed25519_dalek::SigningKey::from_bytes(seed))
    }

    /// Reconstruct a P-256 key pair from its 32-byte scalar.
    pub fn p256_from_scalar(scalar: &[u8; 32]) -> Result<Self> {
        let signing = p256::ecdsa::SigningKey::from_bytes(scalar.into())
            .map_err(|e| MssError::InvalidKey(format!("{e}")))?;
        Ok(Self::from_p256(signing))
    }

    fn from_ed25519(signing: ed25519_dalek::SigningKey) -> Self {
        let vk = signing.verifying_key();
        Self {
            public: PublicKey {
                encoded: vk.to_bytes().to_vec(),
                key: VerifyKey::Ed25519(vk),
            },
            signing: SigningKey::Ed25519(signing),
        }
    }

    fn from_p256(signing: p256::ecdsa::SigningKey) -> Self {
        let vk = *signing.verifying_key();
        Self {
            public: PublicKey {
                encoded: vk.to_encoded_point(false).as_bytes().to_vec(),
                key: VerifyKey::EcdsaP256(vk),
            },
            signing: SigningKey::EcdsaP256(signing),
        }
    }

    pub fn format(&self) -> KeyFormat {
        self.public.format()
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    /// Sign `message`. Both formats produce a fixed 64-byte signature.
    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        match &self.signing {
            SigningKey::Ed25519(sk) => sk.sign(message).to_bytes().to_vec(),
            SigningKey::EcdsaP256(sk) => {
                let sig: p256::ecdsa::Signature = sk.sign(message);
                sig.to_bytes().to_vec()
            }
        }
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &self.public)
            .finish_non_exhaustive()
    }
}

/// Decides whether a peer's public-key credential is trusted.
pub trait CertificateVerifier: Send + Sync + fmt::Debug {
    fn verify(&self, key: &PublicKey) -> Result<()>;
}

/// Trusts every well-formed key. Only for tests and closed deployments.
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptAnyKey;

impl CertificateVerifier for AcceptAnyKey {
    fn verify(&self, _key: &PublicKey) -> Result<()> {
        Ok(())
    }
}

/// Trusts exactly the keys whose fingerprints were pinned.
#[derive(Debug, Default, Clone)]
pub struct PinnedKeys {
    pins: HashSet<Fingerprint>,
}

impl PinnedKeys {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key(mut self, key: &PublicKey) -> Self {
        self.pin(key.fingerprint());
        self
    }

    pub fn pin(&mut self, fingerprint: Fingerprint) {
        self.pins.insert(fingerprint);
    }

    pub fn contains(&self, key: &PublicKey) -> bool {
        self.pins.contains(&key.fingerprint())
    }
}

impl CertificateVerifier for PinnedKeys {
    fn verify(&self, key: &PublicKey) -> Result<()> {
        if self.contains(key) {
            Ok(())
        } else {
            Err(MssError::illegal_param("untrusted certificate"))
        }
    }
}

pub(crate) fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
