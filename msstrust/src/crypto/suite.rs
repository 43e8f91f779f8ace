// Cipher-suite registry.
//
// Suite IDs (wire values, u16):
//   0x0001 AES-256-GCM        / SHA-256
//   0x0002 ChaCha20-Poly1305  / SHA-256
//   0x0003 AES-256-GCM        / SHA-384
//   0x0004 ChaCha20-Poly1305  / SHA-384

use std::fmt;

/// Hash used for HKDF, the transcript MAC and alert tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashAlgorithm {
    Sha256,
    Sha384,
}

impl HashAlgorithm {
    /// Digest (and HMAC tag) size in bytes.
    pub fn output_len(self) -> usize {
        match self {
            HashAlgorithm::Sha256 => 32,
            HashAlgorithm::Sha384 => 48,
        }
    }
}

/// Record-protection cipher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AeadAlgorithm {
    Aes256Gcm,
    ChaCha20Poly1305,
}

impl AeadAlgorithm {
    pub const KEY_LEN: usize = 32;
    pub const NONCE_LEN: usize = 12;
    pub const TAG_LEN: usize = 16;
}

/// A (hash, AEAD) pairing identified on the wire by a 16-bit id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CipherSuite {
    Aes256GcmSha256,
    ChaCha20Poly1305Sha256,
    Aes256GcmSha384,
    ChaCha20Poly1305Sha384,
}

impl CipherSuite {
    /// Every suite this crate implements, in default preference order.
    pub const ALL: [CipherSuite; 4] = [
        CipherSuite::ChaCha20Poly1305Sha256,
        CipherSuite::Aes256GcmSha256,
        CipherSuite::ChaCha20Poly1305Sha384,
        CipherSuite::Aes256GcmSha384,
    ];

    /// Wire ID used during negotiation.
    pub fn wire_id(self) -> u16 {
        match self {
            CipherSuite::Aes256GcmSha256 => 0x0001,
            CipherSuite::ChaCha20Poly1305Sha256 => 0x0002,
            CipherSuite::Aes256GcmSha384 => 0x0003,
            CipherSuite::ChaCha20Poly1305Sha384 => 0x0004,
        }
    }

    /// Resolve from a wire ID.
    pub fn from_wire_id(id: u16) -> Option<Self> {
        match id {
            0x0001 => Some(CipherSuite::Aes256GcmSha256),
            0x0002 => Some(CipherSuite::ChaCha20Poly1305Sha256),
            0x0003 => Some(CipherSuite::Aes256GcmSha384),
            0x0004 => Some(CipherSuite::ChaCha20Poly1305Sha384),
            _ => None,
        }
    }

    pub fn hash(self) -> HashAlgorithm {
        match self {
            CipherSuite::Aes256GcmSha256 | CipherSuite::ChaCha20Poly1305Sha256 => {
                HashAlgorithm::Sha256
            }
            CipherSuite::Aes256GcmSha384 | CipherSuite::ChaCha20Poly1305Sha384 => {
                HashAlgorithm::Sha384
            }
        }
    }

    pub fn aead(self) -> AeadAlgorithm {
        match self {
            CipherSuite::Aes256GcmSha256 | CipherSuite::Aes256GcmSha384 => AeadAlgorithm::Aes256Gcm,
            CipherSuite::ChaCha20Poly1305Sha256 | CipherSuite::ChaCha20Poly1305Sha384 => {
                AeadAlgorithm::ChaCha20Poly1305
            }
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            CipherSuite::Aes256GcmSha256 => "AES_256_GCM_SHA256",
            CipherSuite::ChaCha20Poly1305Sha256 => "CHACHA20_POLY1305_SHA256",
            CipherSuite::Aes256GcmSha384 => "AES_256_GCM_SHA384",
            CipherSuite::ChaCha20Poly1305Sha384 => "CHACHA20_POLY1305_SHA384",
        }
    }
}

impl fmt::Display for CipherSuite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
