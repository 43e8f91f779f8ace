// Directional record ciphers: AES-256-GCM and ChaCha20-Poly1305.
//
// Each direction owns a key, a static IV and a 64-bit sequence number.
//   nonce = iv XOR (0u32 || seq_be64)
// The sequence number advances on every seal/open.

// Both aes-gcm and chacha20poly1305 re-export the same `aead` traits.
use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce as AesNonce};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::suite::AeadAlgorithm;
use crate::error::{MssError, Result};

/// One direction of record protection.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct RecordCipher {
    #[zeroize(skip)]
    algorithm: AeadAlgorithm,
    key: [u8; 32],
    iv: [u8; 12],
    seq: u64,
}

impl RecordCipher {
    /// Copies the key material; the caller keeps ownership of its buffers.
    pub fn new(algorithm: AeadAlgorithm, key: &[u8; 32], iv: &[u8; 12]) -> Self {
        Self {
            algorithm,
            key: *key,
            iv: *iv,
            seq: 0,
        }
    }

    pub fn algorithm(&self) -> AeadAlgorithm {
        self.algorithm
    }

    /// Number of records processed so far.
    pub fn sequence(&self) -> u64 {
        self.seq
    }

    fn next_nonce(&mut self) -> Result<[u8; 12]> {
        if self.seq == u64::MAX {
            return Err(MssError::cipher_fault("record sequence exhausted"));
        }
        let mut nonce = self.iv;
        for (n, s) in nonce[4..].iter_mut().zip(self.seq.to_be_bytes()) {
            *n ^= s;
        }
        self.seq += 1;
        Ok(nonce)
    }

    /// Encrypt `plaintext`, returning ciphertext || 16-byte tag.
    pub fn seal(&mut self, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
        let nonce = self.next_nonce()?;
        let payload = Payload { msg: plaintext, aad };
        let sealed = match self.algorithm {
            AeadAlgorithm::Aes256Gcm => Aes256Gcm::new_from_slice(&self.key)
                .map_err(|_| MssError::cipher_fault("cipher init failed"))?
                .encrypt(AesNonce::from_slice(&nonce), payload),
            AeadAlgorithm::ChaCha20Poly1305 => ChaCha20Poly1305::new_from_slice(&self.key)
                .map_err(|_| MssError::cipher_fault("cipher init failed"))?
                .encrypt(Nonce::from_slice(&nonce), payload),
        };
        sealed.map_err(|_| MssError::cipher_fault("encryption failed"))
    }

    /// Decrypt ciphertext || tag. Any authentication failure is a generic
    /// CIPHER_FAULT.
    pub fn open(&mut self, ciphertext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
        if ciphertext.len() < AeadAlgorithm::TAG_LEN {
            return Err(MssError::cipher_fault("decryption failed"));
        }
        let nonce = self.next_nonce()?;
        let payload = Payload {
            msg: ciphertext,
            aad,
        };
        let opened = match self.algorithm {
            AeadAlgorithm::Aes256Gcm => Aes256Gcm::new_from_slice(&self.key)
                .map_err(|_| MssError::cipher_fault("cipher init failed"))?
                .decrypt(AesNonce::from_slice(&nonce), payload),
            AeadAlgorithm::ChaCha20Poly1305 => ChaCha20Poly1305::new_from_slice(&self.key)
                .map_err(|_| MssError::cipher_fault("cipher init failed"))?
                .decrypt(Nonce::from_slice(&nonce), payload),
        };
        opened.map_err(|_| MssError::cipher_fault("decryption failed"))
    }
}

impl std::fmt::Debug for RecordCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordCipher")
            .field("algorithm", &self.algorithm)
            .field("seq", &self.seq)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::ErrorCode;

    fn pair(alg: AeadAlgorithm) -> (RecordCipher, RecordCipher) {
        (
            RecordCipher::new(alg, &[0x42; 32], &[7; 12]),
            RecordCipher::new(alg, &[0x42; 32], &[7; 12]),
        )
    }

    #[test]
    fn chacha_roundtrip_sequence() {
        let (mut enc, mut dec) = pair(AeadAlgorithm::ChaCha20Poly1305);
        for msg in [&b"first"[..], b"second", b""] {
            let ct = enc.seal(msg, b"").unwrap();
            assert_eq!(ct.len(), msg.len() + AeadAlgorithm::TAG_LEN);
            assert_eq!(dec.open(&ct, b"").unwrap(), msg);
        }
        assert_eq!(enc.sequence(), 3);
        assert_eq!(dec.sequence(), 3);
    }

    #[test]
    fn aes_gcm_roundtrip_with_aad() {
        let (mut enc, mut dec) = pair(AeadAlgorithm::Aes256Gcm);
        let ct = enc.seal(b"aes gcm secret", b"auth data").unwrap();
        assert_eq!(dec.open(&ct, b"auth data").unwrap(), b"aes gcm secret");
    }

    #[test]
    fn same_plaintext_gives_distinct_records() {
        let (mut enc, _) = pair(AeadAlgorithm::Aes256Gcm);
        let a = enc.seal(b"same", b"").unwrap();
        let b = enc.seal(b"same", b"").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn out_of_order_record_fails() {
        let (mut enc, mut dec) = pair(AeadAlgorithm::ChaCha20Poly1305);
        let _first = enc.seal(b"one", b"").unwrap();
        let second = enc.seal(b"two", b"").unwrap();
        let err = dec.open(&second, b"").unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::CipherFault));
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let (mut enc, mut dec) = pair(AeadAlgorithm::Aes256Gcm);
        let mut ct = enc.seal(b"data", b"").unwrap();
        ct[0] ^= 0xFF;
        assert!(dec.open(&ct, b"").is_err());
    }

    #[test]
    fn short_ciphertext_is_cipher_fault() {
        let (_, mut dec) = pair(AeadAlgorithm::ChaCha20Poly1305);
        let err = dec.open(&[0u8; 5], b"").unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::CipherFault));
    }
}
