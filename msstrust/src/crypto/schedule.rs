// Key schedule.
//
// ```text
// preliminary  = HKDF-Extract(salt = client_random || server_random, ikm = kex secret)
// deriver_key  = HKDF-Expand(preliminary, "", hash_len)
// key(label)   = HKDF-Expand(deriver_key, label, len)
// ```
//
// Labels in use: "c2s0"/"s2c0" (record keys), "c2s"/"s2c" (record IVs),
// "verify_s" (transcript MAC), "session" (resumption key), "alert" (alert
// tags), "exp " + label (exporter). Early data uses a separate schedule keyed by
// the resumption key and salted with the client random.

use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::{Sha256, Sha384};
use zeroize::Zeroizing;

use super::aead::RecordCipher;
use super::suite::{AeadAlgorithm, CipherSuite, HashAlgorithm};
use crate::error::{MssError, Result};

pub const LABEL_C2S_KEY: &[u8] = b"c2s0";
pub const LABEL_S2C_KEY: &[u8] = b"s2c0";
pub const LABEL_C2S_IV: &[u8] = b"c2s";
pub const LABEL_S2C_IV: &[u8] = b"s2c";
pub const LABEL_VERIFY: &[u8] = b"verify_s";
pub const LABEL_SESSION: &[u8] = b"session";
pub const LABEL_ALERT: &[u8] = b"alert";
pub const LABEL_EARLY_KEY: &[u8] = b"early";
pub const LABEL_EARLY_IV: &[u8] = b"early_iv";
const EXPORTER_PREFIX: &[u8] = b"exp ";

/// Resumption key length.
pub const SESSION_KEY_LEN: usize = 64;

macro_rules! with_hash {
    ($alg:expr, $h:ident => $body:expr) => {
        match $alg {
            HashAlgorithm::Sha256 => {
                type $h = Sha256;
                $body
            }
            HashAlgorithm::Sha384 => {
                type $h = Sha384;
                $body
            }
        }
    };
}

fn kdf_error(len: usize) -> MssError {
    MssError::InvalidKey(format!("hkdf cannot produce {len} bytes"))
}

/// HKDF-Extract followed by an empty-info expand to one hash length.
fn extract_deriver(hash: HashAlgorithm, salt: &[u8], ikm: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    let mut deriver = Zeroizing::new(vec![0u8; hash.output_len()]);
    with_hash!(hash, H => {
        Hkdf::<H>::new(Some(salt), ikm)
            .expand(b"", &mut deriver)
            .map_err(|_| kdf_error(hash.output_len()))?
    });
    Ok(deriver)
}

fn expand(hash: HashAlgorithm, prk: &[u8], info: &[u8], out: &mut [u8]) -> Result<()> {
    with_hash!(hash, H => {
        Hkdf::<H>::from_prk(prk)
            .map_err(|_| MssError::InvalidKey("deriver key too short".into()))?
            .expand(info, out)
            .map_err(|_| kdf_error(out.len()))
    })
}

/// HMAC over `data` with the suite's hash.
pub fn hmac(hash: HashAlgorithm, key: &[u8], data: &[&[u8]]) -> Result<Vec<u8>> {
    with_hash!(hash, H => {
        let mut mac = <Hmac<H> as Mac>::new_from_slice(key)
            .map_err(|_| MssError::InvalidKey("hmac key".into()))?;
        for part in data {
            mac.update(part);
        }
        Ok(mac.finalize().into_bytes().to_vec())
    })
}

/// Constant-time HMAC check.
pub fn hmac_verify(hash: HashAlgorithm, key: &[u8], data: &[&[u8]], tag: &[u8]) -> bool {
    with_hash!(hash, H => {
        let Ok(mut mac) = <Hmac<H> as Mac>::new_from_slice(key) else {
            return false;
        };
        for part in data {
            mac.update(part);
        }
        mac.verify_slice(tag).is_ok()
    })
}

/// Label-keyed derivation from one deriver key.
pub struct KeySchedule {
    hash: HashAlgorithm,
    deriver: Zeroizing<Vec<u8>>,
}

impl KeySchedule {
    /// Run extract + expand. The preliminary PRK never leaves this call.
    pub fn new(hash: HashAlgorithm, salt: &[u8], secret: &[u8]) -> Result<Self> {
        Ok(Self {
            hash,
            deriver: extract_deriver(hash, salt, secret)?,
        })
    }

    pub fn hash(&self) -> HashAlgorithm {
        self.hash
    }

    pub fn derive(&self, label: &[u8], len: usize) -> Result<Zeroizing<Vec<u8>>> {
        let mut out = Zeroizing::new(vec![0u8; len]);
        expand(self.hash, &self.deriver, label, &mut out)?;
        Ok(out)
    }

    pub fn derive_array<const N: usize>(&self, label: &[u8]) -> Result<Zeroizing<[u8; N]>> {
        let mut out = Zeroizing::new([0u8; N]);
        expand(self.hash, &self.deriver, label, out.as_mut())?;
        Ok(out)
    }

    /// Record cipher keyed under `key_label` with its IV from `iv_label`.
    pub fn record_cipher(
        &self,
        aead: AeadAlgorithm,
        key_label: &[u8],
        iv_label: &[u8],
    ) -> Result<RecordCipher> {
        let key = self.derive_array::<32>(key_label)?;
        let iv = self.derive_array::<12>(iv_label)?;
        Ok(RecordCipher::new(aead, &key, &iv))
    }

    /// MAC over the handshake transcript, keyed under `verify_s`.
    pub fn transcript_mac(&self, parts: &[&[u8]]) -> Result<Vec<u8>> {
        let key = self.derive(LABEL_VERIFY, self.hash.output_len())?;
        hmac(self.hash, &key, parts)
    }

    pub fn alert_tag(&self, signed: &[u8]) -> Result<Vec<u8>> {
        let key = self.derive(LABEL_ALERT, self.hash.output_len())?;
        hmac(self.hash, &key, &[signed])
    }

    pub fn verify_alert_tag(&self, signed: &[u8], tag: &[u8]) -> bool {
        match self.derive(LABEL_ALERT, self.hash.output_len()) {
            Ok(key) => hmac_verify(self.hash, &key, &[signed], tag),
            Err(_) => false,
        }
    }

    pub fn session_key(&self) -> Result<Zeroizing<[u8; SESSION_KEY_LEN]>> {
        self.derive_array::<SESSION_KEY_LEN>(LABEL_SESSION)
    }

    /// Keying material for the application, domain-separated from every
    /// internal label by the `"exp "` prefix.
    pub fn export(&self, label: &[u8], len: usize) -> Result<Vec<u8>> {
        let mut info = Vec::with_capacity(EXPORTER_PREFIX.len() + label.len());
        info.extend_from_slice(EXPORTER_PREFIX);
        info.extend_from_slice(label);
        Ok(self.derive(&info, len)?.to_vec())
    }
}

impl std::fmt::Debug for KeySchedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeySchedule")
            .field("hash", &self.hash)
            .finish_non_exhaustive()
    }
}

/// Cipher for 0-RTT data on a resumed session. Both sides derive the same
/// cipher from the resumption key and the fresh client random, so nonces never
/// repeat across reconnects.
pub fn early_data_cipher(
    suite: CipherSuite,
    client_random: &[u8; 32],
    session_key: &[u8],
) -> Result<RecordCipher> {
    KeySchedule::new(suite.hash(), client_random, session_key)?.record_cipher(
        suite.aead(),
        LABEL_EARLY_KEY,
        LABEL_EARLY_IV,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schedule(hash: HashAlgorithm) -> KeySchedule {
        KeySchedule::new(hash, &[0x11; 64], &[0x22; 32]).unwrap()
    }

    #[test]
    fn labels_are_separated() {
        for hash in [HashAlgorithm::Sha256, HashAlgorithm::Sha384] {
            let ks = schedule(hash);
            let c2s = ks.derive(LABEL_C2S_KEY, 32).unwrap();
            let s2c = ks.derive(LABEL_S2C_KEY, 32).unwrap();
            let session = ks.derive(LABEL_SESSION, 32).unwrap();
            let alert = ks.derive(LABEL_ALERT, 32).unwrap();
            let all = [&c2s, &s2c, &session, &alert];
            for (i, a) in all.iter().enumerate() {
                for b in &all[i + 1..] {
                    assert_ne!(a.as_slice(), b.as_slice());
                }
            }
        }
    }

    #[test]
    fn derivation_is_deterministic_and_salted() {
        let a = schedule(HashAlgorithm::Sha256).derive(b"x", 40).unwrap();
        let b = schedule(HashAlgorithm::Sha256).derive(b"x", 40).unwrap();
        assert_eq!(*a, *b);
        let other = KeySchedule::new(HashAlgorithm::Sha256, &[0x12; 64], &[0x22; 32]).unwrap();
        assert_ne!(*a, *other.derive(b"x", 40).unwrap());
    }

    #[test]
    fn exporter_differs_from_internal_labels() {
        let ks = schedule(HashAlgorithm::Sha384);
        let exported = ks.export(b"session", 64).unwrap();
        assert_ne!(exported, ks.session_key().unwrap().to_vec());
    }

    #[test]
    fn alert_tag_verifies() {
        let ks = schedule(HashAlgorithm::Sha256);
        let tag = ks.alert_tag(b"\x04\x03bad").unwrap();
        assert_eq!(tag.len(), 32);
        assert!(ks.verify_alert_tag(b"\x04\x03bad", &tag));
        assert!(!ks.verify_alert_tag(b"\x04\x03bae", &tag));
    }

    #[test]
    fn transcript_mac_covers_all_parts() {
        let ks = schedule(HashAlgorithm::Sha256);
        let tag = ks.transcript_mac(&[b"hello", b"world"]).unwrap();
        assert_eq!(tag.len(), 32);
        assert_eq!(tag, ks.transcript_mac(&[b"hel", b"loworld"]).unwrap());
        assert_ne!(tag, ks.transcript_mac(&[b"hello", b"worle"]).unwrap());
    }

    #[test]
    fn early_cipher_depends_on_client_random() {
        let suite = CipherSuite::ChaCha20Poly1305Sha256;
        let mut a = early_data_cipher(suite, &[1; 32], &[5; 64]).unwrap();
        let mut b = early_data_cipher(suite, &[1; 32], &[5; 64]).unwrap();
        let mut c = early_data_cipher(suite, &[2; 32], &[5; 64]).unwrap();
        let sealed = a.seal(b"early", b"").unwrap();
        assert_eq!(b.open(&sealed, b"").unwrap(), b"early");
        assert!(c.open(&sealed, b"").is_err());
    }

    #[test]
    fn oversized_output_is_an_error() {
        let ks = schedule(HashAlgorithm::Sha256);
        assert!(ks.derive(b"x", 255 * 32 + 1).is_err());
    }
}
