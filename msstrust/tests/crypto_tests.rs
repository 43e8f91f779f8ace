// Integration tests for the MssTrust crypto layer.

use rand::rngs::{OsRng, StdRng};
use rand::SeedableRng;

use msstrust::crypto::kex::KeyExchange;
use msstrust::crypto::schedule::{
    early_data_cipher, KeySchedule, LABEL_C2S_IV, LABEL_C2S_KEY, LABEL_S2C_IV, LABEL_S2C_KEY,
};
use msstrust::{CipherSuite, ErrorCode, KeyExchangeAlgorithm, KeyFormat, KeyPair, PublicKey};

// ── Key exchange ─────────────────────────────────────────────────────────

#[test]
fn key_exchange_agrees_for_every_algorithm() {
    for alg in KeyExchangeAlgorithm::ALL {
        let a = KeyExchange::generate(alg, &mut OsRng);
        let b = KeyExchange::generate(alg, &mut OsRng);
        assert_eq!(a.public_key().len(), alg.public_key_len());
        let a_pub = a.public_key().to_vec();
        let b_pub = b.public_key().to_vec();
        assert_eq!(*a.agree(&b_pub).unwrap(), *b.agree(&a_pub).unwrap(), "{alg:?}");
    }
}

#[test]
fn key_share_of_wrong_length_is_illegal_param() {
    let kex = KeyExchange::generate(KeyExchangeAlgorithm::X25519, &mut OsRng);
    let err = kex.agree(&[1u8; 31]).unwrap_err();
    assert_eq!(err.code(), Some(ErrorCode::IllegalParam));
}

// ── Signatures ───────────────────────────────────────────────────────────

#[test]
fn sign_and_verify_every_format() {
    let mut rng = StdRng::seed_from_u64(1);
    for format in KeyFormat::ALL {
        let kp = KeyPair::generate(format, &mut rng);
        let msg = b"MssTrust integration test message";
        let sig = kp.sign(msg);
        assert_eq!(sig.len(), 64);
        kp.public_key().verify(msg, &sig).expect("valid signature");
        assert!(kp.public_key().verify(b"wrong", &sig).is_err());
    }
}

#[test]
fn public_key_survives_wire_encoding() {
    let mut rng = StdRng::seed_from_u64(2);
    for format in KeyFormat::ALL {
        let kp = KeyPair::generate(format, &mut rng);
        let parsed = PublicKey::from_bytes(format, kp.public_key().encoded()).unwrap();
        assert_eq!(&parsed, kp.public_key());
        assert_eq!(parsed.fingerprint(), kp.public_key().fingerprint());
    }
}

#[test]
fn fingerprint_binds_the_format() {
    let ed = KeyPair::ed25519_from_seed(&[3u8; 32]);
    let p256 = KeyPair::p256_from_scalar(&[3u8; 32]).unwrap();
    assert_ne!(ed.public_key().fingerprint(), p256.public_key().fingerprint());
}

#[test]
fn garbage_public_key_is_invalid() {
    assert!(PublicKey::from_bytes(KeyFormat::EcdsaP256, &[0u8; 10]).is_err());
    assert!(PublicKey::from_bytes(KeyFormat::Ed25519, &[0u8; 31]).is_err());
}

// ── Key schedule ─────────────────────────────────────────────────────────

#[test]
fn both_directions_use_distinct_keys() {
    for suite in CipherSuite::ALL {
        let schedule = KeySchedule::new(suite.hash(), &[7u8; 64], &[9u8; 32]).unwrap();
        let mut c2s = schedule
            .record_cipher(suite.aead(), LABEL_C2S_KEY, LABEL_C2S_IV)
            .unwrap();
        let mut s2c = schedule
            .record_cipher(suite.aead(), LABEL_S2C_KEY, LABEL_S2C_IV)
            .unwrap();
        let sealed = c2s.seal(b"direction", b"").unwrap();
        let err = s2c.open(&sealed, b"").unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::CipherFault), "{suite}");
    }
}

#[test]
fn early_data_cipher_depends_on_client_random() {
    let suite = CipherSuite::Aes256GcmSha256;
    let session_key = [0x42u8; 64];
    let mut a = early_data_cipher(suite, &[1u8; 32], &session_key).unwrap();
    let mut same = early_data_cipher(suite, &[1u8; 32], &session_key).unwrap();
    let mut other = early_data_cipher(suite, &[2u8; 32], &session_key).unwrap();

    let sealed = a.seal(b"0-rtt", b"").unwrap();
    assert_eq!(same.open(&sealed, b"").unwrap(), b"0-rtt");
    assert!(other.open(&sealed, b"").is_err());
}

#[test]
fn exporter_labels_are_separated() {
    let schedule = KeySchedule::new(CipherSuite::ALL[0].hash(), b"salt", b"secret").unwrap();
    let a = schedule.export(b"app", 32).unwrap();
    let b = schedule.export(b"app2", 32).unwrap();
    assert_ne!(a, b);
    // "exp " prefix keeps exports away from internal labels
    assert_ne!(&a[..], &schedule.derive(b"app", 32).unwrap()[..]);
}
