// MssTrust benchmarks using criterion.
//
// Measures:
//   - Key-pair generation per certificate format
//   - Record sealing / opening per cipher suite at various payload sizes
//   - Full handshake latency per key exchange

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use rand::rngs::OsRng;

use msstrust::crypto::schedule::{KeySchedule, LABEL_C2S_IV, LABEL_C2S_KEY};
use msstrust::{
    CipherSuite, ClientConfig, Engine, HandshakeSettings, KeyExchangeAlgorithm, KeyFormat,
    KeyPair, ServerConfig,
};

// ---------------------------------------------------------------------------
// Key generation
// ---------------------------------------------------------------------------

fn bench_keygen(c: &mut Criterion) {
    let mut group = c.benchmark_group("keygen");
    for format in KeyFormat::ALL {
        group.bench_function(format!("{format:?}"), |b| {
            b.iter(|| black_box(KeyPair::generate(format, &mut OsRng)));
        });
    }
    group.finish();
}

// ---------------------------------------------------------------------------
// Record sealing
// ---------------------------------------------------------------------------

fn bench_records(c: &mut Criterion) {
    let sizes: &[usize] = &[64, 1024, 16 * 1024];

    for suite in CipherSuite::ALL {
        let schedule = KeySchedule::new(suite.hash(), &[1u8; 64], &[2u8; 32]).unwrap();
        let mut group = c.benchmark_group(format!("seal/{}", suite.name()));
        for &size in sizes {
            let plaintext = vec![0xABu8; size];
            group.throughput(Throughput::Bytes(size as u64));
            group.bench_with_input(
                BenchmarkId::from_parameter(format!("{size}B")),
                &plaintext,
                |b, pt| {
                    let mut cipher = schedule
                        .record_cipher(suite.aead(), LABEL_C2S_KEY, LABEL_C2S_IV)
                        .unwrap();
                    b.iter(|| black_box(cipher.seal(black_box(pt), b"").unwrap()));
                },
            );
        }
        group.finish();

        let mut group = c.benchmark_group(format!("open/{}", suite.name()));
        for &size in sizes {
            let plaintext = vec![0xABu8; size];
            group.throughput(Throughput::Bytes(size as u64));
            group.bench_with_input(
                BenchmarkId::from_parameter(format!("{size}B")),
                &plaintext,
                |b, pt| {
                    // each open consumes one sequence number, so pair it with a seal
                    let mut sealer = schedule
                        .record_cipher(suite.aead(), LABEL_C2S_KEY, LABEL_C2S_IV)
                        .unwrap();
                    let mut opener = schedule
                        .record_cipher(suite.aead(), LABEL_C2S_KEY, LABEL_C2S_IV)
                        .unwrap();
                    b.iter(|| {
                        let sealed = sealer.seal(pt, b"").unwrap();
                        black_box(opener.open(black_box(&sealed), b"").unwrap());
                    });
                },
            );
        }
        group.finish();
    }
}

// ---------------------------------------------------------------------------
// Full handshake latency
// ---------------------------------------------------------------------------

fn handshake_pair(client: &mut Engine, server: &mut Engine) {
    let mut c2s = BytesMut::new();
    let mut s2c = BytesMut::new();
    while !(client.is_handshake_done() && server.is_handshake_done()) {
        let mut out = BytesMut::with_capacity(4096);
        client.handshake(&mut out, &mut s2c).unwrap();
        c2s.extend_from_slice(&out);
        let mut out = BytesMut::with_capacity(4096);
        server.handshake(&mut out, &mut c2s).unwrap();
        s2c.extend_from_slice(&out);
    }
}

fn bench_full_handshake(c: &mut Criterion) {
    let server_key = Arc::new(KeyPair::generate(KeyFormat::Ed25519, &mut OsRng));
    let mut group = c.benchmark_group("full_handshake");
    for kex in KeyExchangeAlgorithm::ALL {
        let settings = HandshakeSettings {
            key_exchanges: vec![kex],
            ..Default::default()
        };
        let client_config = Arc::new(ClientConfig::new(settings.clone()));
        let server_config =
            Arc::new(ServerConfig::new(settings).with_certificate(Arc::clone(&server_key)));
        group.bench_function(format!("{kex:?}"), |b| {
            b.iter(|| {
                let mut client = Engine::client(Arc::clone(&client_config)).unwrap();
                let mut server = Engine::server(Arc::clone(&server_config)).unwrap();
                handshake_pair(&mut client, &mut server);
                black_box(client.cipher_suite());
            });
        });
    }
    group.finish();
}

// ---------------------------------------------------------------------------
// Criterion harness
// ---------------------------------------------------------------------------

criterion_group! {
    name = handshake_benches;
    config = Criterion::default()
        .sample_size(100)
        .measurement_time(Duration::from_secs(5));
    targets =
        bench_keygen,
        bench_records,
        bench_full_handshake
}

criterion_main!(handshake_benches);
