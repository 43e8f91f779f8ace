// MssStream benchmarks using criterion.
//
// Measures:
//   - DATA record sealing + opening through the record layer
//   - Secure channel throughput over an in-memory duplex pipe

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use msstrust::{ClientConfig, Engine, HandshakeSettings, KeyPair, ServerConfig};
use mssstream::{Incoming, RecordLayer, SecureChannel};
use tokio::io::duplex;
use tokio::runtime::Runtime;

fn configs() -> (Arc<ClientConfig>, Arc<ServerConfig>) {
    let key = Arc::new(KeyPair::ed25519_from_seed(&[7u8; 32]));
    (
        Arc::new(ClientConfig::new(HandshakeSettings::default())),
        Arc::new(ServerConfig::new(HandshakeSettings::default()).with_certificate(key)),
    )
}

fn engines() -> (Engine, Engine) {
    let (client_config, server_config) = configs();
    let mut client = Engine::client(client_config).unwrap();
    let mut server = Engine::server(server_config).unwrap();
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
    (client, server)
}

// ---------------------------------------------------------------------------
// Record layer
// ---------------------------------------------------------------------------

fn bench_record_layer(c: &mut Criterion) {
    let sizes: &[usize] = &[64, 1024, 16 * 1024, 256 * 1024];
    let mut group = c.benchmark_group("record_seal_open");
    for &size in sizes {
        let payload = vec![0xCDu8; size];
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{size}B")),
            &payload,
            |b, payload| {
                let (mut client, mut server) = engines();
                let mut records = RecordLayer::new();
                b.iter(|| {
                    let mut wire = BytesMut::new();
                    RecordLayer::seal(&mut client, payload, &mut wire).unwrap();
                    records.input_mut().extend_from_slice(&wire);
                    while let Some(Incoming::Data(plain)) = records.open(&mut server).unwrap() {
                        black_box(plain);
                    }
                });
            },
        );
    }
    group.finish();
}

// ---------------------------------------------------------------------------
// Channel throughput
// ---------------------------------------------------------------------------

fn bench_channel(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let payload = vec![0xEFu8; 64 * 1024];
    let mut group = c.benchmark_group("channel");
    group.throughput(Throughput::Bytes(payload.len() as u64));
    group.bench_function("send_recv_64KiB", |b| {
        let (client_config, server_config) = configs();
        let (mut client, mut server) = rt.block_on(async {
            let (a, b) = duplex(256 * 1024);
            let (c, s) = tokio::join!(
                SecureChannel::connect(a, client_config),
                SecureChannel::accept(b, server_config)
            );
            (c.unwrap(), s.unwrap())
        });
        b.iter(|| {
            rt.block_on(async {
                client.send(&payload).await.unwrap();
                let mut received = 0;
                while received < payload.len() {
                    received += server.recv().await.unwrap().unwrap().len();
                }
                black_box(received);
            });
        });
    });
    group.finish();
}

// ---------------------------------------------------------------------------
// Criterion harness
// ---------------------------------------------------------------------------

criterion_group! {
    name = record_benches;
    config = Criterion::default()
        .sample_size(50)
        .measurement_time(Duration::from_secs(5));
    targets =
        bench_record_layer,
        bench_channel
}

criterion_main!(record_benches);
