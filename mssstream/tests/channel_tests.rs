//! Secure channel tests over in-memory duplex pipes.

use std::sync::Arc;

use msstrust::{
    CipherSuite, ClientConfig, ErrorCode, HandshakeSettings, InMemorySessionCache, KeyPair,
    MssError, ServerConfig, SessionCache,
};
use mssstream::{SecureChannel, StreamError, MAX_RECORD_PLAINTEXT};
use tokio::io::{duplex, DuplexStream};

const PIPE: usize = 64 * 1024;

fn server_config() -> Arc<ServerConfig> {
    Arc::new(
        ServerConfig::new(HandshakeSettings::default())
            .with_certificate(Arc::new(KeyPair::ed25519_from_seed(&[0x42; 32]))),
    )
}

fn client_config() -> Arc<ClientConfig> {
    Arc::new(ClientConfig::new(HandshakeSettings::default()))
}

async fn pair(
    client: Arc<ClientConfig>,
    server: Arc<ServerConfig>,
) -> (SecureChannel<DuplexStream>, SecureChannel<DuplexStream>) {
    let (a, b) = duplex(PIPE);
    let (c, s) = tokio::join!(SecureChannel::connect(a, client), SecureChannel::accept(b, server));
    (c.unwrap(), s.unwrap())
}

#[tokio::test]
async fn ping_pong() {
    let (mut client, mut server) = pair(client_config(), server_config()).await;
    assert!(client.engine().is_handshake_done());
    assert!(server.engine().is_handshake_done());

    client.send(b"ping").await.unwrap();
    assert_eq!(server.recv().await.unwrap().as_deref(), Some(&b"ping"[..]));
    server.send(b"pong").await.unwrap();
    assert_eq!(client.recv().await.unwrap().as_deref(), Some(&b"pong"[..]));
}

#[tokio::test]
async fn large_message_arrives_in_record_sized_pieces() {
    let (mut client, mut server) = pair(client_config(), server_config()).await;
    let payload: Vec<u8> = (0..3 * MAX_RECORD_PLAINTEXT + 17).map(|i| i as u8).collect();

    let sender = async {
        client.send(&payload).await.unwrap();
    };
    let receiver = async {
        let mut received = Vec::new();
        while received.len() < payload.len() {
            let chunk = server.recv().await.unwrap().unwrap();
            assert!(chunk.len() <= MAX_RECORD_PLAINTEXT);
            received.extend_from_slice(&chunk);
        }
        received
    };
    let ((), received) = tokio::join!(sender, receiver);
    assert_eq!(received, payload);
}

#[tokio::test]
async fn close_gives_clean_end_of_stream() {
    let (mut client, mut server) = pair(client_config(), server_config()).await;
    client.send(b"last words").await.unwrap();
    client.close().await.unwrap();
    assert!(matches!(client.close().await, Err(StreamError::Closed)));

    assert_eq!(server.recv().await.unwrap().as_deref(), Some(&b"last words"[..]));
    assert_eq!(server.recv().await.unwrap(), None);
}

#[tokio::test]
async fn negotiation_failure_alerts_the_peer() {
    let client = Arc::new(ClientConfig::new(HandshakeSettings {
        cipher_suites: vec![CipherSuite::Aes256GcmSha256.wire_id()],
        ..Default::default()
    }));
    let server = Arc::new(
        ServerConfig::new(HandshakeSettings {
            cipher_suites: vec![CipherSuite::ChaCha20Poly1305Sha384.wire_id()],
            ..Default::default()
        })
        .with_certificate(Arc::new(KeyPair::ed25519_from_seed(&[0x42; 32]))),
    );

    let (a, b) = duplex(PIPE);
    let (c, s) = tokio::join!(SecureChannel::connect(a, client), SecureChannel::accept(b, server));

    let server_err = s.unwrap_err();
    assert_eq!(
        server_err.engine_error().and_then(MssError::code),
        Some(ErrorCode::NegotiationFailed)
    );
    match c.unwrap_err() {
        StreamError::Engine(MssError::PeerAlert { code, .. }) => {
            assert_eq!(code, ErrorCode::NegotiationFailed as u8);
        }
        other => panic!("expected peer alert, got {other}"),
    }
}

#[tokio::test]
async fn peer_hanging_up_mid_handshake_is_unexpected_eof() {
    let (a, b) = duplex(PIPE);
    drop(b);
    let err = SecureChannel::connect(a, client_config()).await.unwrap_err();
    assert!(matches!(err, StreamError::UnexpectedEof | StreamError::Io(_)), "{err}");
}

// ── Resumption ───────────────────────────────────────────────────────────

struct Caches {
    client: Arc<InMemorySessionCache>,
    server: Arc<InMemorySessionCache>,
}

impl Caches {
    fn new() -> Self {
        Self {
            client: Arc::new(InMemorySessionCache::new(4)),
            server: Arc::new(InMemorySessionCache::new(4)),
        }
    }

    fn client_config(&self) -> Arc<ClientConfig> {
        self.client_config_with_alpn(Vec::new())
    }

    fn client_config_with_alpn(&self, alpn: Vec<String>) -> Arc<ClientConfig> {
        Arc::new(
            ClientConfig::new(HandshakeSettings {
                server_name: Some("db.internal".into()),
                alpn,
                ..Default::default()
            })
            .with_session_cache(Arc::clone(&self.client) as Arc<dyn SessionCache>),
        )
    }

    fn server_config(&self) -> Arc<ServerConfig> {
        Arc::new(
            ServerConfig::new(HandshakeSettings::default())
                .with_certificate(Arc::new(KeyPair::ed25519_from_seed(&[0x42; 32])))
                .with_session_cache(Arc::clone(&self.server) as Arc<dyn SessionCache>),
        )
    }
}

#[tokio::test]
async fn resumed_connection_delivers_early_data_first() {
    let caches = Caches::new();
    let (mut client, mut server) = pair(caches.client_config(), caches.server_config()).await;
    client.send(b"first connection").await.unwrap();
    assert!(server.recv().await.unwrap().is_some());
    drop((client, server));

    let (a, b) = duplex(PIPE);
    let (c, s) = tokio::join!(
        SecureChannel::connect_with_early_data(a, caches.client_config(), b"SELECT 1"),
        SecureChannel::accept(b, caches.server_config())
    );
    let (mut client, mut server) = (c.unwrap(), s.unwrap());
    assert!(client.engine().early_data_accepted());

    client.send(b"after handshake").await.unwrap();
    assert_eq!(server.recv().await.unwrap().as_deref(), Some(&b"SELECT 1"[..]));
    assert!(server.engine().early_data_accepted());
    assert_eq!(server.recv().await.unwrap().as_deref(), Some(&b"after handshake"[..]));
}

#[tokio::test]
async fn early_data_without_session_is_sent_after_handshake() {
    let caches = Caches::new();
    let (a, b) = duplex(PIPE);
    let (c, s) = tokio::join!(
        SecureChannel::connect_with_early_data(a, caches.client_config(), b"no ticket yet"),
        SecureChannel::accept(b, caches.server_config())
    );
    let (client, mut server) = (c.unwrap(), s.unwrap());
    assert!(!client.engine().early_data_accepted());
    assert_eq!(server.recv().await.unwrap().as_deref(), Some(&b"no ticket yet"[..]));
    assert!(!server.engine().early_data_accepted());
}

#[tokio::test]
async fn resumption_with_oversized_client_hello() {
    // ~7.7 KiB of protocols pushes the hello past the first output buffer
    let alpn: Vec<String> = (0..40).map(|i| format!("{i:02}{}", "p".repeat(191))).collect();
    let caches = Caches::new();
    let (client, server) =
        pair(caches.client_config_with_alpn(alpn.clone()), caches.server_config()).await;
    drop((client, server));

    let (a, b) = duplex(PIPE);
    let (c, s) = tokio::join!(
        SecureChannel::connect_with_early_data(a, caches.client_config_with_alpn(alpn), b"SELECT 1"),
        SecureChannel::accept(b, caches.server_config())
    );
    let (client, mut server) = (c.unwrap(), s.unwrap());
    assert!(client.engine().early_data_accepted());
    assert_eq!(server.recv().await.unwrap().as_deref(), Some(&b"SELECT 1"[..]));
    assert!(server.engine().early_data_accepted());
}
