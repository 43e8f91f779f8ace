// Client side of the handshake.

use std::sync::Arc;

use bytes::{Buf, Bytes, BytesMut};
use tracing::debug;
use zeroize::Zeroizing;

use super::engine::{Core, Next, SessionStore};
use super::messages::{
    decode_alpn, decode_certificate, decode_u32, encode_alpn, encode_client_certificate,
    ClientHello, ServerHello, SignedExtensions,
};
use super::state::{HandshakeStatus, Stage};
use crate::config::ClientConfig;
use crate::crypto::kex::{KeyExchange, KeyExchangeAlgorithm};
use crate::crypto::keys::{KeyFormat, PublicKey};
use crate::crypto::schedule::{
    early_data_cipher, KeySchedule, LABEL_C2S_IV, LABEL_C2S_KEY, LABEL_S2C_IV, LABEL_S2C_KEY,
};
use crate::crypto::suite::CipherSuite;
use crate::error::{MssError, Result};
use crate::extension::{
    encode_u32_list, ExtensionMap, APPLICATION_LAYER_PROTOCOL, CERTIFICATE, CERTIFICATE_REQUEST,
    PRE_SHARED_CERTIFICATE, SERVER_NAME, SESSION,
};
use crate::packet::{frame_packet, PacketType, HEADER_LEN};
use crate::session::{Session, MAX_SESSION_ID_LEN};

pub(super) struct ClientState {
    config: Arc<ClientConfig>,
    kex_algorithm: KeyExchangeAlgorithm,
    kex: Option<KeyExchange>,
    retried: bool,
    /// Exact client hello payload, kept for the transcript.
    client_hello: Option<Bytes>,
    /// Session id offered together with early data.
    early_session: Option<Vec<u8>>,
}

impl ClientState {
    pub fn new(config: Arc<ClientConfig>) -> Self {
        let kex_algorithm = config
            .settings
            .key_exchanges
            .first()
            .copied()
            .unwrap_or(KeyExchangeAlgorithm::X25519);
        Self {
            config,
            kex_algorithm,
            kex: None,
            retried: false,
            client_hello: None,
            early_session: None,
        }
    }

    pub fn clear(&mut self) {
        self.kex = None;
        self.client_hello = None;
        self.early_session = None;
    }

    #[cfg(test)]
    pub fn holds_secrets(&self) -> bool {
        self.kex.is_some() || self.client_hello.is_some()
    }
}

/// Sessions are cached under the server name the client dialed.
fn cache_key(config: &ClientConfig) -> Vec<u8> {
    config
        .settings
        .server_name
        .as_deref()
        .unwrap_or_default()
        .as_bytes()
        .to_vec()
}

pub(super) fn step(
    state: &mut ClientState,
    core: &mut Core,
    out: &mut BytesMut,
    input: &mut BytesMut,
) -> Result<HandshakeStatus> {
    match core.stage {
        Stage::Initial => write_client_hello(state, core, out),
        Stage::ServerHello => {
            let frame_len = match core.next_packet(input)? {
                Next::Incomplete(n) => return Ok(HandshakeStatus::NeedInput(n)),
                Next::Packet {
                    packet_type,
                    frame_len,
                } => {
                    if packet_type != PacketType::ServerHello as u8 {
                        return Err(MssError::illegal_packet(format!(
                            "expected server hello, got packet 0x{packet_type:02x}"
                        )));
                    }
                    frame_len
                }
            };
            let status = handle_server_hello(state, core, &input[HEADER_LEN..frame_len], out)?;
            input.advance(frame_len);
            Ok(status)
        }
        stage => Err(MssError::InvalidState(match stage {
            Stage::FinishWait => "client finish already sent",
            _ => "not a client stage",
        })),
    }
}

fn write_client_hello(
    state: &mut ClientState,
    core: &mut Core,
    out: &mut BytesMut,
) -> Result<HandshakeStatus> {
    let config = Arc::clone(&state.config);
    let settings = &config.settings;

    let random = core.random32();
    let mut randoms = Zeroizing::new([0u8; 64]);
    randoms[..32].copy_from_slice(&random);
    core.randoms = Some(randoms);

    let kex = KeyExchange::generate(state.kex_algorithm, &mut *core.rng);

    let mut extensions = ExtensionMap::new();
    if let Some(cache) = &config.session_cache {
        match cache.get(&cache_key(&config)) {
            // early data rides only on the first hello; a retry drops it
            Some(session) if !state.retried => {
                core.early = Some(early_data_cipher(session.suite, &random, &session.key[..])?);
                extensions.insert(SESSION, Bytes::from(session.id.clone()));
                state.early_session = Some(session.id.clone());
            }
            Some(session) => {
                extensions.insert(SESSION, Bytes::from(session.id.clone()));
            }
            None => {
                extensions.insert(SESSION, Bytes::new());
            }
        }
    }
    if !config.pre_shared.is_empty() {
        let mut ids: Vec<u32> = config.pre_shared.keys().copied().collect();
        ids.sort_unstable();
        extensions.insert(PRE_SHARED_CERTIFICATE, encode_u32_list(ids));
    }
    if let Some(name) = &settings.server_name {
        extensions.insert(SERVER_NAME, Bytes::copy_from_slice(name.as_bytes()));
    }
    if !settings.alpn.is_empty() {
        extensions.insert(APPLICATION_LAYER_PROTOCOL, encode_alpn(&settings.alpn));
    }

    let hello = ClientHello {
        random,
        cipher_suites: settings.cipher_suites.clone(),
        key_exchange: state.kex_algorithm.id(),
        key_share: kex.public_key().to_vec(),
        certificate_formats: KeyFormat::bitmap(&settings.certificate_formats),
        extensions,
    };
    let payload = hello.encode()?.freeze();
    let packet = frame_packet(PacketType::ClientHello, &payload)?;
    debug!(
        kex = ?state.kex_algorithm,
        retry = state.retried,
        early_data = core.early.is_some(),
        len = payload.len(),
        "client hello"
    );
    state.client_hello = Some(payload);
    state.kex = Some(kex);
    Ok(core.emit(out, packet, Stage::ServerHello))
}

fn handle_server_hello(
    state: &mut ClientState,
    core: &mut Core,
    payload: &[u8],
    out: &mut BytesMut,
) -> Result<HandshakeStatus> {
    let config = Arc::clone(&state.config);
    let settings = &config.settings;

    let (head_len, server_random, suite_id, key_share, sealed) = match ServerHello::decode(payload)? {
        ServerHello::Retry(retry) => {
            if state.retried {
                return Err(MssError::illegal_param("second hello retry"));
            }
            state.retried = true;
            let choice = KeyExchangeAlgorithm::select(&settings.key_exchanges, retry.key_exchanges)
                .into_iter()
                .next()
                .ok_or_else(|| MssError::negotiation_failed("no common key exchange"))?;
            debug!(from = ?state.kex_algorithm, to = ?choice, "hello retry");
            state.kex_algorithm = choice;
            state.kex = None;
            state.early_session = None;
            core.early = None;
            core.enter(Stage::Initial);
            return write_client_hello(state, core, out);
        }
        ServerHello::Hello {
            head_len,
            random,
            cipher_suite,
            key_share,
            sealed,
        } => (head_len, random, cipher_suite, key_share, sealed),
    };

    let suite = CipherSuite::from_wire_id(suite_id)
        .filter(|s| settings.cipher_suites.contains(&s.wire_id()))
        .ok_or_else(|| {
            MssError::illegal_param(format!("cipher suite 0x{suite_id:04x} was not offered"))
        })?;

    // key schedule
    let kex = state
        .kex
        .take()
        .ok_or(MssError::InvalidState("no key exchange in flight"))?;
    let secret = kex.agree(key_share)?;
    let randoms = core
        .randoms
        .as_mut()
        .ok_or(MssError::InvalidState("hello randoms not available"))?;
    randoms[32..].copy_from_slice(&server_random);
    let schedule = KeySchedule::new(suite.hash(), &randoms[..], &secret)?;
    drop(secret);
    core.encoder = Some(schedule.record_cipher(suite.aead(), LABEL_C2S_KEY, LABEL_C2S_IV)?);
    let mut decoder = schedule.record_cipher(suite.aead(), LABEL_S2C_KEY, LABEL_S2C_IV)?;
    core.schedule = Some(schedule);
    core.suite = Some(suite);

    let plaintext = Zeroizing::new(decoder.open(sealed, b"")?);
    core.decoder = Some(decoder);
    let early_sent = core.early.take().is_some();

    let SignedExtensions {
        mut extensions,
        encoded,
        signature,
    } = SignedExtensions::decode(&plaintext)?;
    let mut response = ExtensionMap::new();

    if let Some(request) = extensions.remove(CERTIFICATE_REQUEST) {
        let formats = decode_u32(&request, "certificate request")?;
        let key_pair = config
            .certificates
            .iter()
            .find(|kp| formats & kp.format().bit() != 0)
            .ok_or_else(|| MssError::negotiation_failed("no client certificate in a requested format"))?;
        let proof = key_pair.sign(core.randoms()?);
        response.insert(
            CERTIFICATE,
            encode_client_certificate(&proof, key_pair.format().id(), key_pair.public_key().encoded()),
        );
    }

    let server_key = match (
        extensions.remove(PRE_SHARED_CERTIFICATE),
        extensions.remove(CERTIFICATE),
    ) {
        (Some(_), Some(_)) => {
            return Err(MssError::illegal_param(
                "both certificate and pre-shared certificate",
            ))
        }
        (Some(psc), None) => {
            let id = decode_u32(&psc, "pre-shared certificate")?;
            config.pre_shared.get(&id).cloned().ok_or_else(|| {
                MssError::illegal_param(format!("unknown pre-shared certificate {id}"))
            })?
        }
        (None, cert) => {
            if settings.psc_only {
                return Err(MssError::negotiation_failed("pre-shared certificate required"));
            }
            let cert = cert.ok_or_else(|| MssError::illegal_param("certificate missing"))?;
            let (format_id, encoded) = decode_certificate(&cert)?;
            let format = KeyFormat::from_id(format_id)
                .filter(|f| settings.certificate_formats.contains(f))
                .ok_or_else(|| {
                    MssError::negotiation_failed(format!("unsupported certificate format {format_id}"))
                })?;
            let key = PublicKey::from_bytes(format, encoded)
                .map_err(|_| MssError::illegal_param("malformed certificate"))?;
            config
                .verifier
                .verify(&key)
                .map_err(|_| MssError::illegal_param("untrusted certificate"))?;
            key
        }
    };

    let client_hello = state
        .client_hello
        .take()
        .ok_or(MssError::InvalidState("client hello not recorded"))?;
    let digest = core.schedule()?.transcript_mac(&[
        &client_hello[..],
        &[0u8; 32][..],
        &payload[..head_len],
        encoded,
    ])?;
    server_key.verify(&digest, signature)?;

    if let Some(alpn) = extensions.remove(APPLICATION_LAYER_PROTOCOL) {
        let mut chosen = decode_alpn(&alpn)?;
        if chosen.len() != 1 || !settings.alpn.contains(&chosen[0]) {
            return Err(MssError::illegal_param("server chose an alpn protocol that was not offered"));
        }
        core.alpn = chosen.pop();
    }

    if let Some(cache) = &config.session_cache {
        let key = cache_key(&config);
        match extensions.remove(SESSION) {
            Some(id) if !id.is_empty() && id.len() <= MAX_SESSION_ID_LEN => {
                core.early_data_accepted =
                    early_sent && state.early_session.as_deref() == Some(&id[..]);
                let session = Session::new(id.to_vec(), core.schedule()?.session_key()?, suite);
                core.session_store = Some(SessionStore {
                    cache: Arc::clone(cache),
                    key,
                    session,
                });
            }
            Some(_) => return Err(MssError::illegal_param("malformed session id")),
            None => cache.remove(&key),
        }
    }

    core.peer_certificate = Some(server_key);
    debug!(suite = %suite, respond = !response.is_empty(), "server hello verified");

    if response.is_empty() {
        core.enter(Stage::Done);
        return Ok(HandshakeStatus::Done);
    }
    let mut encoded_response = BytesMut::new();
    response.encode(&mut encoded_response)?;
    let sealed = core
        .encoder
        .as_mut()
        .ok_or(MssError::InvalidState("no encoder"))?
        .seal(&encoded_response, b"")?;
    let packet = frame_packet(PacketType::EncryptedExtension, &sealed)?;
    core.enter(Stage::FinishWait);
    Ok(core.emit(out, packet, Stage::Done))
}
