// Server side of the handshake.

use std::sync::Arc;

use bytes::{Buf, Bytes, BytesMut};
use rand::RngCore;
use tracing::{debug, trace};
use zeroize::Zeroizing;

use super::engine::{Core, Next, SessionStore};
use super::messages::{
    decode_alpn, decode_client_certificate, encode_alpn, encode_certificate, ClientHello,
    HelloRetry, ServerHelloHead, SignedExtensions,
};
use super::state::{HandshakeStatus, Stage};
use crate::config::ServerConfig;
use crate::crypto::kex::{KeyExchange, KeyExchangeAlgorithm};
use crate::crypto::keys::{KeyFormat, KeyPair, PublicKey};
use crate::crypto::schedule::{
    early_data_cipher, KeySchedule, LABEL_C2S_IV, LABEL_C2S_KEY, LABEL_S2C_IV, LABEL_S2C_KEY,
};
use crate::crypto::suite::CipherSuite;
use crate::error::{MssError, Result};
use crate::extension::{
    decode_u32_list, encode_u32_list, ExtensionMap, APPLICATION_LAYER_PROTOCOL, CERTIFICATE,
    CERTIFICATE_REQUEST, PRE_SHARED_CERTIFICATE, SERVER_NAME, SESSION,
};
use crate::packet::{frame_packet, PacketType, HEADER_LEN};
use crate::session::{Session, MAX_SESSION_ID_LEN, SESSION_ID_LEN};

pub(super) struct ServerState {
    config: Arc<ServerConfig>,
}

impl ServerState {
    pub fn new(config: Arc<ServerConfig>) -> Self {
        Self { config }
    }
}

pub(super) fn step(
    state: &mut ServerState,
    core: &mut Core,
    out: &mut BytesMut,
    input: &mut BytesMut,
) -> Result<HandshakeStatus> {
    let (packet_type, frame_len) = match core.next_packet(input)? {
        Next::Incomplete(n) => return Ok(HandshakeStatus::NeedInput(n)),
        Next::Packet {
            packet_type,
            frame_len,
        } => (packet_type, frame_len),
    };
    let payload = &input[HEADER_LEN..frame_len];
    let status = match (core.stage, PacketType::try_from(packet_type)) {
        (Stage::ClientHello | Stage::RetryKeyExchange, Ok(PacketType::ClientHello)) => {
            handle_client_hello(state, core, payload, out)?
        }
        (Stage::RetryKeyExchange, Ok(PacketType::PreData)) => {
            trace!("early data after hello retry discarded");
            HandshakeStatus::Ok
        }
        (Stage::PreflightWait, Ok(PacketType::PreData)) => match core.open_early(payload)? {
            Some(data) => HandshakeStatus::EarlyData(Bytes::from(data)),
            None => HandshakeStatus::Ok,
        },
        (Stage::PreflightWait, Ok(PacketType::EncryptedExtension)) => {
            handle_client_finish(state, core, payload)?
        }
        (stage, _) => {
            return Err(MssError::illegal_packet(format!(
                "unexpected packet 0x{packet_type:02x} in stage {}",
                stage.label()
            )))
        }
    };
    input.advance(frame_len);
    Ok(status)
}

fn handle_client_hello(
    state: &mut ServerState,
    core: &mut Core,
    payload: &[u8],
    out: &mut BytesMut,
) -> Result<HandshakeStatus> {
    let config = Arc::clone(&state.config);
    let settings = &config.settings;
    let hello = ClientHello::decode(payload)?;

    let ours = settings.suites();
    let suite = hello
        .cipher_suites
        .iter()
        .filter_map(|id| CipherSuite::from_wire_id(*id))
        .find(|s| ours.contains(s))
        .ok_or_else(|| MssError::negotiation_failed("no common cipher suite"))?;

    let Some(kex_algorithm) = KeyExchangeAlgorithm::from_id(hello.key_exchange)
        .filter(|a| settings.key_exchanges.contains(a))
    else {
        if core.stage == Stage::RetryKeyExchange {
            return Err(MssError::illegal_param(format!(
                "key exchange {} still unsupported after hello retry",
                hello.key_exchange
            )));
        }
        debug!(offered = hello.key_exchange, "unsupported key exchange, sending hello retry");
        let retry = HelloRetry {
            key_exchanges: KeyExchangeAlgorithm::bitmap(&settings.key_exchanges),
        };
        let packet = frame_packet(PacketType::ServerHello, &retry.encode())?;
        return Ok(core.emit(out, packet, Stage::RetryKeyExchange));
    };

    // key schedule
    let kex = KeyExchange::generate(kex_algorithm, &mut *core.rng);
    let key_share = kex.public_key().to_vec();
    let secret = kex.agree(&hello.key_share)?;
    let server_random = core.random32();
    let mut randoms = Zeroizing::new([0u8; 64]);
    randoms[..32].copy_from_slice(&hello.random);
    randoms[32..].copy_from_slice(&server_random);
    let schedule = KeySchedule::new(suite.hash(), &randoms[..], &secret)?;
    drop(secret);
    let mut encoder = schedule.record_cipher(suite.aead(), LABEL_S2C_KEY, LABEL_S2C_IV)?;
    let decoder = schedule.record_cipher(suite.aead(), LABEL_C2S_KEY, LABEL_C2S_IV)?;

    let mut ext_in = hello.extensions;
    let mut ext_out = ExtensionMap::new();

    // session lookup; an unknown or empty id gets a fresh session
    if let Some(cache) = &config.session_cache {
        if let Some(id) = ext_in.remove(SESSION) {
            if id.len() > MAX_SESSION_ID_LEN {
                return Err(MssError::illegal_param("session id too long"));
            }
            let resumed = if id.is_empty() { None } else { cache.get(&id) };
            let session_id = match resumed {
                Some(session) => {
                    core.early = Some(early_data_cipher(
                        session.suite,
                        &hello.random,
                        &session.key[..],
                    )?);
                    debug!(session = ?session, "resuming session");
                    session.id.clone()
                }
                None => {
                    let mut fresh = vec![0u8; SESSION_ID_LEN];
                    core.rng.fill_bytes(&mut fresh);
                    fresh
                }
            };
            ext_out.insert(SESSION, Bytes::from(session_id.clone()));
            core.session_store = Some(SessionStore {
                cache: Arc::clone(cache),
                key: session_id.clone(),
                session: Session::new(session_id, schedule.session_key()?, suite),
            });
        }
    }

    // credential: a pre-shared certificate the client knows, else a full one
    let mut key_pair: Option<Arc<KeyPair>> = None;
    if !config.pre_shared.is_empty() {
        if let Some(offer) = ext_in.remove(PRE_SHARED_CERTIFICATE) {
            for id in decode_u32_list(&offer)? {
                if let Some(kp) = config.pre_shared.get(&id) {
                    ext_out.insert(PRE_SHARED_CERTIFICATE, encode_u32_list([id]));
                    key_pair = Some(Arc::clone(kp));
                    break;
                }
            }
        }
    }
    let key_pair = match key_pair {
        Some(kp) => kp,
        None => {
            if settings.psc_only {
                return Err(MssError::negotiation_failed("pre-shared certificate required"));
            }
            let kp = config
                .certificates
                .iter()
                .find(|kp| hello.certificate_formats & kp.format().bit() != 0)
                .ok_or_else(|| {
                    MssError::negotiation_failed("no certificate in a format the client accepts")
                })?;
            ext_out.insert(
                CERTIFICATE,
                encode_certificate(kp.format().id(), kp.public_key().encoded()),
            );
            Arc::clone(kp)
        }
    };

    if settings.verify_client {
        let formats = KeyFormat::bitmap(&settings.certificate_formats);
        ext_out.insert(CERTIFICATE_REQUEST, Bytes::copy_from_slice(&formats.to_be_bytes()));
    }

    if let Some(offer) = ext_in.remove(APPLICATION_LAYER_PROTOCOL) {
        let offered = decode_alpn(&offer)?;
        if let Some(proto) = settings.alpn.iter().find(|p| offered.contains(*p)) {
            ext_out.insert(APPLICATION_LAYER_PROTOCOL, encode_alpn(&[proto]));
            core.alpn = Some(proto.clone());
        }
    }

    if let Some(name) = ext_in.remove(SERVER_NAME) {
        let name = String::from_utf8(name.to_vec())
            .map_err(|_| MssError::illegal_param("server name is not UTF-8"))?;
        core.server_name = Some(name);
    }

    // sign and seal
    let head = ServerHelloHead {
        random: server_random,
        cipher_suite: suite.wire_id(),
        key_share,
    }
    .encode();
    let mut ext_bytes = BytesMut::new();
    ext_out.encode(&mut ext_bytes)?;
    let digest = schedule.transcript_mac(&[payload, &[0u8; 32][..], &head[..], &ext_bytes[..]])?;
    let signature = key_pair.sign(&digest);
    let plaintext = Zeroizing::new(SignedExtensions::encode(&ext_bytes, &signature).to_vec());
    let sealed = encoder.seal(&plaintext, b"")?;

    let mut body = head;
    body.extend_from_slice(&sealed);
    let packet = frame_packet(PacketType::ServerHello, &body)?;

    core.suite = Some(suite);
    core.randoms = Some(randoms);
    core.schedule = Some(schedule);
    core.encoder = Some(encoder);
    core.decoder = Some(decoder);

    let then = if settings.verify_client {
        Stage::PreflightWait
    } else {
        Stage::Done
    };
    debug!(
        suite = %suite,
        kex = ?kex_algorithm,
        psc = ext_out.contains(PRE_SHARED_CERTIFICATE),
        resumed = core.early.is_some(),
        "server hello"
    );
    Ok(core.emit(out, packet, then))
}

fn handle_client_finish(
    state: &mut ServerState,
    core: &mut Core,
    payload: &[u8],
) -> Result<HandshakeStatus> {
    let config = Arc::clone(&state.config);
    let settings = &config.settings;
    core.enter(Stage::FinishWait);

    let plaintext = Zeroizing::new(
        core.decoder
            .as_mut()
            .ok_or(MssError::InvalidState("no decoder"))?
            .open(payload, b"")?,
    );
    core.early = None;

    let mut extensions = ExtensionMap::decode(&plaintext)?;
    let cert = extensions
        .remove(CERTIFICATE)
        .ok_or_else(|| MssError::illegal_param("client certificate missing"))?;
    let (proof, format_id, encoded) = decode_client_certificate(&cert)?;
    let format = KeyFormat::from_id(format_id)
        .filter(|f| settings.certificate_formats.contains(f))
        .ok_or_else(|| {
            MssError::negotiation_failed(format!("unsupported client certificate format {format_id}"))
        })?;
    let key = PublicKey::from_bytes(format, encoded)
        .map_err(|_| MssError::illegal_param("malformed client certificate"))?;
    config
        .client_verifier
        .verify(&key)
        .map_err(|_| MssError::illegal_param("untrusted client certificate"))?;
    key.verify(core.randoms()?, proof)?;

    core.peer_certificate = Some(key);
    core.enter(Stage::Done);
    Ok(HandshakeStatus::Done)
}
