// Engine: the per-connection handshake and record state machine.
//
// The role-specific transitions live in `client.rs` and `server.rs`; both
// operate on the shared `Core`, which owns the key schedule, the two
// directional ciphers, the pending write and the outgoing alert.

use std::sync::Arc;

use bytes::{Buf, Bytes, BytesMut};
use rand::rngs::OsRng;
use rand::RngCore;
use tracing::{debug, info, trace, warn};
use zeroize::Zeroizing;

use super::client::{self, ClientState};
use super::server::{self, ServerState};
use super::state::{HandshakeStatus, Stage};
use crate::alert::{split_tag, Alert, ErrorCode};
use crate::config::{ClientConfig, ServerConfig};
use crate::crypto::aead::RecordCipher;
use crate::crypto::keys::{hex, PublicKey};
use crate::crypto::schedule::KeySchedule;
use crate::crypto::suite::CipherSuite;
use crate::crypto::SecureRandom;
use crate::error::{MssError, Result};
use crate::packet::{peek_packet, writable, PacketType, Peek, HEADER_LEN};
use crate::session::{Session, SessionCache};

/// A packet that did not fit the caller's output buffer, and the stage to
/// enter once it has been written.
struct Pending {
    packet: Bytes,
    then: Stage,
}

/// A session to publish in the cache when the handshake completes.
pub(super) struct SessionStore {
    pub cache: Arc<dyn SessionCache>,
    pub key: Vec<u8>,
    pub session: Session,
}

/// What the head of the input holds.
pub(super) enum Next {
    Packet { packet_type: u8, frame_len: usize },
    Incomplete(usize),
}

/// State shared by both roles.
pub(super) struct Core {
    pub client: bool,
    pub stage: Stage,
    pub suite: Option<CipherSuite>,
    /// `client_random || server_random`; dropped once the handshake is done.
    pub randoms: Option<Zeroizing<[u8; 64]>>,
    pub schedule: Option<KeySchedule>,
    pub encoder: Option<RecordCipher>,
    pub decoder: Option<RecordCipher>,
    /// Early-data cipher: encoder on a client, decoder on a server.
    pub early: Option<RecordCipher>,
    pub early_data_accepted: bool,
    pending: Option<Pending>,
    pending_alert: Option<Alert>,
    pub peer_certificate: Option<PublicKey>,
    pub server_name: Option<String>,
    pub alpn: Option<String>,
    pub session: Option<Session>,
    pub session_store: Option<SessionStore>,
    pub rng: Box<dyn SecureRandom>,
}

impl Core {
    fn new(client: bool, stage: Stage) -> Self {
        Self {
            client,
            stage,
            suite: None,
            randoms: None,
            schedule: None,
            encoder: None,
            decoder: None,
            early: None,
            early_data_accepted: false,
            pending: None,
            pending_alert: None,
            peer_certificate: None,
            server_name: None,
            alpn: None,
            session: None,
            session_store: None,
            rng: Box::new(OsRng),
        }
    }

    fn role(&self) -> &'static str {
        if self.client {
            "client"
        } else {
            "server"
        }
    }

    pub fn random32(&mut self) -> [u8; 32] {
        let mut out = [0u8; 32];
        self.rng.fill_bytes(&mut out);
        out
    }

    pub fn randoms(&self) -> Result<&[u8; 64]> {
        self.randoms
            .as_deref()
            .ok_or(MssError::InvalidState("hello randoms not available"))
    }

    pub fn schedule(&self) -> Result<&KeySchedule> {
        self.schedule
            .as_ref()
            .ok_or(MssError::InvalidState("key schedule not derived"))
    }

    pub fn enter(&mut self, stage: Stage) {
        debug!(
            role = self.role(),
            from = self.stage.label(),
            to = stage.label(),
            "stage transition"
        );
        self.stage = stage;
        if stage == Stage::Done {
            self.complete();
        }
    }

    fn complete(&mut self) {
        self.randoms = None;
        if let Some(store) = self.session_store.take() {
            store.cache.put(&store.key, store.session.clone());
            self.session = Some(store.session);
        }
        let peer = self
            .peer_certificate
            .as_ref()
            .map(|k| hex(&k.fingerprint()[..8]))
            .unwrap_or_default();
        info!(
            role = self.role(),
            suite = ?self.suite,
            peer = %peer,
            early_data = self.early_data_accepted,
            "handshake complete"
        );
    }

    /// Write `packet` if it fits, otherwise park it. Either way `then` is
    /// entered once the packet is out.
    pub fn emit(&mut self, out: &mut BytesMut, packet: BytesMut, then: Stage) -> HandshakeStatus {
        let room = writable(out);
        if packet.len() <= room {
            out.extend_from_slice(&packet);
            self.enter(then);
            if then == Stage::Done {
                HandshakeStatus::Done
            } else {
                HandshakeStatus::Ok
            }
        } else {
            let need = packet.len() - room;
            trace!(role = self.role(), need, "output buffer too small, packet parked");
            self.pending = Some(Pending {
                packet: packet.freeze(),
                then,
            });
            HandshakeStatus::NeedOutput(need)
        }
    }

    fn flush_pending(&mut self, out: &mut BytesMut) -> Option<HandshakeStatus> {
        let pending = self.pending.as_ref()?;
        let room = writable(out);
        if pending.packet.len() > room {
            let need = pending.packet.len() - room;
            trace!(role = self.role(), need, "pending packet still does not fit");
            return Some(HandshakeStatus::NeedOutput(need));
        }
        let pending = self.pending.take()?;
        out.extend_from_slice(&pending.packet);
        self.enter(pending.then);
        Some(if pending.then == Stage::Done {
            HandshakeStatus::Done
        } else {
            HandshakeStatus::Ok
        })
    }

    /// Look for one complete packet. Alerts are consumed and turned into the
    /// peer's error here so neither role has to handle them.
    pub fn next_packet(&mut self, input: &mut BytesMut) -> Result<Next> {
        match peek_packet(input) {
            Peek::Incomplete(n) => {
                trace!(role = self.role(), need = n, "waiting for more input");
                Ok(Next::Incomplete(n))
            }
            Peek::Complete {
                packet_type,
                frame_len,
            } => {
                if packet_type == PacketType::Alert as u8 {
                    let err = self.read_alert(&input[HEADER_LEN..frame_len]);
                    input.advance(frame_len);
                    return Err(err);
                }
                Ok(Next::Packet {
                    packet_type,
                    frame_len,
                })
            }
        }
    }

    /// Decode a peer alert, checking its tag if we have a key schedule.
    fn read_alert(&self, payload: &[u8]) -> MssError {
        let alert = match Alert::decode(payload) {
            Ok(alert) => alert,
            Err(err) => return err,
        };
        let authenticated = match (&self.schedule, split_tag(payload)) {
            (Some(schedule), Ok((signed, tag))) if !tag.is_empty() => {
                schedule.verify_alert_tag(signed, tag)
            }
            _ => false,
        };
        debug!(
            role = self.role(),
            code = alert.code,
            reason = %alert.reason,
            authenticated,
            "peer alert received"
        );
        alert.into_error(authenticated)
    }

    /// Open one early-data record; `None` if there is no resumed session.
    pub fn open_early(&mut self, sealed: &[u8]) -> Result<Option<Vec<u8>>> {
        let Some(early) = self.early.as_mut() else {
            trace!(role = self.role(), len = sealed.len(), "early data discarded");
            return Ok(None);
        };
        let plain = early.open(sealed, b"")?;
        self.early_data_accepted = true;
        Ok(Some(plain))
    }

    /// Move to `Fail`: build the outgoing alert (tagged if keys exist), then
    /// destroy every secret.
    pub fn fail(&mut self, err: &MssError) {
        if self.stage.is_terminal() {
            return;
        }
        if err.should_notify() {
            let mut alert = Alert::from(err);
            if let Some(schedule) = &self.schedule {
                alert.tag = schedule.alert_tag(&alert.signed_payload()).ok();
            }
            warn!(
                role = self.role(),
                stage = self.stage.label(),
                code = alert.code,
                reason = %alert.reason,
                "handshake failed, alert queued"
            );
            self.pending_alert = Some(alert);
        } else {
            debug!(role = self.role(), stage = self.stage.label(), error = %err, "engine failed");
        }
        self.clear_secrets();
        self.stage = Stage::Fail;
    }

    fn clear_secrets(&mut self) {
        self.randoms = None;
        self.schedule = None;
        self.encoder = None;
        self.decoder = None;
        self.early = None;
        self.pending = None;
        self.session_store = None;
        self.session = None;
    }

    fn check_alive(&self) -> Result<()> {
        match self.stage {
            Stage::Fail => Err(MssError::Failed),
            Stage::Closed => Err(MssError::Closed),
            _ => Ok(()),
        }
    }
}

enum Role {
    Client(ClientState),
    Server(ServerState),
}

impl Role {
    /// Drop the ephemeral key share and transcript material held mid-handshake.
    fn clear(&mut self) {
        if let Role::Client(state) = self {
            state.clear();
        }
    }
}

/// One side of an MSS connection.
pub struct Engine {
    role: Role,
    core: Core,
}

impl Engine {
    /// A client engine. The configuration is validated here.
    pub fn client(config: Arc<ClientConfig>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            role: Role::Client(ClientState::new(config)),
            core: Core::new(true, Stage::Initial),
        })
    }

    /// A server engine. The configuration is validated here.
    pub fn server(config: Arc<ServerConfig>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            role: Role::Server(ServerState::new(config)),
            core: Core::new(false, Stage::ClientHello),
        })
    }

    /// Replace the OS random source, e.g. with a seeded generator in tests.
    pub fn with_rng(mut self, rng: impl SecureRandom + 'static) -> Self {
        self.core.rng = Box::new(rng);
        self
    }

    /// Advance the handshake.
    ///
    /// `out`'s spare capacity bounds what may be written. Bytes are taken from
    /// `input` only once a whole packet has been processed.
    pub fn handshake(&mut self, out: &mut BytesMut, input: &mut BytesMut) -> Result<HandshakeStatus> {
        self.core.check_alive()?;
        if let Some(status) = self.core.flush_pending(out) {
            return Ok(status);
        }
        if self.core.stage == Stage::Done {
            return Ok(HandshakeStatus::Done);
        }
        let result = match &mut self.role {
            Role::Client(state) => client::step(state, &mut self.core, out, input),
            Role::Server(state) => server::step(state, &mut self.core, out, input),
        };
        result.map_err(|err| {
            self.fail(&err);
            err
        })
    }

    /// Seal one application record.
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>> {
        self.core.check_alive()?;
        if !self.may_send_message() {
            return Err(MssError::InvalidState("handshake not complete"));
        }
        let encoder = self
            .core
            .encoder
            .as_mut()
            .ok_or(MssError::InvalidState("no encoder"))?;
        let sealed = encoder.seal(plaintext, b"");
        sealed.map_err(|err| {
            self.fail(&err);
            err
        })
    }

    /// Open one application record.
    pub fn decrypt(&mut self, sealed: &[u8]) -> Result<Vec<u8>> {
        self.core.check_alive()?;
        if !matches!(self.core.stage, Stage::Done | Stage::FinishWait) {
            return Err(MssError::InvalidState("handshake not complete"));
        }
        let decoder = self
            .core
            .decoder
            .as_mut()
            .ok_or(MssError::InvalidState("no decoder"))?;
        let opened = decoder.open(sealed, b"");
        let opened = opened.map_err(|err| {
            self.fail(&err);
            err
        })?;
        // the peer has switched to the handshake keys; early data is over
        if !self.core.client {
            self.core.early = None;
        }
        Ok(opened)
    }

    /// Whether a resumed session lets this client send early data now. Only
    /// true once the client hello has been written, so early data never
    /// precedes it on the wire.
    pub fn sends_early_data(&self) -> bool {
        self.core.client && self.core.early.is_some() && self.core.stage == Stage::ServerHello
    }

    /// Client: seal early data under the resumption key.
    pub fn encrypt_early(&mut self, plaintext: &[u8]) -> Result<Vec<u8>> {
        self.core.check_alive()?;
        if !self.core.client {
            return Err(MssError::InvalidState("only a client sends early data"));
        }
        if self.core.stage != Stage::ServerHello {
            return Err(MssError::InvalidState("client hello not written yet"));
        }
        let early = self
            .core
            .early
            .as_mut()
            .ok_or(MssError::InvalidState("no resumable session"))?;
        let sealed = early.seal(plaintext, b"");
        sealed.map_err(|err| {
            self.fail(&err);
            err
        })
    }

    /// Server: open early data. `Ok(None)` means the session was unknown and
    /// the data is discarded.
    pub fn decrypt_early(&mut self, sealed: &[u8]) -> Result<Option<Vec<u8>>> {
        self.core.check_alive()?;
        if self.core.client {
            return Err(MssError::InvalidState("only a server receives early data"));
        }
        let opened = self.core.open_early(sealed);
        opened.map_err(|err| {
            self.fail(&err);
            err
        })
    }

    /// Process an alert payload received from the peer. The engine fails
    /// without queuing an alert of its own; the peer's error is returned.
    pub fn receive_alert(&mut self, payload: &[u8]) -> MssError {
        let err = self.core.read_alert(payload);
        if !self.core.stage.is_terminal() {
            self.core.clear_secrets();
            self.role.clear();
            self.core.stage = Stage::Fail;
        }
        err
    }

    /// The alert queued by the last fatal error, if any. Taken at most once.
    pub fn take_alert(&mut self) -> Option<Alert> {
        self.core.pending_alert.take()
    }

    /// Fail the engine on behalf of the caller (e.g. an unknown record type).
    pub fn abort(&mut self, code: ErrorCode, reason: &str) -> MssError {
        let err = MssError::protocol(code, reason);
        self.fail(&err);
        err
    }

    /// Irreversibly destroy all key material and any pending output.
    pub fn close(&mut self) {
        if self.core.stage != Stage::Closed {
            debug!(role = self.core.role(), from = self.core.stage.label(), "engine closed");
        }
        self.core.clear_secrets();
        self.role.clear();
        self.core.stage = Stage::Closed;
    }

    fn fail(&mut self, err: &MssError) {
        self.core.fail(err);
        self.role.clear();
    }

    /// Keying material bound to this handshake, for use by the application.
    pub fn export_keying_material(&self, label: &[u8], len: usize) -> Result<Vec<u8>> {
        self.core.check_alive()?;
        if self.core.stage != Stage::Done {
            return Err(MssError::InvalidState("handshake not complete"));
        }
        self.core.schedule()?.export(label, len)
    }

    // ── Accessors ──────────────────────────────────────────────────────

    pub fn is_client_mode(&self) -> bool {
        self.core.client
    }

    pub fn stage(&self) -> Stage {
        self.core.stage
    }

    pub fn is_handshake_done(&self) -> bool {
        self.core.stage == Stage::Done
    }

    pub fn may_send_message(&self) -> bool {
        self.core.stage == Stage::Done && self.core.encoder.is_some()
    }

    pub fn cipher_suite(&self) -> Option<CipherSuite> {
        self.core.suite
    }

    pub fn peer_certificate(&self) -> Option<&PublicKey> {
        self.core.peer_certificate.as_ref()
    }

    pub fn server_name(&self) -> Option<&str> {
        self.core.server_name.as_deref()
    }

    pub fn alpn(&self) -> Option<&str> {
        self.core.alpn.as_deref()
    }

    pub fn early_data_accepted(&self) -> bool {
        self.core.early_data_accepted
    }

    pub fn session(&self) -> Option<&Session> {
        self.core.session.as_ref()
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("role", &self.core.role())
            .field("stage", &self.core.stage)
            .field("suite", &self.core.suite)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
impl Engine {
    /// Whether any key material or ephemeral secret is still held.
    pub(crate) fn holds_secrets(&self) -> bool {
        let core = &self.core;
        let role = match &self.role {
            Role::Client(state) => state.holds_secrets(),
            Role::Server(_) => false,
        };
        role || core.randoms.is_some()
            || core.schedule.is_some()
            || core.encoder.is_some()
            || core.decoder.is_some()
            || core.early.is_some()
            || core.session.is_some()
            || core.session_store.is_some()
    }
}
