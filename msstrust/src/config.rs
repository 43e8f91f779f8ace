//! Engine configuration.
//!
//! [`HandshakeSettings`] holds the serializable negotiation policy and can be
//! loaded from JSON. [`ClientConfig`] and [`ServerConfig`] add the runtime
//! credentials: key pairs, pre-shared certificates, the trust verifier and an
//! optional session cache.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::crypto::kex::KeyExchangeAlgorithm;
use crate::crypto::keys::{AcceptAnyKey, CertificateVerifier, KeyFormat, KeyPair, PublicKey};
use crate::crypto::suite::CipherSuite;
use crate::error::{MssError, Result};
use crate::session::SessionCache;

/// Negotiation policy shared by both roles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HandshakeSettings {
    /// Cipher-suite wire ids in preference order.
    pub cipher_suites: Vec<u16>,
    /// Key exchanges in preference order; a client offers the first one.
    pub key_exchanges: Vec<KeyExchangeAlgorithm>,
    /// Certificate formats this side accepts from its peer.
    pub certificate_formats: Vec<KeyFormat>,
    /// Refuse to run without a pre-shared certificate.
    pub psc_only: bool,
    /// Server only: request and verify a client certificate.
    pub verify_client: bool,
    /// Client only: name sent in the `server_name` extension.
    pub server_name: Option<String>,
    /// Application protocols in preference order.
    pub alpn: Vec<String>,
}

impl Default for HandshakeSettings {
    fn default() -> Self {
        Self {
            cipher_suites: CipherSuite::ALL.iter().map(|s| s.wire_id()).collect(),
            key_exchanges: KeyExchangeAlgorithm::ALL.to_vec(),
            certificate_formats: KeyFormat::ALL.to_vec(),
            psc_only: false,
            verify_client: false,
            server_name: None,
            alpn: Vec::new(),
        }
    }
}

impl HandshakeSettings {
    pub fn from_json(json: &str) -> Result<Self> {
        let settings: Self =
            serde_json::from_str(json).map_err(|e| MssError::Config(format!("{e}")))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| MssError::Config(format!("{e}")))
    }

    /// Configured suites in preference order.
    pub fn suites(&self) -> Vec<CipherSuite> {
        self.cipher_suites
            .iter()
            .filter_map(|id| CipherSuite::from_wire_id(*id))
            .collect()
    }

    pub fn validate(&self) -> Result<()> {
        if self.cipher_suites.is_empty() {
            return Err(MssError::Config("no cipher suites configured".into()));
        }
        if let Some(id) = self
            .cipher_suites
            .iter()
            .find(|id| CipherSuite::from_wire_id(**id).is_none())
        {
            return Err(MssError::Config(format!("unknown cipher suite 0x{id:04x}")));
        }
        if self.cipher_suites.len() > u8::MAX as usize {
            return Err(MssError::Config("too many cipher suites".into()));
        }
        if self.key_exchanges.is_empty() {
            return Err(MssError::Config("no key exchange configured".into()));
        }
        if self.certificate_formats.is_empty() {
            return Err(MssError::Config("no certificate format configured".into()));
        }
        if let Some(name) = &self.server_name {
            if name.is_empty() || name.len() > u16::MAX as usize {
                return Err(MssError::Config("server name must be 1..=65535 bytes".into()));
            }
        }
        if let Some(proto) = self.alpn.iter().find(|p| p.is_empty() || p.len() > 255) {
            return Err(MssError::Config(format!(
                "alpn protocol {proto:?} must be 1..=255 bytes"
            )));
        }
        Ok(())
    }
}

/// Client credentials and policy.
pub struct ClientConfig {
    pub settings: HandshakeSettings,
    /// Decides whether the server's certificate is trusted.
    pub verifier: Arc<dyn CertificateVerifier>,
    /// Key pairs offered when the server requests a client certificate.
    pub certificates: Vec<Arc<KeyPair>>,
    /// Server certificates known in advance, by id.
    pub pre_shared: HashMap<u32, PublicKey>,
    pub session_cache: Option<Arc<dyn SessionCache>>,
}

impl ClientConfig {
    /// Settings plus a verifier that accepts any server key.
    pub fn new(settings: HandshakeSettings) -> Self {
        Self {
            settings,
            verifier: Arc::new(AcceptAnyKey),
            certificates: Vec::new(),
            pre_shared: HashMap::new(),
            session_cache: None,
        }
    }

    pub fn with_verifier(mut self, verifier: Arc<dyn CertificateVerifier>) -> Self {
        self.verifier = verifier;
        self
    }

    pub fn with_certificate(mut self, key_pair: Arc<KeyPair>) -> Self {
        self.certificates.push(key_pair);
        self
    }

    pub fn with_pre_shared(mut self, id: u32, key: PublicKey) -> Self {
        self.pre_shared.insert(id, key);
        self
    }

    pub fn with_session_cache(mut self, cache: Arc<dyn SessionCache>) -> Self {
        self.session_cache = Some(cache);
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.settings.validate()?;
        if self.settings.psc_only && self.pre_shared.is_empty() {
            return Err(MssError::Config(
                "psc_only requires at least one pre-shared certificate".into(),
            ));
        }
        Ok(())
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("settings", &self.settings)
            .field("verifier", &self.verifier)
            .field("certificates", &self.certificates.len())
            .field("pre_shared", &self.pre_shared.len())
            .field("session_cache", &self.session_cache.is_some())
            .finish()
    }
}

/// Server credentials and policy.
pub struct ServerConfig {
    pub settings: HandshakeSettings,
    /// Certificates offered to clients, in preference order.
    pub certificates: Vec<Arc<KeyPair>>,
    /// Certificates a client may reference by id instead of receiving them.
    pub pre_shared: HashMap<u32, Arc<KeyPair>>,
    /// Trust decision for client certificates when `verify_client` is set.
    pub client_verifier: Arc<dyn CertificateVerifier>,
    pub session_cache: Option<Arc<dyn SessionCache>>,
}

impl ServerConfig {
    pub fn new(settings: HandshakeSettings) -> Self {
        Self {
            settings,
            certificates: Vec::new(),
            pre_shared: HashMap::new(),
            client_verifier: Arc::new(AcceptAnyKey),
            session_cache: None,
        }
    }

    pub fn with_certificate(mut self, key_pair: Arc<KeyPair>) -> Self {
        self.certificates.push(key_pair);
        self
    }

    pub fn with_pre_shared(mut self, id: u32, key_pair: Arc<KeyPair>) -> Self {
        self.pre_shared.insert(id, key_pair);
        self
    }

    pub fn with_client_verifier(mut self, verifier: Arc<dyn CertificateVerifier>) -> Self {
        self.client_verifier = verifier;
        self
    }

    pub fn with_session_cache(mut self, cache: Arc<dyn SessionCache>) -> Self {
        self.session_cache = Some(cache);
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.settings.validate()?;
        if self.certificates.is_empty() && self.pre_shared.is_empty() {
            return Err(MssError::Config("server has no certificate".into()));
        }
        if self.settings.psc_only && self.pre_shared.is_empty() {
            return Err(MssError::Config(
                "psc_only requires at least one pre-shared certificate".into(),
            ));
        }
        Ok(())
    }
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("settings", &self.settings)
            .field("certificates", &self.certificates.len())
            .field("pre_shared", &self.pre_shared.len())
            .field("client_verifier", &self.client_verifier)
            .field("session_cache", &self.session_cache.is_some())
            .finish()
    }
}
