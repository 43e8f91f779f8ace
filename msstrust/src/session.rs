//! Resumable sessions and the cache they live in.

use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use zeroize::Zeroizing;

use crate::crypto::keys::hex;
use crate::crypto::schedule::SESSION_KEY_LEN;
use crate::crypto::suite::CipherSuite;

/// Longest session id accepted from a peer.
pub const MAX_SESSION_ID_LEN: usize = 32;

/// Length of ids minted by a server.
pub const SESSION_ID_LEN: usize = 16;

/// A resumption record: the secret a later connection uses to send early data.
#[derive(Clone)]
pub struct Session {
    pub id: Vec<u8>,
    pub key: Zeroizing<[u8; SESSION_KEY_LEN]>,
    pub suite: CipherSuite,
    /// Seconds since the UNIX epoch.
    pub created_at: u64,
}

impl Session {
    pub fn new(id: Vec<u8>, key: Zeroizing<[u8; SESSION_KEY_LEN]>, suite: CipherSuite) -> Self {
        Self {
            id,
            key,
            suite,
            created_at: now_secs(),
        }
    }

    /// Age relative to the system clock; zero if the clock went backwards.
    pub fn age(&self) -> Duration {
        Duration::from_secs(now_secs().saturating_sub(self.created_at))
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &hex(&self.id))
            .field("suite", &self.suite)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Shared store of resumable sessions.
///
/// Servers key entries by session id, clients by the server name they dialed.
pub trait SessionCache: Send + Sync {
    fn get(&self, key: &[u8]) -> Option<Session>;
    fn put(&self, key: &[u8], session: Session);
    fn remove(&self, key: &[u8]);
}

/// Bounded in-memory cache with lazy TTL expiry.
pub struct InMemorySessionCache {
    sessions: Mutex<HashMap<Vec<u8>, Session>>,
    max_size: usize,
    lifetime: Duration,
}

impl InMemorySessionCache {
    /// Default session lifetime: two hours.
    pub const DEFAULT_LIFETIME: Duration = Duration::from_secs(7200);

    pub fn new(max_size: usize) -> Self {
        Self::with_lifetime(max_size, Self::DEFAULT_LIFETIME)
    }

    /// A zero lifetime means entries never expire.
    pub fn with_lifetime(max_size: usize, lifetime: Duration) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            max_size,
            lifetime,
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }

    fn is_expired(&self, session: &Session) -> bool {
        !self.lifetime.is_zero() && session.age() > self.lifetime
    }

    /// Drop every expired entry.
    pub fn cleanup(&self) {
        if self.lifetime.is_zero() {
            return;
        }
        self.sessions.lock().retain(|_, s| s.age() <= self.lifetime);
    }
}

impl SessionCache for InMemorySessionCache {
    fn get(&self, key: &[u8]) -> Option<Session> {
        let mut sessions = self.sessions.lock();
        let expired = self.is_expired(sessions.get(key)?);
        if expired {
            sessions.remove(key);
            return None;
        }
        sessions.get(key).cloned()
    }

    fn put(&self, key: &[u8], session: Session) {
        if self.max_size == 0 {
            return;
        }
        let mut sessions = self.sessions.lock();
        if sessions.len() >= self.max_size && !sessions.contains_key(key) {
            // evict the oldest entry
            let oldest = sessions
                .iter()
                .min_by_key(|(_, s)| s.created_at)
                .map(|(k, _)| k.clone());
            if let Some(k) = oldest {
                sessions.remove(&k);
            }
        }
        sessions.insert(key.to_vec(), session);
    }

    fn remove(&self, key: &[u8]) {
        self.sessions.lock().remove(key);
    }
}

impl fmt::Debug for InMemorySessionCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemorySessionCache")
            .field("len", &self.len())
            .field("max_size", &self.max_size)
            .field("lifetime", &self.lifetime)
            .finish()
    }
}
