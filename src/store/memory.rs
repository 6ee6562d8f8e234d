//! In-memory session store
//!
//! Used in place of the document store when `fallback_memory` is set, and
//! handy for development and testing.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use super::SessionStore;
use crate::config::DEFAULT_TTL_SECS;
use crate::error::{SessionError, SessionResult};
use crate::policy::TtlPolicy;
use crate::session::SessionData;

struct StoredSession {
    data: SessionData,
    expires_at: DateTime<Utc>,
}

/// In-memory session store
///
/// Warning: This store is not suitable for production use because:
/// - Sessions are lost on server restart
/// - Sessions are not shared across multiple server instances
/// - Memory usage grows with number of sessions
pub struct MemoryStore {
    sessions: Arc<RwLock<HashMap<String, StoredSession>>>,
    prefix: String,
    policy: TtlPolicy,
}

impl MemoryStore {
    /// Create a new memory store with the default 14 day TTL
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            prefix: "sess:".to_string(),
            policy: TtlPolicy::new(DEFAULT_TTL_SECS, 0),
        }
    }

    /// Create a new memory store with a custom prefix
    pub fn with_prefix<S: Into<String>>(prefix: S) -> Self {
        Self {
            prefix: prefix.into(),
            ..Self::new()
        }
    }

    /// Set the TTL used for sessions without a cookie expiry
    pub fn with_ttl(mut self, ttl_secs: u64) -> Self {
        self.policy = TtlPolicy::new(ttl_secs, 0);
        self
    }

    /// Make a storage key from session ID
    fn make_key(&self, sid: &str) -> String {
        format!("{}{}", self.prefix, sid)
    }

    /// Clean up expired sessions
    pub fn cleanup_expired(&self) {
        let mut sessions = self.sessions.write();
        let now = Utc::now();
        sessions.retain(|_, stored| stored.expires_at > now);
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for MemoryStore {
    fn clone(&self) -> Self {
        Self {
            sessions: Arc::clone(&self.sessions),
            prefix: self.prefix.clone(),
            policy: self.policy,
        }
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn get(&self, sid: &str) -> SessionResult<Option<SessionData>> {
        let key = self.make_key(sid);
        let sessions = self.sessions.read();

        match sessions.get(&key) {
            Some(stored) if stored.expires_at > Utc::now() => Ok(Some(stored.data.clone())),
            _ => Ok(None),
        }
    }

    async fn set(&self, sid: &str, session: &SessionData) -> SessionResult<()> {
        let key = self.make_key(sid);
        let stored = StoredSession {
            data: session.clone(),
            expires_at: self.policy.expires_for(session, Utc::now()),
        };

        self.sessions.write().insert(key, stored);
        Ok(())
    }

    async fn destroy(&self, sid: &str) -> SessionResult<()> {
        let key = self.make_key(sid);
        self.sessions.write().remove(&key);
        Ok(())
    }

    async fn touch(&self, sid: &str, session: &SessionData) -> SessionResult<()> {
        let key = self.make_key(sid);
        let mut sessions = self.sessions.write();

        match sessions.get_mut(&key) {
            Some(stored) => {
                stored.expires_at = self.policy.expires_for(session, Utc::now());
                Ok(())
            }
            None => Err(SessionError::NotFound(sid.to_string())),
        }
    }

    async fn clear(&self) -> SessionResult<()> {
        self.sessions.write().clear();
        Ok(())
    }

    async fn length(&self) -> SessionResult<usize> {
        self.cleanup_expired();
        Ok(self.sessions.read().len())
    }

    async fn ids(&self) -> SessionResult<Vec<String>> {
        self.cleanup_expired();
        let sessions = self.sessions.read();
        let prefix_len = self.prefix.len();
        Ok(sessions
            .keys()
            .map(|k| k[prefix_len..].to_string())
            .collect())
    }

    async fn all(&self) -> SessionResult<Vec<SessionData>> {
        self.cleanup_expired();
        let sessions = self.sessions.read();
        Ok(sessions.values().map(|s| s.data.clone()).collect())
    }
}
