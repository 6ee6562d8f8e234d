//! Session store trait

use async_trait::async_trait;

use crate::error::{SessionError, SessionResult};
use crate::session::SessionData;

/// Capability set a session middleware needs from its persistence backend.
///
/// Mirrors the express-session store interface. Expiry is derived by the
/// store from the session's cookie (or the store's own TTL), so callers only
/// pass the session object.
#[async_trait]
pub trait SessionStore: Send + Sync + 'static {
    /// Get a session by ID
    ///
    /// Returns None if the session doesn't exist or has expired
    async fn get(&self, sid: &str) -> SessionResult<Option<SessionData>>;

    /// Create or replace a session
    async fn set(&self, sid: &str, session: &SessionData) -> SessionResult<()>;

    /// Destroy/delete a session
    async fn destroy(&self, sid: &str) -> SessionResult<()>;

    /// Touch a session - refresh its expiry without rewriting the data
    ///
    /// This is called when the session is accessed but not modified
    async fn touch(&self, sid: &str, session: &SessionData) -> SessionResult<()>;

    /// Clear all sessions (optional)
    async fn clear(&self) -> SessionResult<()> {
        Err(SessionError::StoreError("clear not implemented".to_string()))
    }

    /// Get the count of all sessions (optional)
    async fn length(&self) -> SessionResult<usize> {
        Err(SessionError::StoreError("length not implemented".to_string()))
    }

    /// Get all live session IDs (optional)
    async fn ids(&self) -> SessionResult<Vec<String>> {
        Err(SessionError::StoreError("ids not implemented".to_string()))
    }

    /// Get all live sessions (optional)
    async fn all(&self) -> SessionResult<Vec<SessionData>> {
        Err(SessionError::StoreError("all not implemented".to_string()))
    }
}
