//! Session error types

use thiserror::Error;

/// Result type for session store operations
pub type SessionResult<T> = Result<T, SessionError>;

/// Errors that can occur during session store operations
#[derive(Debug, Error)]
pub enum SessionError {
    /// Invalid store configuration, raised while constructing the store
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// The backing store could not be reached or resolved
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// The store's connection attempt failed; no operation can run
    #[error("Session store is disconnected")]
    Disconnected,

    /// Payload encryption or decryption failed
    #[error("Crypto error: {0}")]
    CryptoError(String),

    /// Session not found
    #[error("Session not found: {0}")]
    NotFound(String),

    /// Error during serialization/deserialization
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Error reported by the backing document client
    #[error("Session store error: {0}")]
    StoreError(String),

    /// Redis error (when redis-store feature is enabled)
    #[cfg(feature = "redis-store")]
    #[error("Redis error: {0}")]
    RedisError(#[from] redis::RedisError),
}

impl From<serde_json::Error> for SessionError {
    fn from(err: serde_json::Error) -> Self {
        SessionError::SerializationError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = SessionError::NotFound("abc".to_string());
        assert_eq!(err.to_string(), "Session not found: abc");
        assert_eq!(
            SessionError::Disconnected.to_string(),
            "Session store is disconnected"
        );
    }

    #[test]
    fn test_from_serde_json() {
        let err: SessionError = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert!(matches!(err, SessionError::SerializationError(_)));
    }
}
