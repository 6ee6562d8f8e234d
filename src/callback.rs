//! Callback-style completion for callers that cannot await a result directly
//!
//! ```rust,ignore
//! let len = complete(store.length(), |result| {
//!     if let Ok(n) = result {
//!         tracing::info!("{} sessions", n);
//!     }
//! })
//! .await?;
//! ```

use std::future::Future;

use crate::error::SessionResult;

/// Await `operation`, hand its outcome to `callback`, then return it.
pub async fn complete<T, Fut, F>(operation: Fut, callback: F) -> SessionResult<T>
where
    Fut: Future<Output = SessionResult<T>>,
    F: FnOnce(&SessionResult<T>),
{
    let result = operation.await;
    callback(&result);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SessionError;

    #[tokio::test]
    async fn test_callback_sees_value() {
        let mut seen = None;
        let value = complete(async { Ok(3usize) }, |r| seen = r.as_ref().ok().copied())
            .await
            .unwrap();
        assert_eq!(value, 3);
        assert_eq!(seen, Some(3));
    }

    #[tokio::test]
    async fn test_callback_sees_error() {
        let mut failed = false;
        let result: SessionResult<()> = complete(
            async { Err(SessionError::NotFound("x".to_string())) },
            |r| failed = r.is_err(),
        )
        .await;
        assert!(failed);
        tokio_test::assert_err!(result);
    }
}
