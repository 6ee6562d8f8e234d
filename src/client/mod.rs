//! Backing-store client contract
//!
//! A [`DocumentClient`] exposes the raw document primitives of a
//! document-oriented database. Documents are JSON objects; temporal fields
//! are written in whatever encoding the client calls native
//! ([`DocumentClient::encode_timestamp`]) and normalized back by the
//! collection adapter.

mod memory;

#[cfg(feature = "redis-store")]
mod redis_client;

pub use memory::MemoryDocumentClient;

#[cfg(feature = "redis-store")]
pub use redis_client::RedisDocumentClient;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};

use crate::error::SessionResult;

/// Document CRUD primitives consumed by the session collection adapter
#[async_trait]
pub trait DocumentClient: Send + Sync + 'static {
    /// Fetch one document, `None` if absent
    async fn get_document(&self, collection: &str, id: &str) -> SessionResult<Option<Value>>;

    /// Replace or insert a document
    async fn set_document(&self, collection: &str, id: &str, document: Value) -> SessionResult<()>;

    /// Merge fields into an existing document.
    ///
    /// Returns false when no document with that id exists.
    async fn update_document(
        &self,
        collection: &str,
        id: &str,
        fields: Map<String, Value>,
    ) -> SessionResult<bool>;

    /// Delete one document; deleting an absent document is not an error
    async fn delete_document(&self, collection: &str, id: &str) -> SessionResult<()>;

    /// Every document in the collection
    async fn list_documents(&self, collection: &str) -> SessionResult<Vec<Value>>;

    /// Every document id in the collection
    async fn list_document_ids(&self, collection: &str) -> SessionResult<Vec<String>>;

    /// Delete a batch of documents. `write_options` are client-specific
    /// write hints and may be ignored.
    async fn delete_documents(
        &self,
        collection: &str,
        ids: &[String],
        write_options: &Map<String, Value>,
    ) -> SessionResult<()>;

    /// Ask the backing store to drop the document at `at` on its own
    async fn expire_document_at(
        &self,
        _collection: &str,
        _id: &str,
        _at: DateTime<Utc>,
    ) -> SessionResult<()> {
        Ok(())
    }

    /// Native encoding of an instant; Firestore timestamp JSON by default
    fn encode_timestamp(&self, at: DateTime<Utc>) -> Value {
        json!({
            "_seconds": at.timestamp(),
            "_nanoseconds": at.timestamp_subsec_nanos(),
        })
    }
}
