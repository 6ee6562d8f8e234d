//! Redis-backed document client
//!
//! Documents are stored as JSON strings:
//! - Key: `collection + ":" + id`
//! - Value: the JSON document
//! - Index: a set at `collection + ":"` holding the ids of the collection
//! - Native expiry: `PEXPIREAT` on the key
//!
//! Timestamps are encoded as epoch milliseconds.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde_json::{Map, Value};
use tokio::sync::OnceCell;

use super::DocumentClient;
use crate::error::{SessionError, SessionResult};

/// Document client over a Redis connection manager
///
/// The connection is opened lazily on first use, so building the client
/// from a URL never blocks.
///
/// # Example
///
/// ```rust,ignore
/// use express_docstore_session::{DocumentStore, RedisDocumentClient, StoreOptions};
///
/// let client = RedisDocumentClient::from_url("redis://127.0.0.1/")?;
/// let store = DocumentStore::new(StoreOptions::new().with_client(client))?;
/// ```
pub struct RedisDocumentClient {
    client: redis::Client,
    conn: OnceCell<ConnectionManager>,
}

impl RedisDocumentClient {
    pub fn new(client: redis::Client) -> Self {
        Self {
            client,
            conn: OnceCell::new(),
        }
    }

    /// Create a client from a connection string
    pub fn from_url(url: &str) -> SessionResult<Self> {
        let client = redis::Client::open(url).map_err(|e| {
            SessionError::ConnectionError(format!("Failed to create Redis client: {}", e))
        })?;
        Ok(Self::new(client))
    }

    /// Create a client from an existing connection manager
    pub fn from_connection_manager(client: redis::Client, conn: ConnectionManager) -> Self {
        Self {
            client,
            conn: OnceCell::new_with(Some(conn)),
        }
    }

    async fn connection(&self) -> SessionResult<ConnectionManager> {
        let conn = self
            .conn
            .get_or_try_init(|| ConnectionManager::new(self.client.clone()))
            .await?;
        Ok(conn.clone())
    }

    fn make_key(collection: &str, id: &str) -> String {
        format!("{}:{}", collection, id)
    }

    fn index_key(collection: &str) -> String {
        format!("{}:", collection)
    }

    /// Indexed ids with their stored JSON, in id order. Ids whose key is
    /// gone (native expiry, foreign deletes) are pruned from the index.
    async fn entries(&self, collection: &str) -> SessionResult<Vec<(String, String)>> {
        let mut conn = self.connection().await?;
        let index = Self::index_key(collection);

        let mut ids: Vec<String> = conn.smembers(&index).await?;
        if ids.is_empty() {
            return Ok(vec![]);
        }
        ids.sort();

        let keys: Vec<String> = ids.iter().map(|id| Self::make_key(collection, id)).collect();
        let values: Vec<Option<String>> = conn.mget(&keys).await?;

        let mut entries = Vec::with_capacity(ids.len());
        let mut stale = Vec::new();
        for (id, value) in ids.into_iter().zip(values) {
            match value {
                Some(json) => entries.push((id, json)),
                None => stale.push(id),
            }
        }

        if !stale.is_empty() {
            tracing::debug!(collection, pruned = stale.len(), "pruning stale index entries");
            conn.srem::<_, _, ()>(&index, &stale).await?;
        }
        Ok(entries)
    }
}

#[async_trait]
impl DocumentClient for RedisDocumentClient {
    async fn get_document(&self, collection: &str, id: &str) -> SessionResult<Option<Value>> {
        let mut conn = self.connection().await?;
        let data: Option<String> = conn.get(Self::make_key(collection, id)).await?;

        match data {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn set_document(&self, collection: &str, id: &str, document: Value) -> SessionResult<()> {
        // The empty id is the collection index
        if id.is_empty() {
            return Err(SessionError::StoreError(
                "document id must not be empty".to_string(),
            ));
        }

        let json = serde_json::to_string(&document)?;
        let mut conn = self.connection().await?;
        let _: () = redis::pipe()
            .atomic()
            .set(Self::make_key(collection, id), json)
            .ignore()
            .sadd(Self::index_key(collection), id)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn update_document(
        &self,
        collection: &str,
        id: &str,
        fields: Map<String, Value>,
    ) -> SessionResult<bool> {
        let key = Self::make_key(collection, id);
        let mut conn = self.connection().await?;

        let data: Option<String> = conn.get(&key).await?;
        let Some(json) = data else {
            return Ok(false);
        };

        let mut document: Value = serde_json::from_str(&json)?;
        if let Value::Object(doc) = &mut document {
            doc.extend(fields);
        }

        // XX: a key deleted since the GET stays deleted. KEEPTTL: native
        // expiry survives the rewrite.
        let reply: Option<String> = redis::cmd("SET")
            .arg(&key)
            .arg(serde_json::to_string(&document)?)
            .arg("XX")
            .arg("KEEPTTL")
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn delete_document(&self, collection: &str, id: &str) -> SessionResult<()> {
        let mut conn = self.connection().await?;
        let _: () = redis::pipe()
            .atomic()
            .del(Self::make_key(collection, id))
            .ignore()
            .srem(Self::index_key(collection), id)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn list_documents(&self, collection: &str) -> SessionResult<Vec<Value>> {
        self.entries(collection)
            .await?
            .into_iter()
            .map(|(_, json)| serde_json::from_str(&json).map_err(SessionError::from))
            .collect()
    }

    async fn list_document_ids(&self, collection: &str) -> SessionResult<Vec<String>> {
        Ok(self
            .entries(collection)
            .await?
            .into_iter()
            .map(|(id, _)| id)
            .collect())
    }

    async fn delete_documents(
        &self,
        collection: &str,
        ids: &[String],
        _write_options: &Map<String, Value>,
    ) -> SessionResult<()> {
        if ids.is_empty() {
            return Ok(());
        }

        let keys: Vec<String> = ids.iter().map(|id| Self::make_key(collection, id)).collect();
        let mut conn = self.connection().await?;
        let _: () = redis::pipe()
            .atomic()
            .del(keys)
            .ignore()
            .srem(Self::index_key(collection), ids)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn expire_document_at(
        &self,
        collection: &str,
        id: &str,
        at: DateTime<Utc>,
    ) -> SessionResult<()> {
        let mut conn = self.connection().await?;
        let _: bool = conn
            .pexpire_at(Self::make_key(collection, id), at.timestamp_millis())
            .await?;
        Ok(())
    }

    fn encode_timestamp(&self, at: DateTime<Utc>) -> Value {
        Value::from(at.timestamp_millis())
    }
}

#[cfg(test)]
mod tests {
    // Tests require a running Redis instance
    // Run with: cargo test --features redis-store -- --ignored

    use super::*;
    use serde_json::json;

    #[test]
    fn test_key_layout() {
        assert_eq!(RedisDocumentClient::make_key("sessions", "a"), "sessions:a");
        assert_eq!(RedisDocumentClient::make_key("sessions", "app:a"), "sessions:app:a");
        assert_eq!(RedisDocumentClient::index_key("sessions"), "sessions:");
        assert_ne!(
            RedisDocumentClient::index_key("sessions"),
            RedisDocumentClient::index_key("sessions:archive")
        );
    }

    #[tokio::test]
    async fn test_empty_id_rejected_before_connecting() {
        let client = RedisDocumentClient::from_url("redis://127.0.0.1:1/").unwrap();
        let err = client
            .set_document("sessions", "", json!({ "_id": "" }))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::StoreError(_)));
    }

    #[test]
    fn test_rejects_bad_url() {
        let err = RedisDocumentClient::from_url("not a url").err().unwrap();
        assert!(matches!(err, SessionError::ConnectionError(_)));
    }

    #[tokio::test]
    #[ignore]
    async fn test_redis_client_basic() {
        let client = RedisDocumentClient::from_url("redis://127.0.0.1/").unwrap();
        let collection = "sessions-test";

        let ids = client.list_document_ids(collection).await.unwrap();
        client.delete_documents(collection, &ids, &Map::new()).await.unwrap();

        client
            .set_document(collection, "a", json!({ "_id": "a", "n": 1 }))
            .await
            .unwrap();
        let mut fields = Map::new();
        fields.insert("n".to_string(), json!(2));
        assert!(client.update_document(collection, "a", fields).await.unwrap());

        let doc = client.get_document(collection, "a").await.unwrap().unwrap();
        assert_eq!(doc["n"], json!(2));
        assert_eq!(client.list_document_ids(collection).await.unwrap(), vec!["a"]);

        client
            .expire_document_at(collection, "a", Utc::now() - chrono::Duration::seconds(1))
            .await
            .unwrap();
        assert!(client.get_document(collection, "a").await.unwrap().is_none());
    }

    #[tokio::test]
    #[ignore]
    async fn test_update_after_delete_stays_deleted() {
        let client = RedisDocumentClient::from_url("redis://127.0.0.1/").unwrap();
        let collection = "sessions-update-test";

        client
            .set_document(collection, "gone", json!({ "_id": "gone", "n": 1 }))
            .await
            .unwrap();
        client.delete_document(collection, "gone").await.unwrap();

        let mut fields = Map::new();
        fields.insert("n".to_string(), json!(2));
        assert!(!client.update_document(collection, "gone", fields).await.unwrap());
        assert!(client.get_document(collection, "gone").await.unwrap().is_none());
    }

    #[tokio::test]
    #[ignore]
    async fn test_collections_with_shared_prefix_are_isolated() {
        let client = RedisDocumentClient::from_url("redis://127.0.0.1/").unwrap();
        let outer = "sessions-iso";
        let inner = "sessions-iso:archive";
        for collection in [outer, inner] {
            let ids = client.list_document_ids(collection).await.unwrap();
            client.delete_documents(collection, &ids, &Map::new()).await.unwrap();
        }

        client
            .set_document(outer, "a", json!({ "_id": "a" }))
            .await
            .unwrap();
        client
            .set_document(inner, "b", json!({ "_id": "b" }))
            .await
            .unwrap();
        client
            .set_document(inner, "app:c", json!({ "_id": "app:c" }))
            .await
            .unwrap();

        assert_eq!(client.list_document_ids(outer).await.unwrap(), vec!["a"]);
        assert_eq!(client.list_document_ids(inner).await.unwrap(), vec!["app:c", "b"]);

        let ids = client.list_document_ids(outer).await.unwrap();
        client.delete_documents(outer, &ids, &Map::new()).await.unwrap();
        assert!(client.list_document_ids(outer).await.unwrap().is_empty());
        assert_eq!(client.list_documents(inner).await.unwrap().len(), 2);
    }
}
