//! In-process document client
//!
//! Keeps documents in memory, encodes timestamps the way Firestore's JSON
//! export does and honors native expiry requests. Used for tests and for
//! `memory://` connection URLs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

use super::DocumentClient;
use crate::error::{SessionError, SessionResult};

struct StoredDocument {
    document: Value,
    expires_at: Option<DateTime<Utc>>,
}

impl StoredDocument {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(at) => at > now,
            None => true,
        }
    }
}

type Collection = HashMap<String, StoredDocument>;

/// In-memory document database
#[derive(Clone, Default)]
pub struct MemoryDocumentClient {
    collections: Arc<RwLock<HashMap<String, Collection>>>,
}

impl MemoryDocumentClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop documents whose native expiry has passed
    fn purge_expired(&self, collection: &str) {
        let now = Utc::now();
        if let Some(docs) = self.collections.write().get_mut(collection) {
            docs.retain(|_, stored| stored.is_live(now));
        }
    }
}

#[async_trait]
impl DocumentClient for MemoryDocumentClient {
    async fn get_document(&self, collection: &str, id: &str) -> SessionResult<Option<Value>> {
        self.purge_expired(collection);
        let collections = self.collections.read();
        Ok(collections
            .get(collection)
            .and_then(|docs| docs.get(id))
            .map(|stored| stored.document.clone()))
    }

    async fn set_document(&self, collection: &str, id: &str, document: Value) -> SessionResult<()> {
        if !document.is_object() {
            return Err(SessionError::StoreError(format!(
                "document {} must be an object",
                id
            )));
        }

        self.collections
            .write()
            .entry(collection.to_string())
            .or_default()
            .insert(
                id.to_string(),
                StoredDocument {
                    document,
                    expires_at: None,
                },
            );
        Ok(())
    }

    async fn update_document(
        &self,
        collection: &str,
        id: &str,
        fields: Map<String, Value>,
    ) -> SessionResult<bool> {
        self.purge_expired(collection);
        let mut collections = self.collections.write();

        let Some(stored) = collections.get_mut(collection).and_then(|docs| docs.get_mut(id)) else {
            return Ok(false);
        };
        if let Value::Object(doc) = &mut stored.document {
            doc.extend(fields);
        }
        Ok(true)
    }

    async fn delete_document(&self, collection: &str, id: &str) -> SessionResult<()> {
        if let Some(docs) = self.collections.write().get_mut(collection) {
            docs.remove(id);
        }
        Ok(())
    }

    async fn list_documents(&self, collection: &str) -> SessionResult<Vec<Value>> {
        self.purge_expired(collection);
        let collections = self.collections.read();
        Ok(collections
            .get(collection)
            .map(|docs| docs.values().map(|s| s.document.clone()).collect())
            .unwrap_or_default())
    }

    async fn list_document_ids(&self, collection: &str) -> SessionResult<Vec<String>> {
        self.purge_expired(collection);
        let collections = self.collections.read();
        Ok(collections
            .get(collection)
            .map(|docs| docs.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn delete_documents(
        &self,
        collection: &str,
        ids: &[String],
        _write_options: &Map<String, Value>,
    ) -> SessionResult<()> {
        if let Some(docs) = self.collections.write().get_mut(collection) {
            for id in ids {
                docs.remove(id);
            }
        }
        Ok(())
    }

    async fn expire_document_at(
        &self,
        collection: &str,
        id: &str,
        at: DateTime<Utc>,
    ) -> SessionResult<()> {
        if let Some(stored) = self
            .collections
            .write()
            .get_mut(collection)
            .and_then(|docs| docs.get_mut(id))
        {
            stored.expires_at = Some(at);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_crud() {
        let client = MemoryDocumentClient::new();
        client
            .set_document("sessions", "a", json!({ "_id": "a", "n": 1 }))
            .await
            .unwrap();

        let doc = client.get_document("sessions", "a").await.unwrap().unwrap();
        assert_eq!(doc["n"], json!(1));

        let mut fields = Map::new();
        fields.insert("n".to_string(), json!(2));
        assert!(client.update_document("sessions", "a", fields.clone()).await.unwrap());
        assert!(!client.update_document("sessions", "b", fields).await.unwrap());

        let doc = client.get_document("sessions", "a").await.unwrap().unwrap();
        assert_eq!(doc["n"], json!(2));
        assert_eq!(doc["_id"], json!("a"));

        client.delete_document("sessions", "a").await.unwrap();
        assert!(client.get_document("sessions", "a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_collections_are_isolated() {
        let client = MemoryDocumentClient::new();
        client.set_document("one", "a", json!({})).await.unwrap();
        client.set_document("two", "b", json!({})).await.unwrap();

        assert_eq!(client.list_document_ids("one").await.unwrap(), vec!["a"]);
        assert_eq!(client.list_documents("two").await.unwrap().len(), 1);
        assert!(client.list_documents("three").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_native_expiry() {
        let client = MemoryDocumentClient::new();
        client.set_document("sessions", "a", json!({})).await.unwrap();
        client.set_document("sessions", "b", json!({})).await.unwrap();
        client
            .expire_document_at("sessions", "a", Utc::now() - chrono::Duration::seconds(1))
            .await
            .unwrap();

        assert!(client.get_document("sessions", "a").await.unwrap().is_none());
        assert_eq!(client.list_document_ids("sessions").await.unwrap(), vec!["b"]);
    }

    #[tokio::test]
    async fn test_batch_delete_and_rejects_non_objects() {
        let client = MemoryDocumentClient::new();
        for id in ["a", "b", "c"] {
            client.set_document("sessions", id, json!({})).await.unwrap();
        }
        client
            .delete_documents("sessions", &["a".to_string(), "c".to_string()], &Map::new())
            .await
            .unwrap();
        assert_eq!(client.list_document_ids("sessions").await.unwrap(), vec!["b"]);

        let err = client.set_document("sessions", "d", json!(1)).await.unwrap_err();
        assert!(matches!(err, SessionError::StoreError(_)));
    }

    #[test]
    fn test_timestamp_encoding() {
        let client = MemoryDocumentClient::new();
        let at = DateTime::from_timestamp(1_700_000_000, 5).unwrap();
        assert_eq!(
            client.encode_timestamp(at),
            json!({ "_seconds": 1_700_000_000i64, "_nanoseconds": 5 })
        );
    }
}
