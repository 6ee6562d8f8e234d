//! Session collection adapter
//!
//! [`DocumentCollection`] turns a [`DocumentClient`] into the fixed
//! [`SessionCollection`] contract the store works against. It owns the
//! document layout (`_id`, `session`, `expires`, `lastModified`) and
//! normalizes every native timestamp encoding into `DateTime<Utc>` so none
//! leaks past this module.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::{json, Map, Value};
use std::sync::Arc;

use crate::client::DocumentClient;
use crate::error::{SessionError, SessionResult};
use crate::serializer::Payload;

const ID_FIELD: &str = "_id";
const SESSION_FIELD: &str = "session";
const EXPIRES_FIELD: &str = "expires";
const LAST_MODIFIED_FIELD: &str = "lastModified";

/// One stored session
#[derive(Debug, Clone, PartialEq)]
pub struct SessionRecord {
    pub id: String,
    pub session: Payload,
    pub expires: Option<DateTime<Utc>>,
    pub last_modified: Option<DateTime<Utc>>,
}

/// Fields merged into an existing record by [`SessionCollection::update`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordUpdate {
    pub expires: Option<DateTime<Utc>>,
    pub last_modified: Option<DateTime<Utc>>,
}

/// Result of a partial update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateOutcome {
    /// Whether a matching record existed
    pub modified: bool,
}

/// Uniform collection contract used by the store
#[async_trait]
pub trait SessionCollection: Send + Sync + 'static {
    async fn fetch_one(&self, key: &str) -> SessionResult<Option<SessionRecord>>;

    async fn list_all(&self) -> SessionResult<Vec<SessionRecord>>;

    async fn upsert(&self, key: &str, record: &SessionRecord) -> SessionResult<()>;

    async fn update(&self, key: &str, update: RecordUpdate) -> SessionResult<UpdateOutcome>;

    async fn remove(&self, key: &str) -> SessionResult<()>;

    async fn remove_all(&self) -> SessionResult<()>;

    async fn count(&self) -> SessionResult<usize>;

    /// Delete every record expiring at or before `now`, returning how many
    async fn remove_expired(&self, now: DateTime<Utc>) -> SessionResult<usize>;
}

/// [`SessionCollection`] over any [`DocumentClient`]
pub struct DocumentCollection {
    client: Arc<dyn DocumentClient>,
    name: String,
    native_expiry: bool,
    write_options: Map<String, Value>,
}

impl DocumentCollection {
    pub fn new(client: Arc<dyn DocumentClient>, name: impl Into<String>) -> Self {
        Self {
            client,
            name: name.into(),
            native_expiry: false,
            write_options: Map::new(),
        }
    }

    /// Forward each record's expiry to the client's native expiration
    pub fn with_native_expiry(mut self, enabled: bool) -> Self {
        self.native_expiry = enabled;
        self
    }

    /// Client write hints passed along with bulk deletes
    pub fn with_write_options(mut self, options: Map<String, Value>) -> Self {
        self.write_options = options;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn write_options(&self) -> &Map<String, Value> {
        &self.write_options
    }

    /// Write hints for sweeps: fire-and-forget, unjournaled
    fn sweep_write_options(&self) -> Map<String, Value> {
        let mut options = self.write_options.clone();
        options.insert("w".to_string(), json!(0));
        options.insert("j".to_string(), json!(false));
        options
    }

    fn to_document(&self, key: &str, record: &SessionRecord) -> SessionResult<Value> {
        let mut doc = Map::new();
        doc.insert(ID_FIELD.to_string(), Value::String(key.to_string()));
        doc.insert(SESSION_FIELD.to_string(), serde_json::to_value(&record.session)?);
        if let Some(expires) = record.expires {
            doc.insert(EXPIRES_FIELD.to_string(), self.client.encode_timestamp(expires));
        }
        if let Some(last_modified) = record.last_modified {
            doc.insert(
                LAST_MODIFIED_FIELD.to_string(),
                self.client.encode_timestamp(last_modified),
            );
        }
        Ok(Value::Object(doc))
    }

    async fn forward_expiry(&self, key: &str, expires: Option<DateTime<Utc>>) -> SessionResult<()> {
        match expires {
            Some(at) if self.native_expiry => {
                self.client.expire_document_at(&self.name, key, at).await
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl SessionCollection for DocumentCollection {
    async fn fetch_one(&self, key: &str) -> SessionResult<Option<SessionRecord>> {
        match self.client.get_document(&self.name, key).await? {
            Some(doc) => record_from_document(key, doc).map(Some),
            None => Ok(None),
        }
    }

    async fn list_all(&self) -> SessionResult<Vec<SessionRecord>> {
        let docs = self.client.list_documents(&self.name).await?;
        let mut records = Vec::with_capacity(docs.len());

        for doc in docs {
            let key = doc
                .get(ID_FIELD)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            match record_from_document(&key, doc) {
                Ok(record) => records.push(record),
                Err(e) => {
                    tracing::warn!(collection = %self.name, id = %key, "skipping malformed session document: {}", e)
                }
            }
        }
        Ok(records)
    }

    async fn upsert(&self, key: &str, record: &SessionRecord) -> SessionResult<()> {
        let doc = self.to_document(key, record)?;
        self.client.set_document(&self.name, key, doc).await?;
        self.forward_expiry(key, record.expires).await
    }

    async fn update(&self, key: &str, update: RecordUpdate) -> SessionResult<UpdateOutcome> {
        let mut fields = Map::new();
        if let Some(expires) = update.expires {
            fields.insert(EXPIRES_FIELD.to_string(), self.client.encode_timestamp(expires));
        }
        if let Some(last_modified) = update.last_modified {
            fields.insert(
                LAST_MODIFIED_FIELD.to_string(),
                self.client.encode_timestamp(last_modified),
            );
        }

        let modified = self.client.update_document(&self.name, key, fields).await?;
        if modified {
            self.forward_expiry(key, update.expires).await?;
        }
        Ok(UpdateOutcome { modified })
    }

    async fn remove(&self, key: &str) -> SessionResult<()> {
        self.client.delete_document(&self.name, key).await
    }

    async fn remove_all(&self) -> SessionResult<()> {
        let ids = self.client.list_document_ids(&self.name).await?;
        self.client
            .delete_documents(&self.name, &ids, &self.write_options)
            .await
    }

    async fn count(&self) -> SessionResult<usize> {
        Ok(self.client.list_document_ids(&self.name).await?.len())
    }

    async fn remove_expired(&self, now: DateTime<Utc>) -> SessionResult<usize> {
        let expired: Vec<String> = self
            .client
            .list_documents(&self.name)
            .await?
            .iter()
            .filter(|doc| {
                doc.get(EXPIRES_FIELD)
                    .and_then(normalize_timestamp)
                    .is_some_and(|at| at <= now)
            })
            .filter_map(|doc| doc.get(ID_FIELD).and_then(Value::as_str).map(String::from))
            .collect();

        if !expired.is_empty() {
            self.client
                .delete_documents(&self.name, &expired, &self.sweep_write_options())
                .await?;
        }
        Ok(expired.len())
    }
}

fn record_from_document(key: &str, doc: Value) -> SessionResult<SessionRecord> {
    let Value::Object(mut doc) = doc else {
        return Err(SessionError::StoreError(format!(
            "session document {} is not an object",
            key
        )));
    };

    let id = match doc.remove(ID_FIELD) {
        Some(Value::String(id)) => id,
        _ => key.to_string(),
    };
    let mut session = doc.remove(SESSION_FIELD).ok_or_else(|| {
        SessionError::SerializationError(format!("session document {} has no session field", id))
    })?;

    // Structured payloads may carry native timestamps of their own
    if let Value::Object(fields) = &mut session {
        normalize_field(fields, LAST_MODIFIED_FIELD);
        if let Some(Value::Object(cookie)) = fields.get_mut("cookie") {
            normalize_field(cookie, EXPIRES_FIELD);
        }
    }

    Ok(SessionRecord {
        id,
        session: serde_json::from_value(session)?,
        expires: doc.get(EXPIRES_FIELD).and_then(normalize_timestamp),
        last_modified: doc.get(LAST_MODIFIED_FIELD).and_then(normalize_timestamp),
    })
}

/// Rewrite a native timestamp field in place as an RFC 3339 string
fn normalize_field(fields: &mut Map<String, Value>, name: &str) {
    if let Some(at) = fields.get(name).and_then(normalize_timestamp) {
        fields.insert(name.to_string(), Value::String(at.to_rfc3339()));
    }
}

/// Decode any of the native timestamp encodings a client may produce:
/// Firestore (`_seconds`/`_nanoseconds` or `seconds`/`nanos`), extended
/// JSON `$date`, RFC 3339 strings and epoch milliseconds.
pub fn normalize_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(text) => DateTime::parse_from_rfc3339(text)
            .ok()
            .map(|at| at.with_timezone(&Utc)),
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        Value::Object(fields) => {
            if let Some(date) = fields.get("$date") {
                return normalize_timestamp(date);
            }
            let seconds = fields
                .get("_seconds")
                .or_else(|| fields.get("seconds"))
                .and_then(Value::as_i64)?;
            let nanos = fields
                .get("_nanoseconds")
                .or_else(|| fields.get("nanos"))
                .and_then(Value::as_u64)
                .unwrap_or(0);
            DateTime::from_timestamp(seconds, u32::try_from(nanos).ok()?)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MemoryDocumentClient;
    use chrono::Duration;

    fn adapter() -> (MemoryDocumentClient, DocumentCollection) {
        let client = MemoryDocumentClient::new();
        let collection = DocumentCollection::new(Arc::new(client.clone()), "sessions");
        (client, collection)
    }

    fn record(id: &str, expires: Option<DateTime<Utc>>) -> SessionRecord {
        SessionRecord {
            id: id.to_string(),
            session: Payload::Text(r#"{"foo":"bar"}"#.to_string()),
            expires,
            last_modified: None,
        }
    }

    fn now_ms() -> DateTime<Utc> {
        // Firestore timestamps round-trip at nanosecond precision, but keep
        // comparisons simple
        Utc.timestamp_millis_opt(Utc::now().timestamp_millis()).unwrap()
    }

    #[test]
    fn test_normalize_timestamp_encodings() {
        let at = DateTime::from_timestamp(1_700_000_000, 250_000_000).unwrap();

        assert_eq!(
            normalize_timestamp(&json!({ "_seconds": 1_700_000_000i64, "_nanoseconds": 250_000_000 })),
            Some(at)
        );
        assert_eq!(
            normalize_timestamp(&json!({ "seconds": 1_700_000_000i64, "nanos": 250_000_000 })),
            Some(at)
        );
        assert_eq!(normalize_timestamp(&json!(1_700_000_000_250i64)), Some(at));
        assert_eq!(normalize_timestamp(&json!({ "$date": 1_700_000_000_250i64 })), Some(at));
        assert_eq!(normalize_timestamp(&json!(at.to_rfc3339())), Some(at));
        assert_eq!(normalize_timestamp(&json!("tomorrow")), None);
        assert_eq!(normalize_timestamp(&json!(true)), None);
    }

    #[tokio::test]
    async fn test_upsert_fetch_one() {
        let (client, collection) = adapter();
        let expires = now_ms() + Duration::hours(1);
        let mut rec = record("a", Some(expires));
        rec.last_modified = Some(now_ms());

        collection.upsert("a", &rec).await.unwrap();

        // Native encoding on the wire
        let raw = client.get_document("sessions", "a").await.unwrap().unwrap();
        assert!(raw["expires"].get("_seconds").is_some());
        assert_eq!(raw["_id"], json!("a"));

        let fetched = collection.fetch_one("a").await.unwrap().unwrap();
        assert_eq!(fetched, rec);
        assert!(collection.fetch_one("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_structured_payload_is_normalized() {
        let (client, collection) = adapter();
        client
            .set_document(
                "sessions",
                "a",
                json!({
                    "_id": "a",
                    "session": {
                        "foo": "bar",
                        "lastModified": { "_seconds": 1_700_000_000i64, "_nanoseconds": 0 },
                        "cookie": { "expires": { "_seconds": 1_700_000_100i64, "_nanoseconds": 0 } }
                    },
                    "expires": { "_seconds": 1_700_000_100i64, "_nanoseconds": 0 }
                }),
            )
            .await
            .unwrap();

        let fetched = collection.fetch_one("a").await.unwrap().unwrap();
        let Payload::Structured(session) = fetched.session else {
            panic!("expected structured payload");
        };
        let cookie_expires = DateTime::from_timestamp(1_700_000_100, 0).unwrap();
        assert_eq!(session["cookie"]["expires"], json!(cookie_expires.to_rfc3339()));
        assert!(session["lastModified"].is_string());
        assert_eq!(fetched.expires, Some(cookie_expires));
    }

    #[tokio::test]
    async fn test_update_reports_missing() {
        let (_client, collection) = adapter();
        let update = RecordUpdate {
            expires: Some(Utc::now()),
            last_modified: None,
        };
        let outcome = collection.update("missing", update.clone()).await.unwrap();
        assert!(!outcome.modified);

        collection.upsert("a", &record("a", None)).await.unwrap();
        let outcome = collection.update("a", update.clone()).await.unwrap();
        assert!(outcome.modified);
        let fetched = collection.fetch_one("a").await.unwrap().unwrap();
        assert_eq!(fetched.expires, update.expires);
    }

    #[tokio::test]
    async fn test_list_all_skips_malformed() {
        let (client, collection) = adapter();
        collection.upsert("a", &record("a", None)).await.unwrap();
        client
            .set_document("sessions", "b", json!({ "_id": "b", "key1": 1 }))
            .await
            .unwrap();

        let records = collection.list_all().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, "a");
        assert_eq!(collection.count().await.unwrap(), 2);
        assert!(collection.fetch_one("b").await.is_err());
    }

    #[tokio::test]
    async fn test_remove_and_remove_all() {
        let (_client, collection) = adapter();
        for id in ["a", "b", "c"] {
            collection.upsert(id, &record(id, None)).await.unwrap();
        }

        collection.remove("a").await.unwrap();
        assert_eq!(collection.count().await.unwrap(), 2);

        collection.remove_all().await.unwrap();
        assert_eq!(collection.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_remove_expired() {
        let (_client, collection) = adapter();
        let now = Utc::now();
        collection
            .upsert("old", &record("old", Some(now - Duration::seconds(5))))
            .await
            .unwrap();
        collection
            .upsert("new", &record("new", Some(now + Duration::hours(1))))
            .await
            .unwrap();
        collection.upsert("forever", &record("forever", None)).await.unwrap();

        assert_eq!(collection.remove_expired(now).await.unwrap(), 1);
        assert!(collection.fetch_one("old").await.unwrap().is_none());
        assert_eq!(collection.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_native_expiry_forwarded() {
        let client = MemoryDocumentClient::new();
        let collection =
            DocumentCollection::new(Arc::new(client.clone()), "sessions").with_native_expiry(true);

        collection
            .upsert("a", &record("a", Some(Utc::now() - Duration::seconds(1))))
            .await
            .unwrap();

        // The client itself dropped the document
        assert!(client.get_document("sessions", "a").await.unwrap().is_none());
    }

    #[test]
    fn test_sweep_write_options() {
        let mut options = Map::new();
        options.insert("w".to_string(), json!("majority"));
        options.insert("wtimeout".to_string(), json!(100));
        let collection = DocumentCollection::new(Arc::new(MemoryDocumentClient::new()), "s")
            .with_write_options(options);

        let sweep = collection.sweep_write_options();
        assert_eq!(sweep["w"], json!(0));
        assert_eq!(sweep["j"], json!(false));
        assert_eq!(sweep["wtimeout"], json!(100));
        assert_eq!(collection.write_options()["w"], json!("majority"));
    }
}
