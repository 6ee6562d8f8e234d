//! Store configuration

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::{Map, Value};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::client::DocumentClient;
use crate::error::{SessionError, SessionResult};
use crate::events::EventNotifier;
use crate::serializer::{Payload, SerializeFn, UnserializeFn};
use crate::session::SessionData;

/// Default session lifetime: 14 days
pub const DEFAULT_TTL_SECS: u64 = 1_209_600;

/// Default collection name
pub const DEFAULT_COLLECTION: &str = "sessions";

/// Default sweep cadence in minutes
pub const DEFAULT_AUTO_REMOVE_INTERVAL_MINS: u64 = 10;

/// Largest sweep interval in minutes whose millisecond value fits in 32 bits
pub const MAX_AUTO_REMOVE_INTERVAL_MINS: u64 = 71_582;

/// Largest accepted `ttl` and `touch_after`, in seconds (1000 years)
pub const MAX_DURATION_SECS: u64 = 31_536_000_000;

/// Maps a caller session id to a storage key
pub type TransformIdFn = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// Deferred client producer
pub type ClientFuture = BoxFuture<'static, SessionResult<Arc<dyn DocumentClient>>>;

/// How expired sessions are physically removed
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AutoRemove {
    /// The backing store expires documents itself
    #[default]
    Native,
    /// A periodic sweep deletes expired documents
    Interval,
    /// Nothing is deleted proactively; reads still ignore expired sessions
    Disabled,
}

/// Options accepted by [`DocumentStore::new`](crate::DocumentStore::new)
///
/// Exactly one connection strategy is used, picked in this order: `url`,
/// `client`, `client_future`.
pub struct StoreOptions {
    /// Connection URL (`memory://`, or `redis://` with the `redis-store` feature)
    pub url: Option<String>,

    /// Ready-made document client
    pub client: Option<Arc<dyn DocumentClient>>,

    /// Client produced later, e.g. after an async handshake
    pub client_future: Option<ClientFuture>,

    /// TTL in seconds for sessions without a cookie expiry (default: 14 days)
    pub ttl: u64,

    /// Collection name (default: "sessions")
    pub collection: String,

    /// Eviction mode (default: native)
    pub auto_remove: AutoRemove,

    /// Sweep cadence in minutes for `AutoRemove::Interval` (default: 10)
    pub auto_remove_interval: u64,

    /// Minimum seconds between `lastModified` refreshes; 0 disables lazy touch
    pub touch_after: u64,

    /// Custom serialize function
    pub serialize: Option<SerializeFn>,

    /// Custom unserialize function
    pub unserialize: Option<UnserializeFn>,

    /// Store JSON text (true, default) or structured documents (false)
    pub stringify: bool,

    /// Session id to storage key mapping
    pub transform_id: Option<TransformIdFn>,

    /// Enables payload encryption. Consumed when the store is built.
    pub secret: Option<String>,

    /// Use an in-memory store instead of the document store
    pub fallback_memory: bool,

    /// Client write hints passed with bulk deletes
    pub write_options: Map<String, Value>,

    /// Pre-registered observers
    pub notifier: Option<EventNotifier>,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            url: None,
            client: None,
            client_future: None,
            ttl: DEFAULT_TTL_SECS,
            collection: DEFAULT_COLLECTION.to_string(),
            auto_remove: AutoRemove::Native,
            auto_remove_interval: DEFAULT_AUTO_REMOVE_INTERVAL_MINS,
            touch_after: 0,
            serialize: None,
            unserialize: None,
            stringify: true,
            transform_id: None,
            secret: None,
            fallback_memory: false,
            write_options: Map::new(),
            notifier: None,
        }
    }
}

impl StoreOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect through a URL
    pub fn with_url<S: Into<String>>(mut self, url: S) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Use an existing document client
    pub fn with_client<C: DocumentClient>(mut self, client: C) -> Self {
        self.client = Some(Arc::new(client));
        self
    }

    /// Use a shared document client
    pub fn with_shared_client(mut self, client: Arc<dyn DocumentClient>) -> Self {
        self.client = Some(client);
        self
    }

    /// Resolve the client asynchronously after construction
    pub fn with_client_future<F>(mut self, future: F) -> Self
    where
        F: Future<Output = SessionResult<Arc<dyn DocumentClient>>> + Send + 'static,
    {
        self.client_future = Some(future.boxed());
        self
    }

    /// Set the TTL in seconds (default: 1,209,600 = 14 days)
    pub fn with_ttl(mut self, ttl: u64) -> Self {
        self.ttl = ttl;
        self
    }

    /// Set the TTL from a Duration
    pub fn with_ttl_duration(mut self, ttl: Duration) -> Self {
        self.ttl = ttl.as_secs();
        self
    }

    /// Set the collection name (default: "sessions")
    pub fn with_collection<S: Into<String>>(mut self, collection: S) -> Self {
        self.collection = collection.into();
        self
    }

    /// Set the eviction mode (default: native)
    pub fn with_auto_remove(mut self, mode: AutoRemove) -> Self {
        self.auto_remove = mode;
        self
    }

    /// Set the sweep cadence in minutes (default: 10)
    pub fn with_auto_remove_interval(mut self, minutes: u64) -> Self {
        self.auto_remove_interval = minutes;
        self
    }

    /// Enable lazy touch with the given threshold in seconds
    pub fn with_touch_after(mut self, seconds: u64) -> Self {
        self.touch_after = seconds;
        self
    }

    /// Override serialization
    pub fn with_serialize<F>(mut self, f: F) -> Self
    where
        F: Fn(&SessionData) -> SessionResult<Payload> + Send + Sync + 'static,
    {
        self.serialize = Some(Arc::new(f));
        self
    }

    /// Override deserialization
    pub fn with_unserialize<F>(mut self, f: F) -> Self
    where
        F: Fn(Payload) -> SessionResult<SessionData> + Send + Sync + 'static,
    {
        self.unserialize = Some(Arc::new(f));
        self
    }

    /// Store JSON text (true) or structured documents (false)
    pub fn with_stringify(mut self, stringify: bool) -> Self {
        self.stringify = stringify;
        self
    }

    /// Map session ids to storage keys
    pub fn with_transform_id<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        self.transform_id = Some(Arc::new(f));
        self
    }

    /// Encrypt stored payloads with a key derived from `secret`
    pub fn with_secret<S: Into<String>>(mut self, secret: S) -> Self {
        self.secret = Some(secret.into());
        self
    }

    /// Use the in-memory store instead
    pub fn with_fallback_memory(mut self, fallback: bool) -> Self {
        self.fallback_memory = fallback;
        self
    }

    /// Set client write hints
    pub fn with_write_options(mut self, options: Map<String, Value>) -> Self {
        self.write_options = options;
        self
    }

    /// Deliver events to a notifier with observers already attached
    pub fn with_notifier(mut self, notifier: EventNotifier) -> Self {
        self.notifier = Some(notifier);
        self
    }
}

impl fmt::Debug for StoreOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreOptions")
            .field("url", &self.url)
            .field("client", &self.client.is_some())
            .field("client_future", &self.client_future.is_some())
            .field("ttl", &self.ttl)
            .field("collection", &self.collection)
            .field("auto_remove", &self.auto_remove)
            .field("auto_remove_interval", &self.auto_remove_interval)
            .field("touch_after", &self.touch_after)
            .field("stringify", &self.stringify)
            .field("secret", &self.secret.as_ref().map(|_| "<redacted>"))
            .field("fallback_memory", &self.fallback_memory)
            .finish_non_exhaustive()
    }
}

/// Settings a store runs with, frozen at construction.
///
/// Holds no connection strategy and no secret.
#[derive(Clone)]
pub struct StoreConfig {
    pub ttl: u64,
    pub collection: String,
    pub auto_remove: AutoRemove,
    pub auto_remove_interval: u64,
    pub touch_after: u64,
    pub stringify: bool,
    pub transform_id: Option<TransformIdFn>,
    pub write_options: Map<String, Value>,
}

impl StoreConfig {
    /// Validate and freeze the plain settings of `options`
    pub fn from_options(options: &StoreOptions) -> SessionResult<Self> {
        if options.auto_remove_interval > MAX_AUTO_REMOVE_INTERVAL_MINS {
            return Err(SessionError::ConfigurationError(format!(
                "auto_remove_interval is too large ({} > {}); it is in minutes, not seconds or milliseconds",
                options.auto_remove_interval, MAX_AUTO_REMOVE_INTERVAL_MINS
            )));
        }
        for (name, secs) in [("ttl", options.ttl), ("touch_after", options.touch_after)] {
            if secs > MAX_DURATION_SECS {
                return Err(SessionError::ConfigurationError(format!(
                    "{} is too large ({} > {} seconds)",
                    name, secs, MAX_DURATION_SECS
                )));
            }
        }
        if options.auto_remove == AutoRemove::Interval && options.auto_remove_interval == 0 {
            return Err(SessionError::ConfigurationError(
                "auto_remove_interval must be at least one minute".to_string(),
            ));
        }

        Ok(Self {
            ttl: options.ttl,
            collection: options.collection.clone(),
            auto_remove: options.auto_remove,
            auto_remove_interval: options.auto_remove_interval,
            touch_after: options.touch_after,
            stringify: options.stringify,
            transform_id: options.transform_id.clone(),
            write_options: options.write_options.clone(),
        })
    }

    /// Storage key for a session id
    pub fn storage_key(&self, sid: &str) -> String {
        match &self.transform_id {
            Some(transform) => transform(sid),
            None => sid.to_string(),
        }
    }

    /// Sweep cadence as a Duration
    pub fn auto_remove_period(&self) -> Duration {
        Duration::from_secs(self.auto_remove_interval * 60)
    }
}

impl fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreConfig")
            .field("ttl", &self.ttl)
            .field("collection", &self.collection)
            .field("auto_remove", &self.auto_remove)
            .field("auto_remove_interval", &self.auto_remove_interval)
            .field("touch_after", &self.touch_after)
            .field("stringify", &self.stringify)
            .field("transform_id", &self.transform_id.is_some())
            .field("write_options", &self.write_options)
            .finish()
    }
}
