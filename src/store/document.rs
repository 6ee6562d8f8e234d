//! Document-database session store
//!
//! [`DocumentStore`] persists sessions as documents in a collection of a
//! [`DocumentClient`]. Each document looks like:
//!
//! ```json
//! { "_id": "<storage key>", "session": "<payload>", "expires": <ts>, "lastModified": <ts> }
//! ```
//!
//! `lastModified` is only written when lazy touch is enabled.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use std::sync::{Arc, Weak};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::collection::{DocumentCollection, RecordUpdate, SessionCollection, SessionRecord};
use super::{MemoryStore, SessionStore};
use crate::client::{DocumentClient, MemoryDocumentClient};
use crate::config::{AutoRemove, ClientFuture, StoreConfig, StoreOptions};
use crate::crypto::SessionCrypto;
use crate::error::{SessionError, SessionResult};
use crate::events::{EventNotifier, StoreEvent};
use crate::policy::TtlPolicy;
use crate::serializer::{Payload, Serializer};
use crate::session::SessionData;

/// Connection lifecycle of a [`DocumentStore`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreState {
    Init,
    Connecting,
    Connected,
    Disconnected,
}

impl StoreState {
    fn event(self) -> StoreEvent {
        match self {
            StoreState::Init => StoreEvent::Init,
            StoreState::Connecting => StoreEvent::Connecting,
            StoreState::Connected => StoreEvent::Connected,
            StoreState::Disconnected => StoreEvent::Disconnected,
        }
    }
}

enum ConnectionStrategy {
    Url(String),
    Client(Arc<dyn DocumentClient>),
    Deferred(ClientFuture, Handle),
}

impl ConnectionStrategy {
    /// Pick the strategy: url, then client, then deferred client
    fn from_options(options: &mut StoreOptions) -> SessionResult<Self> {
        if let Some(url) = options.url.take() {
            return Ok(ConnectionStrategy::Url(url));
        }
        if let Some(client) = options.client.take() {
            return Ok(ConnectionStrategy::Client(client));
        }
        if let Some(future) = options.client_future.take() {
            let handle = Handle::try_current().map_err(|_| {
                SessionError::ConfigurationError(
                    "a deferred client requires a running tokio runtime".to_string(),
                )
            })?;
            return Ok(ConnectionStrategy::Deferred(future, handle));
        }
        Err(SessionError::ConfigurationError(
            "Connection strategy not found".to_string(),
        ))
    }
}

/// Resolve a connection URL into a document client
fn client_from_url(url: &str) -> SessionResult<Arc<dyn DocumentClient>> {
    let scheme = url.split("://").next().unwrap_or_default();
    match scheme {
        "memory" => Ok(Arc::new(MemoryDocumentClient::new())),
        #[cfg(feature = "redis-store")]
        "redis" | "rediss" => Ok(Arc::new(crate::client::RedisDocumentClient::from_url(url)?)),
        _ => Err(SessionError::ConnectionError(format!(
            "unsupported connection scheme: {}",
            scheme
        ))),
    }
}

struct Inner {
    config: StoreConfig,
    serializer: Serializer,
    crypto: Option<SessionCrypto>,
    policy: TtlPolicy,
    notifier: EventNotifier,
    state: watch::Sender<StoreState>,
    collection: RwLock<Option<Arc<dyn SessionCollection>>>,
    sweep: Mutex<Option<JoinHandle<()>>>,
    fallback: Option<MemoryStore>,
}

impl Inner {
    fn change_state(&self, new_state: StoreState) {
        let changed = self.state.send_if_modified(|state| {
            if *state == new_state {
                false
            } else {
                *state = new_state;
                true
            }
        });

        if changed {
            tracing::debug!(state = ?new_state, collection = %self.config.collection, "session store state changed");
            self.notifier.emit(new_state.event());
        }
    }

    fn connection_failed(&self, err: &SessionError) {
        tracing::error!("Session store failed to connect: {}", err);
        self.change_state(StoreState::Disconnected);
    }

    fn attach_client(&self, client: Arc<dyn DocumentClient>) -> SessionResult<()> {
        let collection = DocumentCollection::new(client, self.config.collection.clone())
            .with_native_expiry(self.config.auto_remove == AutoRemove::Native)
            .with_write_options(self.config.write_options.clone());
        self.attach_collection(Arc::new(collection))
    }

    fn attach_collection(&self, collection: Arc<dyn SessionCollection>) -> SessionResult<()> {
        self.stop_sweep();
        self.arm_eviction(Arc::clone(&collection))?;
        *self.collection.write() = Some(collection);
        self.change_state(StoreState::Connected);
        tracing::info!(collection = %self.config.collection, "Session store connected");
        Ok(())
    }

    fn arm_eviction(&self, collection: Arc<dyn SessionCollection>) -> SessionResult<()> {
        if self.config.auto_remove != AutoRemove::Interval {
            return Ok(());
        }

        let handle = Handle::try_current().map_err(|_| {
            SessionError::ConfigurationError(
                "interval eviction requires a running tokio runtime".to_string(),
            )
        })?;
        let period = self.config.auto_remove_period();
        let name = self.config.collection.clone();

        // The task only holds the adapter, never the store, and is aborted
        // on re-attach, close and drop.
        let task = handle.spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match collection.remove_expired(Utc::now()).await {
                    Ok(0) => {}
                    Ok(removed) => {
                        tracing::debug!(collection = %name, removed, "removed expired sessions")
                    }
                    Err(e) => tracing::warn!(collection = %name, "expired session sweep failed: {}", e),
                }
            }
        });
        *self.sweep.lock() = Some(task);
        Ok(())
    }

    fn stop_sweep(&self) -> bool {
        match self.sweep.lock().take() {
            Some(task) => {
                task.abort();
                true
            }
            None => false,
        }
    }

    /// The attached collection, waiting out a pending connection
    async fn collection(&self) -> SessionResult<Arc<dyn SessionCollection>> {
        let attached = self.collection.read().clone();
        if let Some(collection) = attached {
            return Ok(collection);
        }

        let mut rx = self.state.subscribe();
        let state = *rx
            .wait_for(|s| matches!(s, StoreState::Connected | StoreState::Disconnected))
            .await
            .map_err(|_| SessionError::Disconnected)?;

        match state {
            StoreState::Connected => self
                .collection
                .read()
                .clone()
                .ok_or(SessionError::Disconnected),
            _ => Err(SessionError::Disconnected),
        }
    }

    fn encode(&self, session: &SessionData) -> SessionResult<Payload> {
        let payload = if self.policy.lazy_touch_enabled() && session.last_modified.is_some() {
            // Tracked as a record field, never inside the payload
            let mut copy = session.clone();
            copy.last_modified = None;
            self.serializer.serialize(&copy)?
        } else {
            self.serializer.serialize(session)?
        };

        match &self.crypto {
            Some(crypto) => crypto.encrypt(payload),
            None => Ok(payload),
        }
    }

    fn decode(&self, record: SessionRecord) -> SessionResult<SessionData> {
        let payload = match &self.crypto {
            Some(crypto) => crypto.decrypt(record.session)?,
            None => record.session,
        };

        let mut session = self.serializer.unserialize(payload)?;
        if self.policy.lazy_touch_enabled() {
            if let Some(last_modified) = record.last_modified {
                session.last_modified = Some(last_modified);
            }
        }
        Ok(session)
    }

    /// Records that are still live, in collection order
    async fn live_records(&self) -> SessionResult<Vec<SessionRecord>> {
        let now = Utc::now();
        Ok(self
            .collection()
            .await?
            .list_all()
            .await?
            .into_iter()
            .filter(|record| !TtlPolicy::is_expired(record.expires, now))
            .collect())
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.stop_sweep();
    }
}

/// Session store backed by a document database
///
/// Cloning is cheap and yields a handle to the same store.
///
/// # Example
///
/// ```rust,ignore
/// use express_docstore_session::{DocumentStore, SessionData, SessionStore, StoreOptions};
///
/// let store = DocumentStore::new(
///     StoreOptions::new()
///         .with_url("redis://127.0.0.1/")
///         .with_collection("sessions")
///         .with_touch_after(3600),
/// )?;
///
/// store.set("sid", &SessionData::new(86400)).await?;
/// let session = store.get("sid").await?;
/// ```
#[derive(Clone)]
pub struct DocumentStore {
    inner: Arc<Inner>,
}

impl DocumentStore {
    /// Build a store and start connecting.
    ///
    /// With a URL or a client the store is connected (or has failed) when
    /// this returns. With a deferred client it returns in the `Connecting`
    /// state and a failure is reported through [`StoreEvent::Error`].
    pub fn new(mut options: StoreOptions) -> SessionResult<Self> {
        let config = StoreConfig::from_options(&options)?;
        let notifier = options.notifier.take().unwrap_or_default();

        if options.fallback_memory {
            tracing::info!("Session store falling back to memory");
            let (state, _) = watch::channel(StoreState::Connected);
            let fallback = MemoryStore::new().with_ttl(config.ttl);
            notifier.emit(StoreEvent::Init);
            notifier.emit(StoreEvent::Connected);
            return Ok(Self::from_inner(Inner {
                policy: TtlPolicy::new(config.ttl, config.touch_after),
                serializer: Serializer::Textual,
                crypto: None,
                config,
                notifier,
                state,
                collection: RwLock::new(None),
                sweep: Mutex::new(None),
                fallback: Some(fallback),
            }));
        }

        // The secret is consumed here and only the derived key survives
        let crypto = match options.secret.take() {
            Some(secret) => Some(SessionCrypto::new(&secret)?),
            None => None,
        };
        let strategy = ConnectionStrategy::from_options(&mut options)?;

        let (state, _) = watch::channel(StoreState::Init);
        let store = Self::from_inner(Inner {
            serializer: Serializer::from_options(
                options.serialize.take(),
                options.unserialize.take(),
                config.stringify,
            ),
            policy: TtlPolicy::new(config.ttl, config.touch_after),
            crypto,
            config,
            notifier,
            state,
            collection: RwLock::new(None),
            sweep: Mutex::new(None),
            fallback: None,
        });

        let inner = &store.inner;
        inner.notifier.emit(StoreEvent::Init);
        inner.change_state(StoreState::Connecting);

        match strategy {
            ConnectionStrategy::Url(url) => {
                let attached = client_from_url(&url).and_then(|client| inner.attach_client(client));
                if let Err(e) = attached {
                    inner.connection_failed(&e);
                    return Err(e);
                }
            }
            ConnectionStrategy::Client(client) => {
                if let Err(e) = inner.attach_client(client) {
                    inner.connection_failed(&e);
                    return Err(e);
                }
            }
            ConnectionStrategy::Deferred(future, handle) => {
                let weak: Weak<Inner> = Arc::downgrade(inner);
                handle.spawn(async move {
                    let result = future.await;
                    let Some(inner) = weak.upgrade() else {
                        return;
                    };
                    if let Err(e) = result.and_then(|client| inner.attach_client(client)) {
                        inner.connection_failed(&e);
                        inner.notifier.emit(StoreEvent::Error(e.to_string()));
                    }
                });
            }
        }

        Ok(store)
    }

    fn from_inner(inner: Inner) -> Self {
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Current connection state
    pub fn state(&self) -> StoreState {
        *self.inner.state.borrow()
    }

    /// Observers of this store's events
    pub fn events(&self) -> &EventNotifier {
        &self.inner.notifier
    }

    /// Frozen settings of this store
    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    /// Name of the backing collection
    pub fn collection_name(&self) -> &str {
        &self.inner.config.collection
    }

    /// Whether sessions go to the in-memory fallback store
    pub fn is_fallback(&self) -> bool {
        self.inner.fallback.is_some()
    }

    /// Wait until the store is connected
    pub async fn wait_connected(&self) -> SessionResult<()> {
        if self.is_fallback() {
            return Ok(());
        }
        self.inner.collection().await.map(|_| ())
    }

    /// Attach a new document client, replacing the current one and
    /// re-arming eviction
    pub fn attach(&self, client: Arc<dyn DocumentClient>) -> SessionResult<()> {
        self.inner.attach_client(client)
    }

    /// Attach a custom collection adapter
    pub fn attach_collection(&self, collection: Arc<dyn SessionCollection>) -> SessionResult<()> {
        self.inner.attach_collection(collection)
    }

    /// Stop the eviction sweep. Safe to call more than once.
    pub fn close(&self) {
        if self.inner.stop_sweep() {
            tracing::debug!(collection = %self.inner.config.collection, "stopped expired session sweep");
        }
    }
}

impl std::fmt::Debug for DocumentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentStore")
            .field("state", &self.state())
            .field("config", &self.inner.config)
            .field("serializer", &self.inner.serializer)
            .field("encrypted", &self.inner.crypto.is_some())
            .field("fallback", &self.is_fallback())
            .finish()
    }
}

#[async_trait]
impl SessionStore for DocumentStore {
    async fn get(&self, sid: &str) -> SessionResult<Option<SessionData>> {
        if let Some(fallback) = &self.inner.fallback {
            return fallback.get(sid).await;
        }

        let inner = &self.inner;
        let key = inner.config.storage_key(sid);
        let Some(record) = inner.collection().await?.fetch_one(&key).await? else {
            return Ok(None);
        };

        if TtlPolicy::is_expired(record.expires, Utc::now()) {
            tracing::debug!(sid, "ignoring expired session");
            return Ok(None);
        }

        let session = inner.decode(record)?;
        inner.notifier.emit(StoreEvent::Get(sid.to_string()));
        Ok(Some(session))
    }

    async fn set(&self, sid: &str, session: &SessionData) -> SessionResult<()> {
        if let Some(fallback) = &self.inner.fallback {
            return fallback.set(sid, session).await;
        }

        let inner = &self.inner;
        let key = inner.config.storage_key(sid);
        let now = Utc::now();
        let record = SessionRecord {
            id: key.clone(),
            session: inner.encode(session)?,
            expires: Some(inner.policy.expires_for(session, now)),
            last_modified: inner.policy.lazy_touch_enabled().then_some(now),
        };

        inner.collection().await?.upsert(&key, &record).await?;

        inner.notifier.emit(StoreEvent::Upsert(sid.to_string()));
        inner.notifier.emit(StoreEvent::Set(sid.to_string()));
        Ok(())
    }

    async fn destroy(&self, sid: &str) -> SessionResult<()> {
        if let Some(fallback) = &self.inner.fallback {
            return fallback.destroy(sid).await;
        }

        let inner = &self.inner;
        let key = inner.config.storage_key(sid);
        inner.collection().await?.remove(&key).await?;
        inner.notifier.emit(StoreEvent::Destroy(sid.to_string()));
        Ok(())
    }

    async fn touch(&self, sid: &str, session: &SessionData) -> SessionResult<()> {
        if let Some(fallback) = &self.inner.fallback {
            return fallback.touch(sid, session).await;
        }

        let inner = &self.inner;
        let key = inner.config.storage_key(sid);
        let now = Utc::now();

        // Expiry is always refreshed; lastModified only once it is stale
        let update = RecordUpdate {
            expires: Some(inner.policy.expires_for(session, now)),
            last_modified: inner
                .policy
                .should_refresh_last_modified(session.last_modified, now)
                .then_some(now),
        };

        let outcome = inner.collection().await?.update(&key, update).await?;
        if !outcome.modified {
            return Err(SessionError::NotFound(format!(
                "Unable to find the session to touch: {}",
                sid
            )));
        }

        inner
            .notifier
            .emit(StoreEvent::Touch(sid.to_string(), session.clone()));
        Ok(())
    }

    async fn clear(&self) -> SessionResult<()> {
        if let Some(fallback) = &self.inner.fallback {
            return fallback.clear().await;
        }

        self.inner.collection().await?.remove_all().await
    }

    async fn length(&self) -> SessionResult<usize> {
        if let Some(fallback) = &self.inner.fallback {
            return fallback.length().await;
        }

        self.inner.collection().await?.count().await
    }

    async fn ids(&self) -> SessionResult<Vec<String>> {
        if let Some(fallback) = &self.inner.fallback {
            return fallback.ids().await;
        }

        Ok(self
            .inner
            .live_records()
            .await?
            .into_iter()
            .map(|record| record.id)
            .collect())
    }

    async fn all(&self) -> SessionResult<Vec<SessionData>> {
        if let Some(fallback) = &self.inner.fallback {
            return fallback.all().await;
        }

        let inner = &self.inner;
        let results = inner
            .live_records()
            .await?
            .into_iter()
            .map(|record| inner.decode(record))
            .collect::<SessionResult<Vec<_>>>()?;

        inner.notifier.emit(StoreEvent::All(results.clone()));
        Ok(results)
    }
}
