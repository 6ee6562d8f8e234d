//! # express-docstore-session
//!
//! Express-session compatible session store backed by a document database.
//!
//! Sessions are kept as one document per session id in a named collection,
//! with the session payload, its expiry and (optionally) a last-modified
//! timestamp used for lazy touch.
//!
//! ## Features
//!
//! - **Pluggable clients**: anything implementing [`DocumentClient`]; an
//!   in-process client and a Redis-backed client ship with the crate
//! - **Connection strategies**: a URL, an existing client, or a client that
//!   resolves later
//! - **Expiry**: read-time filtering, plus native or interval-based eviction
//! - **Lazy touch**: skip redundant writes to recently modified sessions
//! - **Custom serialization** and optional payload encryption
//! - **Events**: lifecycle and per-operation notifications
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use express_docstore_session::{
//!     DocumentStore, MemoryDocumentClient, SessionData, SessionStore, StoreEvent, StoreOptions,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = DocumentStore::new(
//!         StoreOptions::new()
//!             .with_client(MemoryDocumentClient::new())
//!             .with_collection("sessions")
//!             .with_touch_after(3600),
//!     )?;
//!
//!     store.events().on_any(|event| {
//!         if let StoreEvent::Set(sid) = event {
//!             tracing::info!("saved {}", sid);
//!         }
//!     });
//!
//!     let mut session = SessionData::new(86400);
//!     session.set("views", 1);
//!     store.set("sid", &session).await?;
//!
//!     let views: Option<i32> = store.get("sid").await?.and_then(|s| s.get("views"));
//!     Ok(())
//! }
//! ```

pub mod callback;
pub mod client;
pub mod config;
pub mod crypto;
pub mod error;
pub mod events;
pub mod policy;
pub mod serializer;
pub mod session;
pub mod store;

pub use callback::complete;
pub use client::{DocumentClient, MemoryDocumentClient};
pub use config::{AutoRemove, StoreConfig, StoreOptions};
pub use crypto::SessionCrypto;
pub use error::{SessionError, SessionResult};
pub use events::{EventKind, EventNotifier, StoreEvent, SubscriptionId};
pub use policy::TtlPolicy;
pub use serializer::{Payload, Serializer};
pub use session::{SessionCookie, SessionData};
pub use store::{
    DocumentCollection, DocumentStore, MemoryStore, SessionCollection, SessionStore, StoreState,
};

#[cfg(feature = "redis-store")]
pub use client::RedisDocumentClient;
