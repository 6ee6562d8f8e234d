//! Session store implementations

pub mod collection;
mod document;
mod memory;
mod traits;

pub use collection::{
    DocumentCollection, RecordUpdate, SessionCollection, SessionRecord, UpdateOutcome,
};
pub use document::{DocumentStore, StoreState};
pub use memory::MemoryStore;
pub use traits::SessionStore;
