//! Storage layer: Firestore over REST with a polling change feed, and an in-memory store.

mod memory;
pub use memory::MemoryStore;

#[cfg(feature = "firestore")]
mod firestore;
#[cfg(feature = "firestore")]
mod snapshot;
#[cfg(feature = "firestore")]
pub use firestore::{FIRESTORE_BASE_URL, FirestoreStore};
#[cfg(feature = "firestore")]
pub use snapshot::Snapshot;
