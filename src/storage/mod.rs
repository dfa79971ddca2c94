//! Storage capability consumed by synchronized records.
//!
//! A backend is an asynchronous, namespaced key-value store:
//! - `get` reads one key with a fallback for when it is absent
//! - `set` replaces one key's value
//! - `subscribe` streams committed changes for every area
//!
//! Reads and writes report their outcome through a completion callback that
//! the backend calls exactly once, from whatever thread it likes.
//!
//! # Example
//!
//! ```ignore
//! let store = MemoryStorage::new();
//! let changes = store.subscribe();
//!
//! store.set(StorageArea::Local, "settings", json!({"theme": "dark"}), Box::new(|result| {
//!     if let Err(failure) = result {
//!         eprintln!("write failed: {}", failure);
//!     }
//! }));
//!
//! let event = changes.recv()?;
//! assert_eq!(event.area, StorageArea::Local);
//! ```

mod memory;
mod subscriptions;

pub use memory::{CompletionMode, MemoryStorage, MemoryStorageConfig, StorageCall};
pub use subscriptions::{ChangeSubscription, SubscriptionId, SubscriptionManager};

use crate::error::StoreFailure;
use crate::types::StorageArea;
use serde_json::Value;

/// Outcome of a single store operation.
pub type StoreResult<T> = std::result::Result<T, StoreFailure>;

/// Callback receiving the outcome of a store operation.
pub type Completion<T> = Box<dyn FnOnce(StoreResult<T>) + Send + 'static>;

/// An asynchronous, namespaced key-value store.
///
/// # Invariants
///
/// - `done` is called exactly once per `get`/`set`
/// - a successful `set` is visible to subsequent `get`s
/// - every committed change that altered a value is broadcast to subscribers
/// - a successful `set` broadcasts its change before calling `done`
pub trait StorageBackend: Send + Sync {
    /// Read `key` from `area`, yielding `fallback` if the key is absent.
    fn get(&self, area: StorageArea, key: &str, fallback: Value, done: Completion<Value>);

    /// Replace the value of `key` in `area`.
    fn set(&self, area: StorageArea, key: &str, value: Value, done: Completion<()>);

    /// Start receiving change notifications for all areas.
    fn subscribe(&self) -> ChangeSubscription;
}
