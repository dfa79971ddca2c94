//! # Storage Mirror
//!
//! A reactive in-memory mirror of a single record kept in an asynchronous,
//! namespaced key-value store (such as a browser extension's storage areas).
//!
//! ## Core Concepts
//!
//! - **Synchronized record**: a local value bound to one `(key, area)` slot
//! - **Loader**: reads the slot once at creation and merges it field by field
//! - **Writer**: writes the full local value after every local mutation
//! - **Listener**: merges changes committed by other contexts
//! - **Error slot**: last failed read/write message, cleared by the next success
//!
//! ## Example
//!
//! ```ignore
//! use storage_mirror::{MemoryStorage, RecordOptions, SyncedRecord};
//!
//! #[derive(Clone, Serialize, Deserialize)]
//! struct Settings { theme: String }
//!
//! let store = Arc::new(MemoryStorage::new());
//! let mut record = SyncedRecord::new(store, RecordOptions::new("settings", Settings {
//!     theme: "light".into(),
//! }))?;
//! record.process_pending();
//!
//! // Writes {"theme": "dark"} to the store
//! record.state().update(|s| s.theme = "dark".into())?;
//! record.process_pending();
//! assert_eq!(record.error().get(), None);
//! ```

pub mod error;
pub mod reactive;
pub mod record;
pub mod storage;
pub mod types;

// Re-exports
pub use error::{MirrorError, Result, StoreFailure};
pub use reactive::{
    merge_fields, ErrorSlot, Mutation, MutationOrigin, Observable, ReactiveCell, WatchId,
};
pub use record::{synced_record, SyncedRecord};
pub use storage::{
    ChangeSubscription, Completion, CompletionMode, MemoryStorage, MemoryStorageConfig,
    StorageBackend, StorageCall, StoreResult, SubscriptionId, SubscriptionManager,
};
pub use types::*;
