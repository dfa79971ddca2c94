//! Error handling and edge case tests.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use storage_mirror::{
    synced_record, MemoryStorage, MemoryStorageConfig, MirrorError, RecordOptions, StorageArea,
    StorageBackend, SyncedRecord,
};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct Profile {
    name: String,
    visits: u32,
}

fn default_profile() -> Profile {
    Profile {
        name: "guest".to_string(),
        visits: 0,
    }
}

fn open_in(store: &Arc<MemoryStorage>, area: StorageArea) -> SyncedRecord<Profile> {
    let options = RecordOptions::new("profile", default_profile()).in_area(area);
    let mut record = SyncedRecord::new(store.clone(), options).unwrap();
    record.process_pending();
    record
}

// --- Load Errors ---

#[test]
fn test_failed_load_keeps_default() {
    let store = Arc::new(MemoryStorage::new());
    store.put(StorageArea::Local, "profile", json!({"name": "ada", "visits": 3}));
    store.fail_next_get(Some("storage unavailable"));

    let record = open_in(&store, StorageArea::Local);

    assert_eq!(record.state().get(), default_profile());
    assert_eq!(record.error().get().as_deref(), Some("storage unavailable"));
}

#[test]
fn test_failed_load_without_message() {
    let store = Arc::new(MemoryStorage::new());
    store.fail_next_get(None);

    let record = open_in(&store, StorageArea::Local);

    assert_eq!(record.error().get(), Some(String::new()));
    assert!(record.error().has_error());
}

#[test]
fn test_write_after_failed_load_clears_error() {
    let store = Arc::new(MemoryStorage::new());
    store.fail_next_get(Some("storage unavailable"));
    let mut record = open_in(&store, StorageArea::Local);

    record.state().update(|p| p.visits += 1).unwrap();
    record.process_pending();

    assert_eq!(record.error().get(), None);
    assert_eq!(
        store.peek(StorageArea::Local, "profile"),
        Some(json!({"name": "guest", "visits": 1}))
    );
}

#[test]
fn test_successful_load_clears_earlier_error() {
    let store = Arc::new(MemoryStorage::with_config(MemoryStorageConfig::deferred()));
    let mut record =
        SyncedRecord::new(store.clone(), RecordOptions::new("profile", default_profile())).unwrap();

    // A write issued before the load completes fails first.
    store.fail_next_set(Some("busy"));
    record.state().update(|p| p.visits = 1).unwrap();
    store.complete_at(1);
    record.process_pending();
    assert_eq!(record.error().get().as_deref(), Some("busy"));

    store.complete_next();
    record.process_pending();
    assert_eq!(record.error().get(), None);
}

#[test]
fn test_stored_value_of_wrong_shape() {
    let store = Arc::new(MemoryStorage::new());
    store.put(StorageArea::Local, "profile", json!({"visits": -1}));

    let record = open_in(&store, StorageArea::Local);

    assert!(record.error().has_error());
    assert_eq!(record.state().get(), default_profile());
}

#[test]
fn test_stored_non_object_is_ignored() {
    let store = Arc::new(MemoryStorage::new());
    store.put(StorageArea::Local, "profile", json!("just a string"));

    let record = open_in(&store, StorageArea::Local);

    assert_eq!(record.state().get(), default_profile());
    assert_eq!(record.error().get(), None);
}

// --- Write Errors ---

#[test]
fn test_managed_area_rejects_writes() {
    let store = Arc::new(MemoryStorage::new());
    store.put(StorageArea::Managed, "profile", json!({"name": "admin"}));
    let mut record = open_in(&store, StorageArea::Managed);
    assert_eq!(record.state().get().name, "admin");

    record.state().update(|p| p.name = "me".to_string()).unwrap();
    record.process_pending();

    assert_eq!(record.error().get().as_deref(), Some("This is a read-only store."));
    assert_eq!(record.state().get().name, "me");
    assert_eq!(
        store.peek(StorageArea::Managed, "profile"),
        Some(json!({"name": "admin"}))
    );
}

#[test]
fn test_sync_quota_exceeded() {
    let store = Arc::new(MemoryStorage::new());
    let mut record = open_in(&store, StorageArea::Sync);

    record.state().update(|p| p.name = "x".repeat(10_000)).unwrap();
    record.process_pending();
    assert_eq!(
        record.error().get().as_deref(),
        Some("QUOTA_BYTES_PER_ITEM quota exceeded")
    );

    record.state().update(|p| p.name = "short".to_string()).unwrap();
    record.process_pending();
    assert_eq!(record.error().get(), None);
}

// --- Construction Errors ---

#[test]
fn test_non_object_default_is_rejected() {
    let store: Arc<dyn StorageBackend> = Arc::new(MemoryStorage::new());

    let result = synced_record(store, "numbers", vec![1, 2, 3], None);

    assert!(matches!(result, Err(MirrorError::InvalidState(_))));
}

#[test]
fn test_unknown_area_name() {
    let result = "cloud".parse::<StorageArea>();
    assert!(matches!(result, Err(MirrorError::InvalidArea(ref name)) if name == "cloud"));
}

#[test]
fn test_mutation_that_breaks_shape_is_rejected() {
    let store = Arc::new(MemoryStorage::new());
    let record = SyncedRecord::new(
        store.clone(),
        RecordOptions::new("flags", json!({"enabled": true})),
    )
    .unwrap();

    let result = record.state().update(|v| *v = json!(null));

    assert!(matches!(result, Err(MirrorError::InvalidState(_))));
    assert_eq!(record.state().get(), json!({"enabled": true}));
    assert!(store.writes_to(StorageArea::Local, "flags").is_empty());
}
