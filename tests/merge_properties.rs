//! Property tests for field-wise merging and convergence.

use proptest::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use storage_mirror::{merge_fields, MemoryStorage, RecordOptions, StorageArea, SyncedRecord};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct Counters {
    a: i64,
    b: i64,
    c: i64,
}

fn to_object(fields: &BTreeMap<String, i64>) -> Map<String, Value> {
    fields
        .iter()
        .map(|(k, v)| (k.clone(), json!(v)))
        .collect()
}

#[derive(Clone, Debug)]
enum Step {
    Local { field: usize, value: i64, fail: bool },
    Remote { field: usize, value: i64 },
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        (0..3usize, any::<i64>(), any::<bool>())
            .prop_map(|(field, value, fail)| Step::Local { field, value, fail }),
        (0..3usize, any::<i64>()).prop_map(|(field, value)| Step::Remote { field, value }),
    ]
}

const FIELDS: [&str; 3] = ["a", "b", "c"];

fn apply_step(store: &MemoryStorage, record: &SyncedRecord<Counters>, step: &Step) {
    match *step {
        Step::Local { field, value, fail } => {
            if fail {
                store.fail_next_set(Some("injected"));
            }
            record
                .state()
                .update(|c| match field {
                    0 => c.a = value,
                    1 => c.b = value,
                    _ => c.c = value,
                })
                .unwrap();
        }
        Step::Remote { field, value } => {
            let mut fields = match store.peek(StorageArea::Local, "counters") {
                Some(Value::Object(map)) => map,
                _ => Map::new(),
            };
            fields.insert(FIELDS[field].to_string(), json!(value));
            store.put(StorageArea::Local, "counters", Value::Object(fields));
        }
    }
}

/// Without an error on record, every field the store holds matches the local value.
fn assert_store_fields_match(
    store: &MemoryStorage,
    record: &SyncedRecord<Counters>,
) -> Result<(), TestCaseError> {
    if record.error().get().is_some() {
        return Ok(());
    }
    if let Some(Value::Object(remote)) = store.peek(StorageArea::Local, "counters") {
        let local = record.state().snapshot();
        for (k, v) in remote {
            prop_assert_eq!(&local[&k], &v);
        }
    }
    Ok(())
}

proptest! {
    #[test]
    fn merge_overwrites_only_source_fields(
        target in prop::collection::btree_map("[a-e]", any::<i64>(), 0..5),
        source in prop::collection::btree_map("[a-e]", any::<i64>(), 0..5),
    ) {
        let mut merged = to_object(&target);
        let changed = merge_fields(&mut merged, &Value::Object(to_object(&source)));

        for (k, v) in &source {
            prop_assert_eq!(&merged[k], &json!(v));
        }
        for (k, v) in &target {
            if !source.contains_key(k) {
                prop_assert_eq!(&merged[k], &json!(v));
            }
        }
        let differs = source.iter().any(|(k, v)| target.get(k) != Some(v));
        prop_assert_eq!(changed, differs);
    }

    #[test]
    fn remote_change_touches_only_its_fields(
        initial in (any::<i64>(), any::<i64>(), any::<i64>()),
        update in prop::collection::btree_map("[abc]", any::<i64>(), 0..3),
    ) {
        let store = Arc::new(MemoryStorage::new());
        let default_state = Counters { a: initial.0, b: initial.1, c: initial.2 };
        let mut record =
            SyncedRecord::new(store.clone(), RecordOptions::new("counters", default_state.clone()))
                .unwrap();
        record.process_pending();

        store.put(StorageArea::Local, "counters", Value::Object(to_object(&update)));
        record.process_pending();

        let state = record.state().get();
        let expect = |name: &str, default: i64| *update.get(name).unwrap_or(&default);
        prop_assert_eq!(state.a, expect("a", default_state.a));
        prop_assert_eq!(state.b, expect("b", default_state.b));
        prop_assert_eq!(state.c, expect("c", default_state.c));
        prop_assert!(store.writes_to(StorageArea::Local, "counters").is_empty());
    }

    #[test]
    fn converges_at_quiescence_without_error(steps in prop::collection::vec(step(), 1..20)) {
        let store = Arc::new(MemoryStorage::new());
        let mut record = SyncedRecord::new(
            store.clone(),
            RecordOptions::new("counters", Counters { a: 0, b: 0, c: 0 }),
        )
        .unwrap();
        record.process_pending();

        for step in &steps {
            apply_step(&store, &record, step);
            record.process_pending();
        }

        prop_assert!(record.is_quiescent());
        assert_store_fields_match(&store, &record)?;
    }

    #[test]
    fn converges_when_pumped_once(steps in prop::collection::vec(step(), 1..20)) {
        let store = Arc::new(MemoryStorage::new());
        let mut record = SyncedRecord::new(
            store.clone(),
            RecordOptions::new("counters", Counters { a: 0, b: 0, c: 0 }),
        )
        .unwrap();
        record.process_pending();

        for step in &steps {
            apply_step(&store, &record, step);
        }
        record.process_pending();

        prop_assert!(record.is_quiescent());
        assert_store_fields_match(&store, &record)?;
    }
}
