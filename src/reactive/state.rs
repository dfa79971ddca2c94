//! Deep-observable structured value.

use crate::error::{MirrorError, Result};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::merge::merge_fields;
use super::WatchId;

/// Who changed an observable value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MutationOrigin {
    /// A holder of the value mutated it.
    Local,
    /// The initial read from the store was merged in.
    Load,
    /// A change notification from the store was merged in.
    Remote,
}

/// A committed change, as seen by watchers.
#[derive(Debug)]
pub struct Mutation<'a> {
    pub origin: MutationOrigin,
    /// Full serialized value after the change.
    pub snapshot: &'a Value,
}

type StateWatcher = Arc<dyn Fn(&Mutation<'_>) + Send + Sync>;

/// Current value together with its serialized form.
struct Slot<V> {
    value: V,
    snapshot: Value,
}

struct Inner<V> {
    slot: RwLock<Slot<V>>,
    watchers: RwLock<Vec<(WatchId, StateWatcher)>>,
    next_id: AtomicU64,
}

/// A mutable value whose every change is observable.
///
/// Clones share the same value. Changes are detected by comparing the
/// serialized form before and after, so nested edits are seen and no-op
/// edits are not. Watchers run after the value lock is released.
pub struct Observable<V> {
    inner: Arc<Inner<V>>,
}

impl<V> Clone for Observable<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V> Observable<V>
where
    V: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    /// Wrap an initial value. It must serialize to a JSON object.
    pub fn new(initial: V) -> Result<Self> {
        let snapshot = object_snapshot(&initial)?;
        Ok(Self {
            inner: Arc::new(Inner {
                slot: RwLock::new(Slot {
                    value: initial,
                    snapshot,
                }),
                watchers: RwLock::new(Vec::new()),
                next_id: AtomicU64::new(1),
            }),
        })
    }

    /// Clone of the current value.
    pub fn get(&self) -> V {
        self.inner.slot.read().value.clone()
    }

    /// Borrow the current value.
    pub fn read<R>(&self, f: impl FnOnce(&V) -> R) -> R {
        f(&self.inner.slot.read().value)
    }

    /// Serialized form of the current value.
    pub fn snapshot(&self) -> Value {
        self.inner.slot.read().snapshot.clone()
    }

    /// Mutate the value.
    ///
    /// `f` edits a draft; the draft is committed only if it still serializes
    /// to an object. Watchers hear about it only if something changed.
    ///
    /// No lock is held while `f` runs, so it may read this value through
    /// any handle.
    pub fn update<R>(&self, f: impl FnOnce(&mut V) -> R) -> Result<R> {
        let mut draft = self.inner.slot.read().value.clone();
        let out = f(&mut draft);
        let snapshot = object_snapshot(&draft)?;

        {
            let mut slot = self.inner.slot.write();
            if snapshot == slot.snapshot {
                return Ok(out);
            }
            slot.value = draft;
            slot.snapshot = snapshot.clone();
        }

        self.notify(MutationOrigin::Local, &snapshot);
        Ok(out)
    }

    /// Replace the whole value. Returns true if it changed.
    pub fn set(&self, value: V) -> Result<bool> {
        let snapshot = object_snapshot(&value)?;
        {
            let mut slot = self.inner.slot.write();
            if snapshot == slot.snapshot {
                return Ok(false);
            }
            slot.value = value;
            slot.snapshot = snapshot.clone();
        }

        self.notify(MutationOrigin::Local, &snapshot);
        Ok(true)
    }

    /// Overwrite fields from `source`, keeping this container.
    ///
    /// A non-object `source` is ignored. If the merged object does not fit
    /// `V`, the value is left as it was.
    pub fn merge(&self, source: &Value, origin: MutationOrigin) -> Result<bool> {
        let snapshot = {
            let mut slot = self.inner.slot.write();
            let Value::Object(mut fields) = slot.snapshot.clone() else {
                return Err(MirrorError::InvalidState(
                    "observable snapshot is not an object".to_string(),
                ));
            };
            if !merge_fields(&mut fields, source) {
                return Ok(false);
            }

            let value: V = serde_json::from_value(Value::Object(fields))
                .map_err(|e| MirrorError::Deserialization(e.to_string()))?;
            let snapshot = object_snapshot(&value)?;
            if snapshot == slot.snapshot {
                return Ok(false);
            }
            slot.value = value;
            slot.snapshot = snapshot.clone();
            snapshot
        };

        self.notify(origin, &snapshot);
        Ok(true)
    }

    /// Call `f` after every committed change.
    pub fn watch<F>(&self, f: F) -> WatchId
    where
        F: Fn(&Mutation<'_>) + Send + Sync + 'static,
    {
        let id = WatchId(self.inner.next_id.fetch_add(1, Ordering::SeqCst));
        self.inner.watchers.write().push((id, Arc::new(f)));
        id
    }

    pub fn unwatch(&self, id: WatchId) -> bool {
        let mut watchers = self.inner.watchers.write();
        let before = watchers.len();
        watchers.retain(|(wid, _)| *wid != id);
        watchers.len() != before
    }

    pub fn watcher_count(&self) -> usize {
        self.inner.watchers.read().len()
    }

    /// Whether both handles refer to the same container.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn notify(&self, origin: MutationOrigin, snapshot: &Value) {
        let watchers: Vec<StateWatcher> = self
            .inner
            .watchers
            .read()
            .iter()
            .map(|(_, w)| Arc::clone(w))
            .collect();

        let mutation = Mutation { origin, snapshot };
        for watcher in watchers {
            watcher(&mutation);
        }
    }
}

impl<V: std::fmt::Debug> std::fmt::Debug for Observable<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Observable")
            .field(&self.inner.slot.read().value)
            .finish()
    }
}

fn object_snapshot<V: Serialize>(value: &V) -> Result<Value> {
    match serde_json::to_value(value)? {
        snapshot @ Value::Object(_) => Ok(snapshot),
        other => Err(MirrorError::InvalidState(format!(
            "expected an object, got {}",
            json_kind(&other)
        ))),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
