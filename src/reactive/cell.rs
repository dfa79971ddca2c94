//! Single-slot reactive cell.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::WatchId;

type CellWatcher<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct CellInner<T> {
    value: RwLock<T>,
    watchers: RwLock<Vec<(WatchId, CellWatcher<T>)>>,
    next_id: AtomicU64,
}

/// A shared, observable value.
///
/// Clones share the same slot. Watchers run only when a write actually
/// changes the value, so repeated identical writes are silent.
pub struct ReactiveCell<T> {
    inner: Arc<CellInner<T>>,
}

/// Nullable error message owned by a synchronized record.
pub type ErrorSlot = ReactiveCell<Option<String>>;

impl<T> Clone for ReactiveCell<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone + PartialEq + Send + Sync + 'static> ReactiveCell<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Arc::new(CellInner {
                value: RwLock::new(value),
                watchers: RwLock::new(Vec::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn get(&self) -> T {
        self.inner.value.read().clone()
    }

    /// Store a value. Returns true if it differed from the previous one.
    pub fn set(&self, value: T) -> bool {
        {
            let mut current = self.inner.value.write();
            if *current == value {
                return false;
            }
            *current = value.clone();
        }

        let watchers: Vec<CellWatcher<T>> = self
            .inner
            .watchers
            .read()
            .iter()
            .map(|(_, w)| Arc::clone(w))
            .collect();
        for watcher in watchers {
            watcher(&value);
        }
        true
    }

    /// Call `f` with the new value after every change.
    pub fn watch<F>(&self, f: F) -> WatchId
    where
        F: Fn(&T) + Send + Sync + 'static,
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

    /// Whether both handles refer to the same slot.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl ReactiveCell<Option<String>> {
    /// True while an error message is recorded.
    pub fn has_error(&self) -> bool {
        self.inner.value.read().is_some()
    }

    /// Record a failure message.
    pub fn raise(&self, message: impl Into<String>) -> bool {
        self.set(Some(message.into()))
    }

    /// Clear the recorded failure, if any.
    pub fn clear(&self) -> bool {
        self.set(None)
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for ReactiveCell<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ReactiveCell")
            .field(&*self.inner.value.read())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_cell_notifies_only_on_change() {
        let cell = ErrorSlot::new(None);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        cell.watch(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(!cell.clear());
        assert!(cell.raise("boom"));
        assert!(!cell.raise("boom"));
        assert!(cell.clear());
        assert!(!cell.clear());

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_clones_share_slot() {
        let cell = ErrorSlot::new(None);
        let other = cell.clone();
        other.raise("");
        assert!(cell.has_error());
        assert_eq!(cell.get(), Some(String::new()));
        assert!(cell.ptr_eq(&other));
    }

    #[test]
    fn test_unwatch() {
        let cell = ReactiveCell::new(0u32);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let id = cell.watch(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        cell.set(1);
        assert!(cell.unwatch(id));
        assert!(!cell.unwatch(id));
        cell.set(2);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
