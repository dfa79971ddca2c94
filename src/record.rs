//! Synchronized record: a live local mirror of one store slot.
//!
//! Three parts cooperate:
//! - the loader reads the slot once at creation and merges it in
//! - the writer persists the full value after every local mutation
//! - the listener merges changes made by other contexts
//!
//! Outcomes of store operations and change notifications are queued and
//! applied only when the owner pumps the record, so the value and the error
//! slot are only ever touched from the owner's thread. Queued outcomes are
//! always applied before queued notifications.

use crate::error::{Result, StoreFailure};
use crate::reactive::{ErrorSlot, MutationOrigin, Observable, WatchId};
use crate::storage::{ChangeSubscription, StorageBackend, StoreResult};
use crate::types::{RecordIdentity, RecordOptions, StorageArea, StorageEvent};
use crossbeam_channel::{never, unbounded, Receiver, Select, Sender, TryRecvError};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Outcome of an issued store operation, waiting to be applied.
#[derive(Debug)]
enum Settled {
    Loaded(StoreResult<Value>),
    Written { seq: u64, result: StoreResult<()> },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum WriteStatus {
    Pending,
    Stored,
    Failed,
}

#[derive(Debug)]
struct IssuedWrite {
    seq: u64,
    snapshot: Value,
    status: WriteStatus,
}

/// How a change notification relates to this record's own writes.
#[derive(Debug, PartialEq, Eq)]
enum Echo {
    /// Committed by someone else.
    Foreign,
    /// The commit of one of our writes.
    Own { newer_pending: bool, newer_failed: bool },
}

/// Writes this record issued whose change notification may still arrive.
///
/// Entries are matched against notifications by value; a notification
/// claims the oldest matching write that has not failed.
#[derive(Debug, Default)]
struct WriteLog {
    next_seq: u64,
    entries: VecDeque<IssuedWrite>,
}

impl WriteLog {
    fn issue(&mut self, snapshot: Value) -> u64 {
        self.next_seq += 1;
        self.entries.push_back(IssuedWrite {
            seq: self.next_seq,
            snapshot,
            status: WriteStatus::Pending,
        });
        self.next_seq
    }

    fn resolve(&mut self, seq: u64, status: WriteStatus) {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.seq == seq) {
            entry.status = status;
        }
    }

    fn claim(&mut self, value: &Value) -> Echo {
        let Some(index) = self
            .entries
            .iter()
            .position(|e| e.status != WriteStatus::Failed && e.snapshot == *value)
        else {
            return Echo::Foreign;
        };

        let claimed = self.entries.remove(index).map(|e| e.seq).unwrap_or_default();
        let newer = self.entries.iter().filter(|e| e.seq > claimed);
        let (mut newer_pending, mut newer_failed) = (false, false);
        for entry in newer {
            newer_pending |= entry.status == WriteStatus::Pending;
            newer_failed |= entry.status == WriteStatus::Failed;
        }
        Echo::Own {
            newer_pending,
            newer_failed,
        }
    }

    /// Drop failed writes no older write can still be compared against.
    fn prune(&mut self) {
        while self
            .entries
            .front()
            .is_some_and(|e| e.status == WriteStatus::Failed)
        {
            self.entries.pop_front();
        }
    }

    fn clear(&mut self) {
        self.entries.clear();
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// A value kept in step with one `(key, area)` slot of a store.
///
/// Mutate [`state`](Self::state) as a local value; every change is written
/// to the store in full. Failures never surface as errors: the last one is
/// kept in [`error`](Self::error) until the next successful read or write.
pub struct SyncedRecord<V>
where
    V: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    identity: RecordIdentity,
    state: Observable<V>,
    error: ErrorSlot,

    /// Completions posted by store callbacks.
    settled: Receiver<Settled>,
    /// Change notifications for every area.
    changes: Receiver<StorageEvent>,
    /// Keeps the change subscription alive.
    _subscription: Option<ChangeSubscription>,

    /// Writer registration on `state`.
    writer: WatchId,
    /// Writes awaiting their change notification.
    writes: Arc<Mutex<WriteLog>>,
    /// Operations issued whose outcome has not been applied.
    in_flight: Arc<AtomicUsize>,
}

impl<V> SyncedRecord<V>
where
    V: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    /// Bind `options.key` in `options.storage_area` to a new local value.
    ///
    /// The value starts as `options.default_state`; the initial read is
    /// issued immediately and applied by the next `process_*` call.
    ///
    /// # Errors
    ///
    /// Returns an error if the default state does not serialize to an object.
    pub fn new(store: Arc<dyn StorageBackend>, options: RecordOptions<V>) -> Result<Self> {
        let identity = options.identity();
        let state = Observable::new(options.default_state)?;
        let fallback = state.snapshot();
        let error = ErrorSlot::new(None);
        let writes = Arc::new(Mutex::new(WriteLog::default()));
        let in_flight = Arc::new(AtomicUsize::new(0));
        let (settled_tx, settled) = unbounded();

        // Listener first so nothing committed after the read is missed.
        let subscription = store.subscribe();
        let changes = subscription.receiver.clone();

        let writer = Self::install_writer(
            &state,
            Arc::clone(&store),
            identity.clone(),
            settled_tx.clone(),
            Arc::clone(&writes),
            Arc::clone(&in_flight),
        );

        debug!(record = %identity, "loading record");
        in_flight.fetch_add(1, Ordering::SeqCst);
        store.get(
            identity.area,
            &identity.key,
            fallback,
            Box::new(move |result| {
                let _ = settled_tx.send(Settled::Loaded(result));
            }),
        );

        Ok(Self {
            identity,
            state,
            error,
            settled,
            changes,
            _subscription: Some(subscription),
            writer,
            writes,
            in_flight,
        })
    }

    /// Register the writer: one full-value write per local mutation.
    fn install_writer(
        state: &Observable<V>,
        store: Arc<dyn StorageBackend>,
        identity: RecordIdentity,
        settled: Sender<Settled>,
        writes: Arc<Mutex<WriteLog>>,
        in_flight: Arc<AtomicUsize>,
    ) -> WatchId {
        state.watch(move |mutation| {
            if mutation.origin != MutationOrigin::Local {
                return;
            }

            let seq = writes.lock().issue(mutation.snapshot.clone());
            debug!(record = %identity, seq, "writing record");
            in_flight.fetch_add(1, Ordering::SeqCst);
            let settled = settled.clone();
            store.set(
                identity.area,
                &identity.key,
                mutation.snapshot.clone(),
                Box::new(move |result| {
                    let _ = settled.send(Settled::Written { seq, result });
                }),
            );
        })
    }

    // --- Accessors ---

    /// The live local value.
    pub fn state(&self) -> &Observable<V> {
        &self.state
    }

    /// Message of the last failed read or write, cleared by the next success.
    pub fn error(&self) -> &ErrorSlot {
        &self.error
    }

    pub fn identity(&self) -> &RecordIdentity {
        &self.identity
    }

    pub fn key(&self) -> &str {
        &self.identity.key
    }

    pub fn area(&self) -> StorageArea {
        self.identity.area
    }

    /// Reads and writes issued whose outcome has not been applied yet.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// No operation in flight and no notification waiting.
    pub fn is_quiescent(&self) -> bool {
        self.in_flight() == 0 && self.settled.is_empty() && self.changes.is_empty()
    }

    // --- Event processing ---

    /// Apply every completion and notification that is ready. Never blocks.
    ///
    /// Returns how many were applied.
    pub fn process_pending(&mut self) -> usize {
        let mut applied = 0;
        while self.apply_ready() {
            applied += 1;
        }
        applied
    }

    /// Apply the next completion or notification, waiting up to `timeout`.
    ///
    /// Completions are taken before notifications whenever both are ready.
    pub fn process_next(&mut self, timeout: Duration) -> bool {
        if self.apply_ready() {
            return true;
        }
        if timeout.is_zero() {
            return false;
        }

        let ready = {
            let mut sel = Select::new();
            sel.recv(&self.settled);
            sel.recv(&self.changes);
            sel.ready_timeout(timeout).is_ok()
        };
        ready && self.apply_ready()
    }

    /// Keep applying events until quiescent or `timeout` elapses.
    ///
    /// Returns true if the record reached quiescence.
    pub fn settle(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            self.process_pending();
            if self.is_quiescent() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            self.process_next(deadline - now);
        }
    }

    /// Apply one ready event without blocking.
    fn apply_ready(&mut self) -> bool {
        let applied = if let Ok(outcome) = self.settled.try_recv() {
            self.apply_settled(outcome);
            true
        } else {
            match self.changes.try_recv() {
                Ok(event) => {
                    self.apply_remote(&event);
                    true
                }
                Err(TryRecvError::Empty) => false,
                Err(TryRecvError::Disconnected) => {
                    // Store went away; stop listening.
                    warn!(record = %self.identity, "change subscription closed");
                    self.changes = never();
                    self._subscription = None;
                    false
                }
            }
        };

        if applied {
            self.trim_write_log();
        }
        applied
    }

    /// Once quiescent every echo has been seen, so nothing is worth keeping.
    fn trim_write_log(&self) {
        let mut writes = self.writes.lock();
        if self.in_flight() == 0 && self.changes.is_empty() {
            writes.clear();
        } else {
            writes.prune();
        }
    }

    fn apply_settled(&mut self, outcome: Settled) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        match outcome {
            Settled::Loaded(Ok(value)) => match self.state.merge(&value, MutationOrigin::Load) {
                Ok(changed) => {
                    debug!(record = %self.identity, changed, "record loaded");
                    self.error.clear();
                }
                Err(e) => {
                    warn!(record = %self.identity, error = %e, "stored record does not fit local state");
                    self.error.raise(e.to_string());
                }
            },
            Settled::Loaded(Err(failure)) => {
                warn!(record = %self.identity, error = %failure, "failed to load record");
                self.record_failure(&failure);
            }
            Settled::Written { seq, result: Ok(()) } => {
                self.writes.lock().resolve(seq, WriteStatus::Stored);
                self.error.clear();
            }
            Settled::Written {
                seq,
                result: Err(failure),
            } => {
                warn!(record = %self.identity, seq, error = %failure, "failed to write record");
                self.writes.lock().resolve(seq, WriteStatus::Failed);
                self.record_failure(&failure);
            }
        }
    }

    fn record_failure(&self, failure: &StoreFailure) {
        self.error.raise(failure.message_or_empty());
    }

    fn apply_remote(&self, event: &StorageEvent) {
        let Some(change) = event.change_for(&self.identity) else {
            return;
        };
        let Some(ref new_value) = change.new_value else {
            return;
        };

        // Our own commit must not undo a newer local change that is still
        // being written, or whose failure is on record.
        let echo = self.writes.lock().claim(new_value);
        if let Echo::Own {
            newer_pending,
            newer_failed,
        } = echo
        {
            if newer_pending || (newer_failed && self.error.has_error()) {
                debug!(record = %self.identity, "skipping superseded echo of own write");
                return;
            }
        }

        match self.state.merge(new_value, MutationOrigin::Remote) {
            Ok(changed) => {
                if changed {
                    debug!(record = %self.identity, "merged remote change");
                }
            }
            Err(e) => {
                warn!(record = %self.identity, error = %e, "ignoring malformed remote change");
            }
        }
    }
}

impl<V> Drop for SyncedRecord<V>
where
    V: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        self.state.unwatch(self.writer);
    }
}

impl<V> std::fmt::Debug for SyncedRecord<V>
where
    V: Serialize + DeserializeOwned + Clone + Send + Sync + std::fmt::Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncedRecord")
            .field("identity", &self.identity)
            .field("state", &self.state)
            .field("error", &self.error)
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

/// Create a synchronized record from its parts.
///
/// Shorthand for [`SyncedRecord::new`] with [`RecordOptions`].
pub fn synced_record<V>(
    store: Arc<dyn StorageBackend>,
    key: impl Into<String>,
    default_state: V,
    storage_area: Option<StorageArea>,
) -> Result<SyncedRecord<V>>
where
    V: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    let options =
        RecordOptions::new(key, default_state).in_area(storage_area.unwrap_or_default());
    SyncedRecord::new(store, options)
}
