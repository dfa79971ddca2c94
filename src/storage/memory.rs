//! In-process storage backend.

use crate::error::StoreFailure;
use crate::types::{StorageArea, StorageChange, StorageEvent};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};

use super::subscriptions::{ChangeSubscription, SubscriptionManager};
use super::{Completion, StorageBackend, StoreResult};

const READ_ONLY_MESSAGE: &str = "This is a read-only store.";
const QUOTA_MESSAGE: &str = "QUOTA_BYTES quota exceeded";
const ITEM_QUOTA_MESSAGE: &str = "QUOTA_BYTES_PER_ITEM quota exceeded";

/// When completion callbacks run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum CompletionMode {
    /// Inside the `get`/`set` call.
    #[default]
    Immediate,
    /// When the owner calls one of the `complete_*` methods.
    Deferred,
}

/// Memory storage configuration.
#[derive(Clone, Debug)]
pub struct MemoryStorageConfig {
    /// When operations complete.
    /// Default: immediate
    pub completion: CompletionMode,

    /// Reject writes that exceed the area's quota.
    /// Default: true
    pub enforce_quotas: bool,
}

impl Default for MemoryStorageConfig {
    fn default() -> Self {
        Self {
            completion: CompletionMode::Immediate,
            enforce_quotas: true,
        }
    }
}

impl MemoryStorageConfig {
    pub fn deferred() -> Self {
        Self {
            completion: CompletionMode::Deferred,
            ..Default::default()
        }
    }
}

/// A call made against the storage, in issue order.
#[derive(Clone, Debug, PartialEq)]
pub enum StorageCall {
    Get { area: StorageArea, key: String },
    Set { area: StorageArea, key: String, value: Value },
}

enum PendingOp {
    Get {
        area: StorageArea,
        key: String,
        fallback: Value,
        fault: Option<StoreFailure>,
        done: Completion<Value>,
    },
    Set {
        area: StorageArea,
        key: String,
        value: Value,
        fault: Option<StoreFailure>,
        done: Completion<()>,
    },
}

/// Key-value storage held in memory.
///
/// Behaves like an extension storage API: four areas, read-only `managed`
/// area, byte quotas, change broadcasts for every committed change. Faults
/// can be injected and completions can be held back and released in any
/// order.
pub struct MemoryStorage {
    config: MemoryStorageConfig,
    areas: RwLock<HashMap<StorageArea, HashMap<String, Value>>>,
    subscriptions: SubscriptionManager,
    pending: Mutex<VecDeque<PendingOp>>,
    get_faults: Mutex<VecDeque<StoreFailure>>,
    set_faults: Mutex<VecDeque<StoreFailure>>,
    calls: Mutex<Vec<StorageCall>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::with_config(MemoryStorageConfig::default())
    }

    pub fn with_config(config: MemoryStorageConfig) -> Self {
        Self {
            config,
            areas: RwLock::new(HashMap::new()),
            subscriptions: SubscriptionManager::new(),
            pending: Mutex::new(VecDeque::new()),
            get_faults: Mutex::new(VecDeque::new()),
            set_faults: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &MemoryStorageConfig {
        &self.config
    }

    // --- Direct access ---

    /// Current value of `key`, bypassing the asynchronous interface.
    pub fn peek(&self, area: StorageArea, key: &str) -> Option<Value> {
        self.areas.read().get(&area).and_then(|a| a.get(key)).cloned()
    }

    /// Keys present in `area`, sorted.
    pub fn keys(&self, area: StorageArea) -> Vec<String> {
        let mut keys: Vec<String> = self
            .areas
            .read()
            .get(&area)
            .map(|a| a.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }

    /// Bytes used by `area`, counted as key length plus JSON length per item.
    pub fn bytes_in_use(&self, area: StorageArea) -> usize {
        self.areas
            .read()
            .get(&area)
            .map(|a| a.iter().map(|(k, v)| item_bytes(k, v)).sum())
            .unwrap_or(0)
    }

    /// Write as another context would: commit now and notify subscribers.
    ///
    /// Ignores faults, quotas and the read-only flag.
    pub fn put(&self, area: StorageArea, key: &str, value: Value) {
        if let Some(event) = self.store_value(area, key, value) {
            self.subscriptions.broadcast(&event);
        }
    }

    /// Remove `key` as another context would. Returns the removed value.
    pub fn remove(&self, area: StorageArea, key: &str) -> Option<Value> {
        let old = self
            .areas
            .write()
            .get_mut(&area)
            .and_then(|a| a.remove(key));

        if let Some(ref old_value) = old {
            let event = StorageEvent::single(
                area,
                key,
                StorageChange {
                    old_value: Some(old_value.clone()),
                    new_value: None,
                },
            );
            self.subscriptions.broadcast(&event);
        }
        old
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.subscription_count()
    }

    // --- Fault injection ---

    /// Make the next `get` fail with `message`.
    pub fn fail_next_get(&self, message: Option<&str>) {
        self.get_faults
            .lock()
            .push_back(StoreFailure::from_message(message));
    }

    /// Make the next `set` fail with `message`.
    pub fn fail_next_set(&self, message: Option<&str>) {
        self.set_faults
            .lock()
            .push_back(StoreFailure::from_message(message));
    }

    // --- Call log ---

    /// Every `get`/`set` issued so far.
    pub fn calls(&self) -> Vec<StorageCall> {
        self.calls.lock().clone()
    }

    /// Values passed to `set` for `key`, in issue order.
    pub fn writes_to(&self, area: StorageArea, key: &str) -> Vec<Value> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                StorageCall::Set {
                    area: a,
                    key: k,
                    value,
                } if *a == area && k == key => Some(value.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    // --- Deferred completion ---

    /// Operations issued but not yet completed.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Complete the oldest pending operation.
    pub fn complete_next(&self) -> bool {
        self.complete_at(0)
    }

    /// Complete the pending operation at `index` (0 = oldest).
    pub fn complete_at(&self, index: usize) -> bool {
        let op = self.pending.lock().remove(index);
        match op {
            Some(op) => {
                self.execute(op);
                true
            }
            None => false,
        }
    }

    /// Complete every pending operation in issue order.
    pub fn complete_all(&self) -> usize {
        let mut completed = 0;
        while self.complete_next() {
            completed += 1;
        }
        completed
    }

    // --- Internal ---

    fn dispatch(&self, op: PendingOp) {
        match self.config.completion {
            CompletionMode::Immediate => self.execute(op),
            CompletionMode::Deferred => self.pending.lock().push_back(op),
        }
    }

    fn execute(&self, op: PendingOp) {
        match op {
            PendingOp::Get {
                area,
                key,
                fallback,
                fault,
                done,
            } => {
                let result = match fault {
                    Some(failure) => Err(failure),
                    None => Ok(self.peek(area, &key).unwrap_or(fallback)),
                };
                done(result);
            }
            PendingOp::Set {
                area,
                key,
                value,
                fault,
                done,
            } => {
                let result = match fault {
                    Some(failure) => Err(failure),
                    None => self.commit(area, &key, value),
                };
                done(result);
            }
        }
    }

    fn commit(&self, area: StorageArea, key: &str, value: Value) -> StoreResult<()> {
        if area.is_read_only() {
            return Err(StoreFailure::new(READ_ONLY_MESSAGE));
        }
        if self.config.enforce_quotas {
            self.check_quota(area, key, &value)?;
        }

        if let Some(event) = self.store_value(area, key, value) {
            let delivered = self.subscriptions.broadcast(&event);
            tracing::trace!(%area, key, delivered, "committed change");
        }
        Ok(())
    }

    fn check_quota(&self, area: StorageArea, key: &str, value: &Value) -> StoreResult<()> {
        let quota = area.default_quota();
        let size = item_bytes(key, value);

        if let Some(limit) = quota.per_item_bytes {
            if size > limit {
                return Err(StoreFailure::new(ITEM_QUOTA_MESSAGE));
            }
        }

        if let Some(limit) = quota.total_bytes {
            let others: usize = self
                .areas
                .read()
                .get(&area)
                .map(|a| {
                    a.iter()
                        .filter(|(k, _)| k.as_str() != key)
                        .map(|(k, v)| item_bytes(k, v))
                        .sum()
                })
                .unwrap_or(0);
            if others + size > limit {
                return Err(StoreFailure::new(QUOTA_MESSAGE));
            }
        }
        Ok(())
    }

    /// Store `value`, returning the event to broadcast if it changed anything.
    fn store_value(&self, area: StorageArea, key: &str, value: Value) -> Option<StorageEvent> {
        let mut areas = self.areas.write();
        let slot = areas.entry(area).or_default();
        if slot.get(key) == Some(&value) {
            return None;
        }

        let old_value = slot.insert(key.to_string(), value.clone());
        Some(StorageEvent::single(
            area,
            key,
            StorageChange {
                old_value,
                new_value: Some(value),
            },
        ))
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageBackend for MemoryStorage {
    fn get(&self, area: StorageArea, key: &str, fallback: Value, done: Completion<Value>) {
        self.calls.lock().push(StorageCall::Get {
            area,
            key: key.to_string(),
        });
        let fault = self.get_faults.lock().pop_front();

        self.dispatch(PendingOp::Get {
            area,
            key: key.to_string(),
            fallback,
            fault,
            done,
        });
    }

    fn set(&self, area: StorageArea, key: &str, value: Value, done: Completion<()>) {
        self.calls.lock().push(StorageCall::Set {
            area,
            key: key.to_string(),
            value: value.clone(),
        });
        let fault = self.set_faults.lock().pop_front();

        self.dispatch(PendingOp::Set {
            area,
            key: key.to_string(),
            value,
            fault,
            done,
        });
    }

    fn subscribe(&self) -> ChangeSubscription {
        self.subscriptions.subscribe()
    }
}

fn item_bytes(key: &str, value: &Value) -> usize {
    key.len() + value.to_string().len()
}
