//! Core types shared by the store capability and synchronized records.

use crate::error::MirrorError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// A partition of the external key-value store.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageArea {
    /// Per-device persistent storage.
    #[default]
    Local,
    /// Storage replicated across the user's devices.
    Sync,
    /// Administrator-provided, read-only storage.
    Managed,
    /// In-memory storage for the lifetime of the session.
    Session,
}

impl StorageArea {
    pub const ALL: [StorageArea; 4] = [
        StorageArea::Local,
        StorageArea::Sync,
        StorageArea::Managed,
        StorageArea::Session,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            StorageArea::Local => "local",
            StorageArea::Sync => "sync",
            StorageArea::Managed => "managed",
            StorageArea::Session => "session",
        }
    }

    /// Whether writes to this area are rejected.
    pub fn is_read_only(self) -> bool {
        matches!(self, StorageArea::Managed)
    }

    /// Default quota for this area.
    pub fn default_quota(self) -> AreaQuota {
        match self {
            StorageArea::Local | StorageArea::Session => AreaQuota {
                total_bytes: Some(10 * 1024 * 1024),
                per_item_bytes: None,
            },
            StorageArea::Sync => AreaQuota {
                total_bytes: Some(100 * 1024),
                per_item_bytes: Some(8 * 1024),
            },
            StorageArea::Managed => AreaQuota::unlimited(),
        }
    }
}

impl fmt::Debug for StorageArea {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StorageArea({})", self.as_str())
    }
}

impl fmt::Display for StorageArea {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageArea {
    type Err = MirrorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StorageArea::ALL
            .into_iter()
            .find(|area| area.as_str() == s)
            .ok_or_else(|| MirrorError::InvalidArea(s.to_string()))
    }
}

/// Byte limits applied to an area.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct AreaQuota {
    /// Max bytes across all items (None = unlimited).
    pub total_bytes: Option<usize>,
    /// Max bytes for a single item (None = unlimited).
    pub per_item_bytes: Option<usize>,
}

impl AreaQuota {
    pub fn unlimited() -> Self {
        Self::default()
    }
}

/// Change to a single key, as delivered by change notifications.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct StorageChange {
    /// Value before the change (None if the key was absent).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_value: Option<Value>,
    /// Value after the change (None if the key was removed).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_value: Option<Value>,
}

/// Mapping from changed keys to their changes.
pub type StorageChanges = HashMap<String, StorageChange>;

/// One committed batch of changes in one area.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StorageEvent {
    pub area: StorageArea,
    pub changes: StorageChanges,
}

impl StorageEvent {
    /// Event for a single changed key.
    pub fn single(area: StorageArea, key: impl Into<String>, change: StorageChange) -> Self {
        let mut changes = StorageChanges::new();
        changes.insert(key.into(), change);
        Self { area, changes }
    }

    /// The change for `key`, if this event is about `identity`'s area and has an entry for it.
    pub fn change_for(&self, identity: &RecordIdentity) -> Option<&StorageChange> {
        if self.area != identity.area {
            return None;
        }
        self.changes.get(&identity.key)
    }
}

/// The `(key, area)` slot a synchronized record mirrors.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordIdentity {
    pub key: String,
    pub area: StorageArea,
}

impl fmt::Debug for RecordIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecordIdentity({}:{})", self.area, self.key)
    }
}

impl fmt::Display for RecordIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.area, self.key)
    }
}

/// Options for creating a synchronized record.
#[derive(Clone, Debug)]
pub struct RecordOptions<V> {
    /// Key of the record in the store.
    pub key: String,

    /// Value used when the store has nothing under `key`.
    pub default_state: V,

    /// Area holding the record.
    /// Default: local
    pub storage_area: StorageArea,
}

impl<V> RecordOptions<V> {
    pub fn new(key: impl Into<String>, default_state: V) -> Self {
        Self {
            key: key.into(),
            default_state,
            storage_area: StorageArea::default(),
        }
    }

    /// Use a different storage area.
    pub fn in_area(mut self, area: StorageArea) -> Self {
        self.storage_area = area;
        self
    }

    pub fn identity(&self) -> RecordIdentity {
        RecordIdentity {
            key: self.key.clone(),
            area: self.storage_area,
        }
    }
}
