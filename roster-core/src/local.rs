//! Typed view over the local key-value store.
//!
//! Every method absorbs storage failures: reads degrade to empty state and
//! writes log and report `false`. Callers never see a storage error.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::error::StoreError;
use crate::normalize::{normalize, normalize_list};
use crate::store::{KeyValueStore, CHILDREN_KEY, CURRENT_CHILD_KEY, TOMBSTONES_KEY};
use crate::types::{ChildId, ChildRecord, ParentId};

/// Local persistence for child records, tombstones and the current child.
#[derive(Clone)]
pub struct LocalRoster {
    store: Arc<dyn KeyValueStore>,
}

impl std::fmt::Debug for LocalRoster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalRoster").finish_non_exhaustive()
    }
}

impl LocalRoster {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    // -- children ----------------------------------------------------------

    /// Every stored record, all parents. Malformed entries are dropped.
    pub fn load_children(&self) -> Vec<ChildRecord> {
        match self.read_json(CHILDREN_KEY) {
            Ok(Some(raw)) => normalize_list(&raw),
            Ok(None) => Vec::new(),
            Err(err) => {
                tracing::warn!(error = %err, "failed to read local children; treating as empty");
                Vec::new()
            }
        }
    }

    /// Records for `parent`, minus any id in `tombstones`.
    pub fn children_for(&self, parent: &ParentId, tombstones: &BTreeSet<ChildId>) -> Vec<ChildRecord> {
        self.load_children()
            .into_iter()
            .filter(|r| &r.parent_id == parent && !tombstones.contains(&r.id))
            .collect()
    }

    /// Overwrite the full child list.
    pub fn save_children(&self, children: &[ChildRecord]) -> bool {
        self.write_verified(CHILDREN_KEY, &children)
    }

    /// Replace `parent`'s slice of the full list with `records`.
    ///
    /// Any stored record sharing an id with `records` is dropped first, so a
    /// record that moved parents is not kept twice.
    pub fn replace_parent(&self, parent: &ParentId, records: &[ChildRecord]) -> bool {
        let incoming: BTreeSet<&ChildId> = records.iter().map(|r| &r.id).collect();
        let mut all = self.load_children();
        all.retain(|r| &r.parent_id != parent && !incoming.contains(&r.id));
        all.extend(records.iter().cloned());
        self.save_children(&all)
    }

    /// Replace the stored record with `record.id`, or append it.
    pub fn upsert_child(&self, record: &ChildRecord) -> bool {
        let mut all = self.load_children();
        match all.iter_mut().find(|r| r.id == record.id) {
            Some(slot) => *slot = record.clone(),
            None => all.push(record.clone()),
        }
        self.save_children(&all)
    }

    /// Drop `id` from the full list regardless of parent. Returns whether
    /// anything was removed.
    pub fn remove_child(&self, id: &ChildId) -> bool {
        let mut all = self.load_children();
        let before = all.len();
        all.retain(|r| &r.id != id);
        if all.len() == before {
            return false;
        }
        self.save_children(&all)
    }

    // -- tombstones --------------------------------------------------------

    pub fn load_tombstones(&self) -> BTreeSet<ChildId> {
        let raw = match self.read_json(TOMBSTONES_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return BTreeSet::new(),
            Err(err) => {
                tracing::warn!(error = %err, "failed to read tombstones; treating as empty");
                return BTreeSet::new();
            }
        };
        match serde_json::from_value::<Vec<String>>(raw) {
            Ok(ids) => ids.into_iter().map(ChildId::from).collect(),
            Err(err) => {
                tracing::warn!(error = %err, "tombstone list is malformed; treating as empty");
                BTreeSet::new()
            }
        }
    }

    pub fn save_tombstones(&self, tombstones: &BTreeSet<ChildId>) -> bool {
        let ids: Vec<&str> = tombstones.iter().map(|id| id.0.as_str()).collect();
        self.write_verified(TOMBSTONES_KEY, &ids)
    }

    // -- current child -----------------------------------------------------

    pub fn load_current(&self) -> Option<ChildRecord> {
        match self.read_json(CURRENT_CHILD_KEY) {
            Ok(Some(Value::Null)) | Ok(None) => None,
            Ok(Some(raw)) => match normalize(&raw) {
                Ok(record) => Some(record),
                Err(err) => {
                    tracing::warn!(error = %err, "stored current child is malformed; ignoring");
                    None
                }
            },
            Err(err) => {
                tracing::warn!(error = %err, "failed to read current child");
                None
            }
        }
    }

    /// Persist (`Some`) or clear (`None`) the current child.
    pub fn save_current(&self, current: Option<&ChildRecord>) -> bool {
        match current {
            Some(record) => self.write_verified(CURRENT_CHILD_KEY, record),
            None => match self.store.remove(CURRENT_CHILD_KEY) {
                Ok(()) => true,
                Err(err) => {
                    tracing::warn!(error = %err, "failed to clear current child");
                    false
                }
            },
        }
    }

    // -- helpers -----------------------------------------------------------

    fn read_json(&self, key: &str) -> Result<Option<Value>, StoreError> {
        match self.store.get(key)? {
            Some(contents) => Ok(Some(serde_json::from_str(&contents)?)),
            None => Ok(None),
        }
    }

    /// Write, read back, and force one re-write on mismatch.
    fn write_verified<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> bool {
        let payload = match serde_json::to_string(value) {
            Ok(payload) => payload,
            Err(err) => {
                tracing::warn!(key, error = %err, "failed to encode local value");
                return false;
            }
        };

        for attempt in 0..2 {
            if let Err(err) = self.store.set(key, &payload) {
                tracing::warn!(key, attempt, error = %err, "local write failed");
                continue;
            }
            match self.store.get(key) {
                Ok(Some(read_back)) if read_back == payload => return true,
                Ok(_) => tracing::warn!(key, attempt, "local write did not read back as written"),
                Err(err) => tracing::warn!(key, attempt, error = %err, "local read-back failed"),
            }
        }
        tracing::error!(key, "local value could not be verified after re-write");
        false
    }
}
