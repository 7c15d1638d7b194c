//! Per-block cache entries and their user-facing projection.
//!
//! A [`BlockCacheEntry`] is built once per course snapshot during the
//! collect phase and is what the course cache persists. During the apply
//! phase a request-local copy of the entries is pruned in place; the
//! survivors are projected to [`BlockInformation`] for the caller.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::models::{FieldValue, UsageKey};

/// Cached structure, raw fields, and transformation payloads for one block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockCacheEntry {
    pub usage_key: UsageKey,
    pub parent_keys: Vec<UsageKey>,
    pub child_keys: Vec<UsageKey>,
    /// Required raw field values, keyed by field name.
    pub block_fields: BTreeMap<String, FieldValue>,
    /// Collected payloads, keyed by transformation id.
    pub transformation_data: BTreeMap<String, Value>,
}

impl BlockCacheEntry {
    /// Decode the payload collected by transformation `id`.
    ///
    /// Fails with [`Error::Configuration`] when no payload was collected
    /// under that id.
    pub fn transformation_data<T: DeserializeOwned>(&self, id: &str) -> Result<T> {
        let raw = self.transformation_data.get(id).ok_or_else(|| {
            Error::Configuration(format!(
                "no data collected by transformation '{}' for block {}",
                id, self.usage_key
            ))
        })?;
        Ok(T::deserialize(raw)?)
    }
}

/// All cache entries of one course, keyed by usage key.
pub type BlockCacheEntries = HashMap<UsageKey, BlockCacheEntry>;

/// Delete `key` from `entries` and unlink it from its neighbours.
///
/// The key is removed from every surviving parent's `child_keys` and every
/// surviving child's `parent_keys`. Neighbours that were already removed
/// are skipped. Returns `false` when `key` was not present.
pub fn remove_block(entries: &mut BlockCacheEntries, key: &UsageKey) -> bool {
    let Some(removed) = entries.remove(key) else {
        return false;
    };
    for parent_key in &removed.parent_keys {
        if let Some(parent) = entries.get_mut(parent_key) {
            parent.child_keys.retain(|k| k != key);
        }
    }
    for child_key in &removed.child_keys {
        if let Some(child) = entries.get_mut(child_key) {
            child.parent_keys.retain(|k| k != key);
        }
    }
    true
}

/// `(block, child)` pairs whose child no longer has an entry.
pub fn dangling_references(entries: &BlockCacheEntries) -> Vec<(UsageKey, UsageKey)> {
    let mut dangling = Vec::new();
    for entry in entries.values() {
        for child in &entry.child_keys {
            if !entries.contains_key(child) {
                dangling.push((entry.usage_key.clone(), child.clone()));
            }
        }
    }
    dangling
}

/// Usage keys reachable from `root` through `child_keys`, `root` included.
///
/// Empty when `root` has no entry.
pub fn reachable_from(entries: &BlockCacheEntries, root: &UsageKey) -> HashSet<UsageKey> {
    let mut seen = HashSet::new();
    if !entries.contains_key(root) {
        return seen;
    }
    let mut stack = vec![root.clone()];
    while let Some(key) = stack.pop() {
        if !seen.insert(key.clone()) {
            continue;
        }
        if let Some(entry) = entries.get(&key) {
            stack.extend(
                entry
                    .child_keys
                    .iter()
                    .filter(|k| entries.contains_key(*k))
                    .cloned(),
            );
        }
    }
    seen
}

/// The user-facing view of a block: no transformation payloads.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BlockInformation {
    pub usage_key: UsageKey,
    pub child_keys: Vec<UsageKey>,
    pub block_fields: BTreeMap<String, FieldValue>,
}

impl BlockInformation {
    pub fn from_cache_entry(entry: &BlockCacheEntry) -> Self {
        Self {
            usage_key: entry.usage_key.clone(),
            child_keys: entry.child_keys.clone(),
            block_fields: entry.block_fields.clone(),
        }
    }
}
