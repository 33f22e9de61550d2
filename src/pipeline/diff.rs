//! Diff calculation between the stored snapshot and a fresh extraction.
//!
//! Computes which items appeared, disappeared, or stayed, keyed by the
//! stable item key. The diff is pure: persistence of its outcome is the
//! event recorder's job ([`crate::storage::SqliteStore::apply_cycle`]).

use std::collections::{HashMap, HashSet};

use crate::models::{ItemRecord, KeyedItem};

/// Result of comparing a stored snapshot against a fresh extraction.
///
/// The three sets are pairwise disjoint; their union (by key) equals the
/// union of previously active keys and freshly extracted keys.
#[derive(Debug, Clone, Default)]
pub struct DiffOutcome {
    /// Present now, not previously active
    pub added: Vec<KeyedItem>,
    /// Previously active, absent now
    pub removed: Vec<ItemRecord>,
    /// Present in both
    pub unchanged: Vec<KeyedItem>,
}

impl DiffOutcome {
    /// Check if there are any changes.
    pub fn has_changes(&self) -> bool {
        !self.added.is_empty() || !self.removed.is_empty()
    }

    /// Get the total number of changes.
    pub fn change_count(&self) -> usize {
        self.added.len() + self.removed.len()
    }
}

/// Calculate the diff between the previously active items of an area and
/// a freshly extracted item list.
///
/// Duplicate keys in the extraction are collapsed to their first
/// occurrence. An empty `previous` yields only additions (initial
/// population); an empty `current` marks everything removed, which is
/// only ever valid when the extraction itself succeeded.
pub fn diff_items(previous: &[ItemRecord], current: &[KeyedItem]) -> DiffOutcome {
    let prev_map: HashMap<&str, &ItemRecord> =
        previous.iter().map(|r| (r.id.as_str(), r)).collect();

    let mut curr_keys: HashSet<&str> = HashSet::with_capacity(current.len());

    let mut added = Vec::new();
    let mut unchanged = Vec::new();
    for item in current {
        if !curr_keys.insert(item.key.as_str()) {
            continue; // duplicate row on the page
        }
        if prev_map.contains_key(item.key.as_str()) {
            unchanged.push(item.clone());
        } else {
            added.push(item.clone());
        }
    }

    let removed = previous
        .iter()
        .filter(|r| !curr_keys.contains(r.id.as_str()))
        .cloned()
        .collect();

    DiffOutcome {
        added,
        removed,
        unchanged,
    }
}
