//! Concurrent sorted fact map: composite key to row-slot offset

use std::collections::BTreeMap;
use std::ops::Bound;

use parking_lot::RwLock;

use super::key::TimeAndDims;

/// Sorted key→offset mapping with first-writer-wins inserts
///
/// A `BTreeMap` behind an `RwLock` keeps keys in total order while letting
/// readers share access. Writers hold the lock only for the single map
/// operation; iteration works off ordered snapshots, so observed keys
/// always follow the key order even while writes continue.
pub(crate) struct FactMap {
    map: RwLock<BTreeMap<TimeAndDims, usize>>,
}

impl FactMap {
    pub(crate) fn new() -> Self {
        Self {
            map: RwLock::new(BTreeMap::new()),
        }
    }

    /// Insert `offset` for `key` unless the key is already mapped
    ///
    /// Returns the previously mapped offset if there was one; `None` means
    /// this call won the insert.
    pub(crate) fn put_if_absent(&self, key: TimeAndDims, offset: usize) -> Option<usize> {
        match self.map.write().entry(key) {
            std::collections::btree_map::Entry::Occupied(entry) => Some(*entry.get()),
            std::collections::btree_map::Entry::Vacant(entry) => {
                entry.insert(offset);
                None
            }
        }
    }

    /// Remove a key, returning its offset if it was present
    pub(crate) fn remove(&self, key: &TimeAndDims) -> Option<usize> {
        self.map.write().remove(key)
    }

    pub(crate) fn len(&self) -> usize {
        self.map.read().len()
    }

    pub(crate) fn first_key(&self) -> Option<TimeAndDims> {
        self.map.read().keys().next().cloned()
    }

    pub(crate) fn last_key(&self) -> Option<TimeAndDims> {
        self.map.read().keys().next_back().cloned()
    }

    /// Ordered snapshot of all entries
    ///
    /// Key clones share their `Arc<str>` values, so a snapshot costs one
    /// shallow copy per entry.
    pub(crate) fn snapshot(&self) -> Vec<(TimeAndDims, usize)> {
        self.map
            .read()
            .iter()
            .map(|(key, offset)| (key.clone(), *offset))
            .collect()
    }

    /// Ordered snapshot of entries in `[lo, hi)`
    pub(crate) fn range(&self, lo: &TimeAndDims, hi: &TimeAndDims) -> Vec<(TimeAndDims, usize)> {
        self.map
            .read()
            .range((Bound::Included(lo), Bound::Excluded(hi)))
            .map(|(key, offset)| (key.clone(), *offset))
            .collect()
    }

    pub(crate) fn clear(&self) {
        self.map.write().clear();
    }
}
