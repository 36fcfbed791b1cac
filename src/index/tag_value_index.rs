//! Per-tag-key value index
//!
//! Maps each value of one tag key to the sorted set of series IDs carrying
//! it. Every `TagValueIndex` has its own read-write lock so range scans over
//! different tag keys proceed in parallel.

use crate::index::SeriesIds;
use std::collections::HashMap;
use std::sync::RwLock;

/// Concurrent mapping from tag value to a sorted set of series IDs
#[derive(Debug, Default)]
pub struct TagValueIndex {
    value_ids: RwLock<HashMap<String, SeriesIds>>,
}

impl TagValueIndex {
    /// Create an empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot the series IDs stored under `value`; empty if absent
    pub fn load(&self, value: &str) -> SeriesIds {
        self.value_ids
            .read()
            .unwrap()
            .get(value)
            .cloned()
            .unwrap_or_default()
    }

    /// Snapshot the series IDs stored under a byte-slice value; non-UTF-8
    /// input is an in-band empty answer
    pub fn load_bytes(&self, value: &[u8]) -> SeriesIds {
        match std::str::from_utf8(value) {
            Ok(v) => self.load(v),
            Err(_) => SeriesIds::new(),
        }
    }

    /// Replace the series IDs stored under `value`
    pub fn store(&self, value: impl Into<String>, ids: SeriesIds) {
        self.value_ids.write().unwrap().insert(value.into(), ids);
    }

    /// Insert one series ID under `value`.
    ///
    /// IDs are assigned nearly monotonically, so the common case is an
    /// in-order append; the set is re-sorted only when the new ID lands out
    /// of order (e.g. after a restore).
    pub fn append(&self, value: &str, id: u64) {
        let mut map = self.value_ids.write().unwrap();
        match map.get_mut(value) {
            Some(ids) => {
                ids.push(id);
                let n = ids.len();
                if n > 1 && ids[n - 1] < ids[n - 2] {
                    ids.sort();
                }
            }
            None => {
                map.insert(value.to_string(), SeriesIds::from(vec![id]));
            }
        }
    }

    /// Call `f` for each (value, ids) entry until it returns false.
    ///
    /// Iteration holds the read lock; `f` borrows each set and must clone if
    /// it needs to keep one.
    pub fn range<F: FnMut(&str, &SeriesIds) -> bool>(&self, mut f: F) {
        let map = self.value_ids.read().unwrap();
        for (value, ids) in map.iter() {
            if !f(value, ids) {
                return;
            }
        }
    }

    /// Call `f` for each (value, ids) entry
    pub fn range_all<F: FnMut(&str, &SeriesIds)>(&self, mut f: F) {
        self.range(|value, ids| {
            f(value, ids);
            true
        });
    }

    /// Number of distinct values under this tag key
    pub fn cardinality(&self) -> usize {
        self.value_ids.read().unwrap().len()
    }

    /// Check whether `value` is present
    pub fn contains(&self, value: &str) -> bool {
        self.value_ids.read().unwrap().contains_key(value)
    }
}
