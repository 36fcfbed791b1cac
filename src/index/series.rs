//! Per-series record
//!
//! A `Series` is one unique combination of measurement name and tag set. It
//! carries the canonical series key, its tags, the shards it is assigned
//! to, and a soft-delete flag. A nanosecond `last_modified` stamp guards
//! `delete` and `unassign_shard` so an out-of-order request from an older
//! writer cannot undo a fresh assignment.

use crate::index::Measurement;
use crate::model::{Tag, Tags};
use chrono::Utc;
use std::collections::HashSet;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, RwLock, Weak};

fn now_nanos() -> i64 {
    Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX)
}

#[derive(Debug, Default)]
struct SeriesInner {
    tags: Arc<Tags>,
    shard_ids: HashSet<u64>,
    deleted: bool,
    measurement: Weak<Measurement>,
}

/// A unique time series within a measurement
#[derive(Debug)]
pub struct Series {
    id: u64,
    key: String,
    /// Stamped on creation and on every shard assignment; read lock-free by
    /// the timestamp guards
    last_modified: AtomicI64,
    inner: RwLock<SeriesInner>,
}

impl Series {
    /// Create a series from its ID, canonical key and tags
    pub fn new(id: u64, key: impl Into<String>, tags: Tags) -> Self {
        Self {
            id,
            key: key.into(),
            last_modified: AtomicI64::new(now_nanos()),
            inner: RwLock::new(SeriesInner {
                tags: Arc::new(tags),
                ..SeriesInner::default()
            }),
        }
    }

    /// The series ID, unique within its measurement
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The canonical series key, e.g. `cpu,host=a,region=east`
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Nanosecond timestamp of the last creation or shard assignment
    pub fn last_modified(&self) -> i64 {
        self.last_modified.load(Ordering::SeqCst)
    }

    /// Record that `shard_id` holds this series.
    ///
    /// Stamps `last_modified` and clears the soft-delete flag; repeated
    /// assignment is idempotent.
    pub fn assign_shard(&self, shard_id: u64) {
        self.last_modified.store(now_nanos(), Ordering::SeqCst);

        {
            let inner = self.inner.read().unwrap();
            if !inner.deleted && inner.shard_ids.contains(&shard_id) {
                return;
            }
        }

        let mut inner = self.inner.write().unwrap();
        inner.deleted = false;
        inner.shard_ids.insert(shard_id);
    }

    /// Remove `shard_id` if the request is newer than the last assignment;
    /// stale requests are dropped
    pub fn unassign_shard(&self, shard_id: u64, ts: i64) {
        let mut inner = self.inner.write().unwrap();
        if self.last_modified() < ts {
            inner.shard_ids.remove(&shard_id);
        }
    }

    /// Check whether `shard_id` holds this series
    pub fn assigned(&self, shard_id: u64) -> bool {
        self.inner.read().unwrap().shard_ids.contains(&shard_id)
    }

    /// Number of shards holding this series
    pub fn shard_n(&self) -> usize {
        self.inner.read().unwrap().shard_ids.len()
    }

    /// Soft-delete if the request is newer than the last assignment.
    ///
    /// A deleted series is skipped by every read path but stays in memory
    /// until the owning measurement is rebuilt.
    pub fn delete(&self, ts: i64) {
        let mut inner = self.inner.write().unwrap();
        if self.last_modified() < ts {
            inner.deleted = true;
        }
    }

    /// Check the soft-delete flag
    pub fn deleted(&self) -> bool {
        self.inner.read().unwrap().deleted
    }

    /// An immutable snapshot of the tags
    pub fn tags(&self) -> Arc<Tags> {
        self.inner.read().unwrap().tags.clone()
    }

    /// Detach the tags from any shared snapshot by deep-cloning them in
    /// place
    pub fn copy_tags(&self) {
        let mut inner = self.inner.write().unwrap();
        inner.tags = Arc::new((*inner.tags).clone());
    }

    /// Call `f` for every tag, under the read lock
    pub fn for_each_tag<F: FnMut(&Tag)>(&self, mut f: F) {
        let inner = self.inner.read().unwrap();
        for tag in inner.tags.iter() {
            f(tag);
        }
    }

    /// Read a single tag value
    pub fn tag_value(&self, key: &str) -> Option<String> {
        self.inner
            .read()
            .unwrap()
            .tags
            .get(key)
            .map(|v| v.to_string())
    }

    /// Attach the owning measurement as a non-owning handle
    pub fn set_measurement(&self, measurement: &Arc<Measurement>) {
        self.inner.write().unwrap().measurement = Arc::downgrade(measurement);
    }

    /// The owning measurement, if still alive
    pub fn measurement(&self) -> Option<Arc<Measurement>> {
        self.inner.read().unwrap().measurement.upgrade()
    }
}
