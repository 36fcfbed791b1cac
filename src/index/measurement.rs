//! Measurement: the per-name series index
//!
//! A `Measurement` owns the live series of one measurement name, the
//! tag-key → tag-value inverted index over them, the set of field names,
//! and a lazily maintained sorted cache of live series IDs.
//!
//! Writers call `add_series`, `drop_series` and `set_field_name`; readers
//! go through the accessors here and the planner entry points in the
//! sibling `planner` module. Dropped series leave stale entries in the
//! per-tag value sets until `rebuild` produces a fresh replacement; every
//! read path therefore skips series whose `deleted()` flag is set.

use crate::index::{Series, SeriesIds, TagValueIndex};
use crate::query::Authorizer;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

#[derive(Debug, Default)]
pub(super) struct MeasurementInner {
    /// Lookup table for series by their ID
    pub(super) series_by_id: HashMap<u64, Arc<Series>>,
    /// Tag key → value → sorted series IDs
    pub(super) series_by_tag_key_value: HashMap<String, Arc<TagValueIndex>>,
    /// Lazily maintained sorted list of live series IDs; considered fresh
    /// only while its length equals `series_by_id`'s
    pub(super) sorted_series_ids: SeriesIds,
    /// Set when dropped series have left stale entries in the value sets
    pub(super) dirty: bool,
}

/// A named collection of time series with an in-memory tag index
#[derive(Debug)]
pub struct Measurement {
    database: String,
    name: String,
    /// Shared with rebuilt successors so field registration survives the
    /// snapshot swap
    field_names: Arc<RwLock<HashSet<String>>>,
    pub(super) inner: RwLock<MeasurementInner>,
}

/// Point-in-time size counters for one measurement
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct MeasurementStats {
    /// Series tracked, including soft-deleted ones awaiting rebuild
    pub series_n: usize,
    /// Distinct tag keys indexed
    pub tag_key_n: usize,
    /// Registered field names
    pub field_n: usize,
}

impl Measurement {
    /// Create an empty measurement
    pub fn new(database: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            name: name.into(),
            field_names: Arc::new(RwLock::new(HashSet::new())),
            inner: RwLock::new(MeasurementInner::default()),
        }
    }

    fn with_shared_fields(
        database: String,
        name: String,
        field_names: Arc<RwLock<HashSet<String>>>,
    ) -> Self {
        Self {
            database,
            name,
            field_names,
            inner: RwLock::new(MeasurementInner::default()),
        }
    }

    /// The owning database name
    pub fn database(&self) -> &str {
        &self.database
    }

    /// The measurement name
    pub fn name(&self) -> &str {
        &self.name
    }

    // ---- fields ----------------------------------------------------------

    /// Check whether `name` is a registered field
    pub fn has_field(&self, name: &str) -> bool {
        self.field_names.read().unwrap().contains(name)
    }

    /// Register a field name
    pub fn set_field_name(&self, name: &str) {
        if self.field_names.read().unwrap().contains(name) {
            return;
        }
        self.field_names.write().unwrap().insert(name.to_string());
    }

    /// The registered field names, in arbitrary order
    pub fn field_names(&self) -> Vec<String> {
        self.field_names.read().unwrap().iter().cloned().collect()
    }

    // ---- mutation --------------------------------------------------------

    /// Add a series to the index.
    ///
    /// Returns false if a series with the same ID is already present. On
    /// success the series is inserted into the ID table, every tag of the
    /// series is indexed, and the sorted-ID cache is extended in place when
    /// the new ID continues its sorted suffix.
    pub fn add_series(&self, series: Arc<Series>) -> bool {
        let id = series.id();

        {
            let inner = self.inner.read().unwrap();
            if inner.series_by_id.contains_key(&id) {
                return false;
            }
        }

        let mut inner = self.inner.write().unwrap();
        if inner.series_by_id.contains_key(&id) {
            return false;
        }

        inner.series_by_id.insert(id, Arc::clone(&series));

        // IDs are assigned nearly monotonically, so the cache usually grows
        // by appending. Anything else leaves it stale until the next
        // series_ids() call rebuilds it.
        let n = inner.series_by_id.len();
        let extends_sorted_suffix = match inner.sorted_series_ids.last() {
            None => n == 1,
            Some(&last) => inner.sorted_series_ids.len() == n - 1 && id > last,
        };
        if extends_sorted_suffix {
            inner.sorted_series_ids.push(id);
        }

        series.for_each_tag(|tag| {
            let value_index = inner
                .series_by_tag_key_value
                .entry(tag.key.clone())
                .or_insert_with(|| Arc::new(TagValueIndex::new()));
            value_index.append(&tag.value, id);
        });

        true
    }

    /// Remove a series from the ID table.
    ///
    /// The per-tag value sets are not touched; they keep a stale reference
    /// that readers skip via `Series::deleted` until `rebuild` runs.
    pub fn drop_series(&self, series: &Series) {
        let mut inner = self.inner.write().unwrap();
        if inner.series_by_id.remove(&series.id()).is_none() {
            return;
        }

        inner.sorted_series_ids.clear();
        inner.dirty = true;

        tracing::debug!(
            measurement = %self.name,
            series_id = series.id(),
            "dropped series"
        );
    }

    /// Build a fresh measurement without the stale entries left by dropped
    /// series.
    ///
    /// Returns `self` unchanged when nothing was dropped. Otherwise the
    /// live series are re-added in ascending ID order, so the rebuilt value
    /// sets are intrinsically sorted. The caller swaps the replacement in;
    /// concurrent readers keep using the old snapshot until then.
    pub fn rebuild(self: &Arc<Self>) -> Arc<Measurement> {
        {
            let inner = self.inner.read().unwrap();
            if !inner.dirty {
                return Arc::clone(self);
            }
        }

        let rebuilt = Arc::new(Measurement::with_shared_fields(
            self.database.clone(),
            self.name.clone(),
            Arc::clone(&self.field_names),
        ));

        let mut inner = self.inner.write().unwrap();

        let mut live: Vec<u64> = Vec::with_capacity(inner.series_by_id.len());
        for (&id, series) in &inner.series_by_id {
            if !series.deleted() {
                live.push(id);
            }
        }
        live.sort_unstable();
        inner.sorted_series_ids = SeriesIds::from(live);

        for &id in inner.sorted_series_ids.iter() {
            if let Some(series) = inner.series_by_id.get(&id) {
                rebuilt.add_series(Arc::clone(series));
            }
        }

        tracing::debug!(
            measurement = %self.name,
            live_series = inner.sorted_series_ids.len(),
            "rebuilt measurement index"
        );

        rebuilt
    }

    // ---- series lookups --------------------------------------------------

    /// Look up a series by ID
    pub fn series_by_id(&self, id: u64) -> Option<Arc<Series>> {
        self.inner.read().unwrap().series_by_id.get(&id).cloned()
    }

    /// Look up several series by ID, preserving input order
    pub fn series_by_id_slice(&self, ids: &[u64]) -> Vec<Option<Arc<Series>>> {
        let inner = self.inner.read().unwrap();
        ids.iter()
            .map(|id| inner.series_by_id.get(id).cloned())
            .collect()
    }

    /// Append the keys of the given live series to `dst`
    pub fn append_series_keys_by_id(&self, dst: &mut Vec<String>, ids: &[u64]) {
        let inner = self.inner.read().unwrap();
        for id in ids {
            if let Some(series) = inner.series_by_id.get(id) {
                if !series.deleted() {
                    dst.push(series.key().to_string());
                }
            }
        }
    }

    /// The keys of the given live series
    pub fn series_keys_by_id(&self, ids: &SeriesIds) -> Vec<String> {
        let mut keys = Vec::with_capacity(ids.len());
        self.append_series_keys_by_id(&mut keys, ids);
        keys
    }

    /// The keys of every live series, in arbitrary order
    pub fn series_keys(&self) -> Vec<String> {
        let inner = self.inner.read().unwrap();
        inner
            .series_by_id
            .values()
            .filter(|s| !s.deleted())
            .map(|s| s.key().to_string())
            .collect()
    }

    /// The sorted IDs of every live series.
    ///
    /// Serves from the lazy cache when it is consistent with the ID table;
    /// otherwise rebuilds it under the write lock, filtering soft-deleted
    /// series.
    pub fn series_ids(&self) -> SeriesIds {
        {
            let inner = self.inner.read().unwrap();
            if inner.sorted_series_ids.len() == inner.series_by_id.len() {
                return inner.sorted_series_ids.clone();
            }
        }

        let mut inner = self.inner.write().unwrap();
        if inner.sorted_series_ids.len() == inner.series_by_id.len() {
            return inner.sorted_series_ids.clone();
        }

        let mut live: Vec<u64> = Vec::with_capacity(inner.series_by_id.len());
        for (&id, series) in &inner.series_by_id {
            if !series.deleted() {
                live.push(id);
            }
        }
        live.sort_unstable();
        inner.sorted_series_ids = SeriesIds::from(live);
        inner.sorted_series_ids.clone()
    }

    /// Check whether any series is tracked (soft-deleted ones count until
    /// rebuild)
    pub fn has_series(&self) -> bool {
        !self.inner.read().unwrap().series_by_id.is_empty()
    }

    // ---- tag index lookups ----------------------------------------------

    /// Check whether at least one series carries the tag key
    pub fn has_tag_key(&self, key: &str) -> bool {
        self.inner
            .read()
            .unwrap()
            .series_by_tag_key_value
            .contains_key(key)
    }

    /// Check whether at least one series carries the tag key/value pair
    pub fn has_tag_key_value(&self, key: &str, value: &str) -> bool {
        self.inner
            .read()
            .unwrap()
            .series_by_tag_key_value
            .get(key)
            .map(|tv| tv.contains(value))
            .unwrap_or(false)
    }

    /// Number of distinct values indexed under the tag key
    pub fn cardinality(&self, key: &str) -> usize {
        self.inner
            .read()
            .unwrap()
            .series_by_tag_key_value
            .get(key)
            .map(|tv| tv.cardinality())
            .unwrap_or(0)
    }

    /// `cardinality` with a byte-slice key; non-UTF-8 input is an in-band
    /// zero
    pub fn cardinality_bytes(&self, key: &[u8]) -> usize {
        match std::str::from_utf8(key) {
            Ok(key) => self.cardinality(key),
            Err(_) => 0,
        }
    }

    /// The value index for a tag key, if any series carries it
    pub fn series_by_tag_key_value(&self, key: &str) -> Option<Arc<TagValueIndex>> {
        self.inner
            .read()
            .unwrap()
            .series_by_tag_key_value
            .get(key)
            .cloned()
    }

    /// The measurement's tag keys, sorted
    pub fn tag_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = {
            let inner = self.inner.read().unwrap();
            inner.series_by_tag_key_value.keys().cloned().collect()
        };
        keys.sort_unstable();
        keys
    }

    /// Call `f` for every tag key, in arbitrary order
    pub fn walk_tag_keys<F: FnMut(&str)>(&self, mut f: F) {
        let inner = self.inner.read().unwrap();
        for key in inner.series_by_tag_key_value.keys() {
            f(key);
        }
    }

    /// The distinct values under a tag key, in arbitrary order.
    ///
    /// With an authorizer, a value is included only if at least one of its
    /// series may be read.
    pub fn tag_values(&self, auth: Option<&dyn Authorizer>, key: &str) -> Vec<String> {
        let inner = self.inner.read().unwrap();
        let value_index = match inner.series_by_tag_key_value.get(key) {
            Some(tv) => Arc::clone(tv),
            None => return Vec::new(),
        };

        let mut values = Vec::with_capacity(value_index.cardinality());
        value_index.range_all(|value, ids| match auth {
            None => values.push(value.to_string()),
            Some(auth) => {
                for sid in ids {
                    if let Some(series) = inner.series_by_id.get(sid) {
                        if auth.authorize_series_read(&self.database, &self.name, &series.tags())
                        {
                            values.push(value.to_string());
                            break;
                        }
                    }
                }
            }
        });
        values
    }

    // ---- authorization and stats ----------------------------------------

    /// A measurement may be read if at least one of its series may be.
    ///
    /// Cost is linear in the number of series.
    pub fn authorized(&self, auth: Option<&dyn Authorizer>) -> bool {
        let Some(auth) = auth else {
            return true;
        };

        let inner = self.inner.read().unwrap();
        inner
            .series_by_id
            .values()
            .any(|s| auth.authorize_series_read(&self.database, &self.name, &s.tags()))
    }

    /// Current size counters
    pub fn stats(&self) -> MeasurementStats {
        let inner = self.inner.read().unwrap();
        MeasurementStats {
            series_n: inner.series_by_id.len(),
            tag_key_n: inner.series_by_tag_key_value.len(),
            field_n: self.field_names.read().unwrap().len(),
        }
    }
}

/// A list of measurements sorted by name, supporting name-keyed set algebra
#[derive(Debug, Clone, Default)]
pub struct MeasurementSet(Vec<Arc<Measurement>>);

impl MeasurementSet {
    /// Build a set from measurements, sorting them by name
    pub fn new(mut measurements: Vec<Arc<Measurement>>) -> Self {
        measurements.sort_by(|a, b| a.name().cmp(b.name()));
        Self(measurements)
    }

    /// Measurements present in both sets, compared by name
    pub fn intersect(&self, other: &MeasurementSet) -> MeasurementSet {
        let (l, r) = if other.0.len() < self.0.len() {
            (&other.0, &self.0)
        } else {
            (&self.0, &other.0)
        };

        let mut result = Vec::with_capacity(l.len());
        let (mut i, mut j) = (0, 0);
        while i < l.len() && j < r.len() {
            match l[i].name().cmp(r[j].name()) {
                std::cmp::Ordering::Equal => {
                    result.push(Arc::clone(&l[i]));
                    i += 1;
                    j += 1;
                }
                std::cmp::Ordering::Less => i += 1,
                std::cmp::Ordering::Greater => j += 1,
            }
        }

        MeasurementSet(result)
    }

    /// Measurements present in either set, compared by name
    pub fn union(&self, other: &MeasurementSet) -> MeasurementSet {
        let (l, r) = (&self.0, &other.0);
        let mut result = Vec::with_capacity(l.len() + r.len());
        let (mut i, mut j) = (0, 0);
        while i < l.len() && j < r.len() {
            match l[i].name().cmp(r[j].name()) {
                std::cmp::Ordering::Equal => {
                    result.push(Arc::clone(&l[i]));
                    i += 1;
                    j += 1;
                }
                std::cmp::Ordering::Less => {
                    result.push(Arc::clone(&l[i]));
                    i += 1;
                }
                std::cmp::Ordering::Greater => {
                    result.push(Arc::clone(&r[j]));
                    j += 1;
                }
            }
        }

        result.extend(l[i..].iter().cloned());
        result.extend(r[j..].iter().cloned());

        MeasurementSet(result)
    }

    /// Iterate the measurements in name order
    pub fn iter(&self) -> std::slice::Iter<'_, Arc<Measurement>> {
        self.0.iter()
    }

    /// Number of measurements
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if the set is empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Tags;

    fn new_series(id: u64, key: &str, tags: &[(&str, &str)]) -> Arc<Series> {
        Arc::new(Series::new(
            id,
            key,
            Tags::from_pairs(tags.iter().copied()),
        ))
    }

    /// Measurement with the standard three-series fixture
    fn cpu() -> Arc<Measurement> {
        let m = Arc::new(Measurement::new("db0", "cpu"));
        assert!(m.add_series(new_series(
            1,
            "cpu,host=a,region=east",
            &[("host", "a"), ("region", "east")],
        )));
        assert!(m.add_series(new_series(
            2,
            "cpu,host=b,region=east",
            &[("host", "b"), ("region", "east")],
        )));
        assert!(m.add_series(new_series(
            3,
            "cpu,host=a,region=west",
            &[("host", "a"), ("region", "west")],
        )));
        m
    }

    #[test]
    fn test_add_series_is_idempotent() {
        let m = cpu();
        let duplicate = new_series(1, "cpu,host=z", &[("host", "z")]);

        assert!(!m.add_series(duplicate));
        assert_eq!(m.series_ids(), SeriesIds::from(vec![1, 2, 3]));
        // The duplicate's tags were not indexed.
        assert!(!m.has_tag_key_value("host", "z"));
    }

    #[test]
    fn test_tag_index_invariant() {
        let m = cpu();

        // Every tag of every series maps back to the series ID, and every
        // stored set is strictly ascending.
        for id in 1..=3u64 {
            let series = m.series_by_id(id).unwrap();
            series.for_each_tag(|tag| {
                let tv = m.series_by_tag_key_value(&tag.key).unwrap();
                let ids = tv.load(&tag.value);
                assert!(ids.contains(&id), "{}={} missing {}", tag.key, tag.value, id);
                assert!(ids.windows(2).all(|w| w[0] < w[1]));
            });
        }
    }

    #[test]
    fn test_series_lookups() {
        let m = cpu();

        assert_eq!(m.series_by_id(1).unwrap().key(), "cpu,host=a,region=east");
        assert!(m.series_by_id(99).is_none());

        let slice = m.series_by_id_slice(&[3, 99, 1]);
        assert_eq!(slice[0].as_ref().unwrap().id(), 3);
        assert!(slice[1].is_none());
        assert_eq!(slice[2].as_ref().unwrap().id(), 1);

        let mut keys = m.series_keys();
        keys.sort();
        assert_eq!(
            keys,
            vec![
                "cpu,host=a,region=east",
                "cpu,host=a,region=west",
                "cpu,host=b,region=east"
            ]
        );

        assert_eq!(
            m.series_keys_by_id(&SeriesIds::from(vec![2, 3])),
            vec!["cpu,host=b,region=east", "cpu,host=a,region=west"]
        );
    }

    #[test]
    fn test_sorted_cache_appends_monotonic_ids() {
        let m = Arc::new(Measurement::new("db0", "cpu"));
        m.add_series(new_series(10, "cpu,host=a", &[("host", "a")]));
        m.add_series(new_series(20, "cpu,host=b", &[("host", "b")]));
        assert_eq!(m.series_ids(), SeriesIds::from(vec![10, 20]));

        // An out-of-order ID skips the append fast path; the next
        // series_ids() call rebuilds the cache.
        m.add_series(new_series(15, "cpu,host=c", &[("host", "c")]));
        assert_eq!(m.series_ids(), SeriesIds::from(vec![10, 15, 20]));
    }

    #[test]
    fn test_out_of_order_value_set_is_resorted() {
        let m = Arc::new(Measurement::new("db0", "cpu"));
        m.add_series(new_series(20, "cpu,host=a", &[("host", "a")]));
        m.add_series(new_series(10, "cpu,host=a,region=x", &[
            ("host", "a"),
            ("region", "x"),
        ]));

        let tv = m.series_by_tag_key_value("host").unwrap();
        assert_eq!(tv.load("a"), SeriesIds::from(vec![10, 20]));
    }

    #[test]
    fn test_series_ids_skips_soft_deleted() {
        let m = cpu();
        let s2 = m.series_by_id(2).unwrap();
        s2.delete(s2.last_modified() + 1);

        assert_eq!(m.series_ids(), SeriesIds::from(vec![1, 3]));
    }

    #[test]
    fn test_drop_series_and_rebuild() {
        let m = cpu();
        let s2 = m.series_by_id(2).unwrap();
        s2.delete(s2.last_modified() + 1);
        m.drop_series(&s2);

        // Gone from the ID table, stale in the value sets.
        assert!(m.series_by_id(2).is_none());
        assert!(m.has_tag_key_value("host", "b"));
        assert_eq!(m.series_ids(), SeriesIds::from(vec![1, 3]));

        let rebuilt = m.rebuild();
        assert!(!Arc::ptr_eq(&m, &rebuilt));
        assert!(!rebuilt.has_tag_key_value("host", "b"));
        assert_eq!(rebuilt.series_ids(), SeriesIds::from(vec![1, 3]));
        assert!(rebuilt.has_tag_key_value("host", "a"));

        // Dropping an unknown series is a no-op and rebuilding a clean
        // measurement returns it unchanged.
        rebuilt.drop_series(&s2);
        let again = rebuilt.rebuild();
        assert!(Arc::ptr_eq(&rebuilt, &again));
    }

    #[test]
    fn test_rebuild_shares_field_names() {
        let m = cpu();
        m.set_field_name("value");
        let s1 = m.series_by_id(1).unwrap();
        m.drop_series(&s1);

        let rebuilt = m.rebuild();
        assert!(rebuilt.has_field("value"));

        // Registration through either snapshot is visible in both.
        rebuilt.set_field_name("load");
        assert!(m.has_field("load"));
    }

    #[test]
    fn test_tag_keys_and_values() {
        let m = cpu();

        assert_eq!(m.tag_keys(), vec!["host", "region"]);
        assert!(m.has_tag_key("host"));
        assert!(!m.has_tag_key("datacenter"));

        let mut values = m.tag_values(None, "host");
        values.sort();
        assert_eq!(values, vec!["a", "b"]);
        assert!(m.tag_values(None, "datacenter").is_empty());

        assert_eq!(m.cardinality("host"), 2);
        assert_eq!(m.cardinality("datacenter"), 0);
        assert_eq!(m.cardinality_bytes(b"region"), 2);
        assert_eq!(m.cardinality_bytes(&[0xff]), 0);

        let mut walked = Vec::new();
        m.walk_tag_keys(|k| walked.push(k.to_string()));
        walked.sort();
        assert_eq!(walked, vec!["host", "region"]);
    }

    struct HostOnly(&'static str);

    impl Authorizer for HostOnly {
        fn authorize_series_read(&self, _db: &str, _name: &str, tags: &Tags) -> bool {
            tags.get("host") == Some(self.0)
        }
    }

    #[test]
    fn test_tag_values_with_authorizer() {
        let m = cpu();
        let auth = HostOnly("a");

        let mut values = m.tag_values(Some(&auth), "region");
        values.sort();
        // host=a series exist in both regions.
        assert_eq!(values, vec!["east", "west"]);

        let values = m.tag_values(Some(&auth), "host");
        assert_eq!(values, vec!["a"]);
    }

    #[test]
    fn test_authorized() {
        let m = cpu();

        assert!(m.authorized(None));
        assert!(m.authorized(Some(&HostOnly("a"))));
        assert!(!m.authorized(Some(&HostOnly("nope"))));
    }

    #[test]
    fn test_fields() {
        let m = cpu();
        assert!(!m.has_field("value"));

        m.set_field_name("value");
        m.set_field_name("value");
        m.set_field_name("load");

        assert!(m.has_field("value"));
        let mut fields = m.field_names();
        fields.sort();
        assert_eq!(fields, vec!["load", "value"]);
    }

    #[test]
    fn test_stats() {
        let m = cpu();
        m.set_field_name("value");

        let stats = m.stats();
        assert_eq!(stats.series_n, 3);
        assert_eq!(stats.tag_key_n, 2);
        assert_eq!(stats.field_n, 1);

        // Stats serialize for reporting surfaces.
        let json = serde_json::to_value(stats).unwrap();
        assert_eq!(json["series_n"], 3);
    }

    #[test]
    fn test_has_series() {
        let m = Arc::new(Measurement::new("db0", "cpu"));
        assert!(!m.has_series());
        m.add_series(new_series(1, "cpu", &[]));
        assert!(m.has_series());
    }

    #[test]
    fn test_measurement_set_algebra() {
        let cpu = Arc::new(Measurement::new("db0", "cpu"));
        let mem = Arc::new(Measurement::new("db0", "mem"));
        let disk = Arc::new(Measurement::new("db0", "disk"));

        let a = MeasurementSet::new(vec![Arc::clone(&mem), Arc::clone(&cpu)]);
        let b = MeasurementSet::new(vec![Arc::clone(&disk), Arc::clone(&mem)]);

        let names = |s: &MeasurementSet| -> Vec<String> {
            s.iter().map(|m| m.name().to_string()).collect()
        };

        // Construction sorts by name.
        assert_eq!(names(&a), vec!["cpu", "mem"]);

        assert_eq!(names(&a.intersect(&b)), vec!["mem"]);
        assert_eq!(names(&a.union(&b)), vec!["cpu", "disk", "mem"]);
        assert!(a.intersect(&MeasurementSet::default()).is_empty());
        assert_eq!(a.union(&MeasurementSet::default()).len(), 2);
    }
}
