//! Query-side plumbing consumed by the planner
//!
//! - `Authorizer`: capability deciding whether a series may be read
//! - `SelectOptions`: per-query options (condition, dimensions, limits)
//! - `InterruptSignal`: cooperative cancellation flag polled during scans
//! - `TagSet`: one GROUP BY group with its per-series residual filters

use crate::expr::Expr;
use crate::model::Tags;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Decides whether individual series may be read by the current query
pub trait Authorizer: Send + Sync {
    /// Return true if the series identified by its measurement and tags may
    /// be read from `database`
    fn authorize_series_read(&self, database: &str, measurement: &str, tags: &Tags) -> bool;
}

/// A clonable flag that cancels in-flight scans
///
/// Scans poll the flag once per series and bail out with
/// `IndexError::QueryInterrupted` when it is raised.
#[derive(Debug, Clone, Default)]
pub struct InterruptSignal(Arc<AtomicBool>);

impl InterruptSignal {
    /// Create a new, unraised signal
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the signal; all clones observe it
    pub fn signal(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Check whether the signal has been raised
    pub fn is_signalled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Options controlling a planner scan
#[derive(Clone, Default)]
pub struct SelectOptions {
    /// WHERE condition; `None` selects every series
    pub condition: Option<Expr>,
    /// Tag keys to group by
    pub dimensions: Vec<String>,
    /// Optional per-series read authorization
    pub authorizer: Option<Arc<dyn Authorizer>>,
    /// Optional cancellation signal
    pub interrupt: Option<InterruptSignal>,
    /// Maximum number of series a scan may touch; 0 means unlimited
    pub max_series_n: usize,
}

impl SelectOptions {
    /// Create empty options (select everything, no limits)
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: set the WHERE condition
    pub fn condition(mut self, expr: Expr) -> Self {
        self.condition = Some(expr);
        self
    }

    /// Builder: set the GROUP BY dimensions
    pub fn dimensions(mut self, dims: &[&str]) -> Self {
        self.dimensions = dims.iter().map(|d| d.to_string()).collect();
        self
    }

    /// Builder: set the authorizer
    pub fn authorizer(mut self, auth: Arc<dyn Authorizer>) -> Self {
        self.authorizer = Some(auth);
        self
    }

    /// Builder: attach an interrupt signal
    pub fn interrupt(mut self, signal: InterruptSignal) -> Self {
        self.interrupt = Some(signal);
        self
    }

    /// Builder: cap the number of series a scan may touch
    pub fn max_series_n(mut self, n: usize) -> Self {
        self.max_series_n = n;
        self
    }
}

/// One GROUP BY group: the series sharing a combination of dimension values
///
/// Series keys and their residual filters are kept in tandem; sorting orders
/// both by series key.
#[derive(Debug, Clone, Default)]
pub struct TagSet {
    /// Canonical group key (see `model::make_tags_key`)
    pub key: Vec<u8>,
    /// Keys of the series in this group
    pub series_keys: Vec<String>,
    /// Residual filter for each series, parallel to `series_keys`
    pub filters: Vec<Option<Arc<Expr>>>,
}

impl TagSet {
    /// Create an empty group for the given key
    pub fn new(key: Vec<u8>) -> Self {
        Self {
            key,
            series_keys: Vec::new(),
            filters: Vec::new(),
        }
    }

    /// Append a series and its residual filter to the group
    pub fn add_filter(&mut self, series_key: String, filter: Option<Arc<Expr>>) {
        self.series_keys.push(series_key);
        self.filters.push(filter);
    }

    /// Number of series in the group
    pub fn len(&self) -> usize {
        self.series_keys.len()
    }

    /// Check if the group is empty
    pub fn is_empty(&self) -> bool {
        self.series_keys.is_empty()
    }

    /// Sort the series (and their filters) by series key
    pub fn sort_series(&mut self) {
        let mut entries: Vec<(String, Option<Arc<Expr>>)> = self
            .series_keys
            .drain(..)
            .zip(self.filters.drain(..))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        for (key, filter) in entries {
            self.series_keys.push(key);
            self.filters.push(filter);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::Operator;

    #[test]
    fn test_interrupt_signal_shared_across_clones() {
        let signal = InterruptSignal::new();
        let observer = signal.clone();

        assert!(!observer.is_signalled());
        signal.signal();
        assert!(observer.is_signalled());
    }

    #[test]
    fn test_select_options_builder() {
        let opt = SelectOptions::new()
            .condition(Expr::binary(
                Operator::Eq,
                Expr::var("host"),
                Expr::string("a"),
            ))
            .dimensions(&["region"])
            .max_series_n(100);

        assert!(opt.condition.is_some());
        assert_eq!(opt.dimensions, vec!["region"]);
        assert_eq!(opt.max_series_n, 100);
        assert!(opt.authorizer.is_none());
    }

    #[test]
    fn test_tag_set_sort_keeps_filters_aligned() {
        let filter = Arc::new(Expr::binary(
            Operator::Gt,
            Expr::var("value"),
            Expr::number(5.0),
        ));

        let mut set = TagSet::new(b"region=east".to_vec());
        set.add_filter("cpu,host=b".to_string(), None);
        set.add_filter("cpu,host=a".to_string(), Some(filter.clone()));
        set.sort_series();

        assert_eq!(set.series_keys, vec!["cpu,host=a", "cpu,host=b"]);
        assert!(set.filters[0].is_some());
        assert!(set.filters[1].is_none());
        assert_eq!(set.len(), 2);
    }
}
