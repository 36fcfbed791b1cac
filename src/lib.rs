//! # ridgeline
//!
//! The in-memory measurement index of a time-series shard: a concurrent
//! structure tracking live series, a tag inverted index over them, and a
//! predicate planner that answers WHERE clauses with sorted series-ID sets
//! plus residual field filters for the query executor.
//!
//! ## Features
//!
//! - **Concurrent index**: read-write locked per measurement, per tag key
//!   and per series for read-heavy workloads
//! - **Set-algebra planning**: AND/OR over two-pointer merges of sorted ID
//!   vectors
//! - **Soft deletes**: dropped series are skipped by readers and purged by
//!   an amortized rebuild
//! - **GROUP BY**: tag-set grouping with authorization, interrupt and
//!   series-limit handling
//!
//! ## Modules
//!
//! - [`index`]: the measurement index, planner and ID-set algebra
//! - [`expr`]: the predicate expression AST, walker and reducer
//! - [`query`]: authorizer, select options and GROUP BY results
//! - [`model`]: tags and the canonical group-key serialization
//!
//! ## Quick Start
//!
//! ```rust
//! use ridgeline::{Expr, Measurement, Operator, Series, Tags};
//! use std::sync::Arc;
//!
//! let m = Arc::new(Measurement::new("db0", "cpu"));
//!
//! let series = Arc::new(Series::new(
//!     1,
//!     "cpu,host=a",
//!     Tags::from_pairs([("host", "a")]),
//! ));
//! series.assign_shard(1);
//! m.add_series(series);
//! m.set_field_name("value");
//!
//! // host = 'a'
//! let expr = Expr::binary(Operator::Eq, Expr::var("host"), Expr::string("a"));
//! let (ids, filters) = m.walk_where_for_series_ids(&expr).unwrap();
//!
//! assert_eq!(ids.to_vec(), vec![1]);
//! assert!(filters.is_empty());
//! ```

pub mod error;
pub mod expr;
pub mod index;
pub mod model;
pub mod query;

// Re-export top-level types for convenience
pub use error::{IndexError, IndexResult};

pub use expr::{reduce, walk, Expr, Operator, Value, Valuer, VarType};

pub use index::{
    EvictSeriesIds, FilterMap, Measurement, MeasurementSet, MeasurementStats, Series, SeriesIds,
    StringSet, TagSetExpr, TagValueIndex,
};

pub use model::{make_tags_key, Tag, Tags};

pub use query::{Authorizer, InterruptSignal, SelectOptions, TagSet};
