//! Predicate planner
//!
//! Translates a WHERE expression tree into a sorted set of candidate series
//! IDs plus a map of residual filters. Tag comparisons are answered from
//! the inverted index; field comparisons cannot be (fields are not
//! indexed), so they select every series and travel along as residual
//! expressions the query executor re-evaluates per point.
//!
//! AND/OR nodes combine their children with two-pointer merges over the
//! sorted ID sets, folding the residual filters together as they go.

use crate::error::{IndexError, IndexResult};
use crate::expr::{reduce, BinaryExpr, Expr, Operator, VarRef, VarType};
use crate::index::{EvictSeriesIds, Measurement, SeriesIds, StringSet, TagValueIndex};
use crate::model::{make_tags_key, Tags};
use crate::query::{SelectOptions, TagSet};
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;

/// The measurement-name pseudo-tag
const NAME_TAG: &str = "_name";

/// The tag-key pseudo-tag used by meta queries
const TAG_KEY_TAG: &str = "_tagKey";

/// Residual filter expressions keyed by series ID
#[derive(Debug, Clone, Default)]
pub struct FilterMap(HashMap<u64, Arc<Expr>>);

impl FilterMap {
    /// Create an empty map
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty map with room for `capacity` entries
    pub fn with_capacity(capacity: usize) -> Self {
        Self(HashMap::with_capacity(capacity))
    }

    /// The residual filter for a series, if any
    pub fn get(&self, id: u64) -> Option<&Arc<Expr>> {
        self.0.get(&id)
    }

    /// Set the residual filter for a series
    pub fn insert(&mut self, id: u64, expr: Arc<Expr>) {
        self.0.insert(id, expr);
    }

    /// Number of series with residual filters
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if no series has a residual filter
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate the (id, filter) entries in arbitrary order
    pub fn iter(&self) -> impl Iterator<Item = (u64, &Arc<Expr>)> {
        self.0.iter().map(|(&id, e)| (id, e))
    }

    /// Drop every entry whose filter is the constant `true`; such a filter
    /// accepts every point and only costs the executor work
    pub fn delete_bool_literal_trues(&mut self) {
        self.0
            .retain(|_, e| !matches!(e.as_ref(), Expr::BooleanLiteral(true)));
    }
}

/// Intersect two sorted (ids, filters) results for an AND node.
///
/// A series surviving the intersection keeps the conjunction of the filters
/// it carried on each side; a side without a filter contributes no
/// constraint.
pub fn intersect_series_filters(
    lids: &SeriesIds,
    rids: &SeriesIds,
    lfilters: &FilterMap,
    rfilters: &FilterMap,
) -> (SeriesIds, FilterMap) {
    let mut ids = SeriesIds::with_capacity(lids.len().min(rids.len()));
    let mut filters = FilterMap::with_capacity(lfilters.len().min(rfilters.len()));

    let (mut i, mut j) = (0, 0);
    while i < lids.len() && j < rids.len() {
        let (lid, rid) = (lids[i], rids[j]);
        if lid == rid {
            ids.push(lid);

            let expr = match (lfilters.get(lid), rfilters.get(rid)) {
                (Some(lf), Some(rf)) => {
                    let combined = Expr::and((**lf).clone(), (**rf).clone());
                    Some(Arc::new(reduce(&combined, None)))
                }
                (Some(lf), None) => Some(Arc::clone(lf)),
                (None, Some(rf)) => Some(Arc::clone(rf)),
                (None, None) => None,
            };
            if let Some(expr) = expr {
                filters.insert(lid, expr);
            }

            i += 1;
            j += 1;
        } else if lid < rid {
            i += 1;
        } else {
            j += 1;
        }
    }

    (ids, filters)
}

/// Union two sorted (ids, filters) results for an OR node.
///
/// A series present on both sides keeps a filter only when both sides
/// constrain it (the disjunction); a series included on one side without a
/// filter is in the result unconditionally.
pub fn union_series_filters(
    lids: &SeriesIds,
    rids: &SeriesIds,
    lfilters: &FilterMap,
    rfilters: &FilterMap,
) -> (SeriesIds, FilterMap) {
    let mut ids = SeriesIds::with_capacity(lids.len() + rids.len());
    let mut filters = FilterMap::with_capacity(lfilters.len().min(rfilters.len()));

    let (mut i, mut j) = (0, 0);
    while i < lids.len() && j < rids.len() {
        let (lid, rid) = (lids[i], rids[j]);
        if lid == rid {
            ids.push(lid);

            if let (Some(lf), Some(rf)) = (lfilters.get(lid), rfilters.get(rid)) {
                let combined = Expr::or((**lf).clone(), (**rf).clone());
                filters.insert(lid, Arc::new(reduce(&combined, None)));
            }

            i += 1;
            j += 1;
        } else if lid < rid {
            ids.push(lid);
            if let Some(lf) = lfilters.get(lid) {
                filters.insert(lid, Arc::clone(lf));
            }
            i += 1;
        } else {
            ids.push(rid);
            if let Some(rf) = rfilters.get(rid) {
                filters.insert(rid, Arc::clone(rf));
            }
            j += 1;
        }
    }

    for &lid in &lids[i..] {
        ids.push(lid);
        if let Some(lf) = lfilters.get(lid) {
            filters.insert(lid, Arc::clone(lf));
        }
    }
    for &rid in &rids[j..] {
        ids.push(rid);
        if let Some(rf) = rfilters.get(rid) {
            filters.insert(rid, Arc::clone(rf));
        }
    }

    (ids, filters)
}

impl Measurement {
    /// Resolve a condition to (ids, filters); `None` selects every live
    /// series with no residual filters
    pub fn filters(&self, condition: Option<&Expr>) -> IndexResult<(SeriesIds, FilterMap)> {
        match condition {
            None => Ok((self.series_ids(), FilterMap::new())),
            Some(expr) => self.walk_where_for_series_ids(expr),
        }
    }

    /// Recursively walk a WHERE expression and return the ordered set of
    /// matching series IDs together with the residual filter each series
    /// must still pass.
    pub fn walk_where_for_series_ids(&self, expr: &Expr) -> IndexResult<(SeriesIds, FilterMap)> {
        match expr {
            Expr::Binary(b) => match b.op {
                op if op.is_comparison() => {
                    let (ids, residual) = self.ids_and_filter_for_expr(b)?;
                    if ids.is_empty() {
                        return Ok((ids, FilterMap::new()));
                    }

                    // The constant-true filter carries no information.
                    let residual = residual
                        .filter(|e| !matches!(e.as_ref(), Expr::BooleanLiteral(true)));

                    let mut filters = FilterMap::new();
                    if let Some(residual) = residual {
                        filters = FilterMap::with_capacity(ids.len());
                        for &id in &ids {
                            filters.insert(id, Arc::clone(&residual));
                        }
                    }

                    Ok((ids, filters))
                }
                Operator::And | Operator::Or => {
                    let (lids, lfilters) = self.walk_where_for_series_ids(&b.lhs)?;
                    let (rids, rfilters) = self.walk_where_for_series_ids(&b.rhs)?;

                    if b.op == Operator::And {
                        Ok(intersect_series_filters(&lids, &rids, &lfilters, &rfilters))
                    } else {
                        Ok(union_series_filters(&lids, &rids, &lfilters, &rfilters))
                    }
                }
                _ => {
                    let (ids, _) = self.ids_and_filter_for_expr(b)?;
                    Ok((ids, FilterMap::new()))
                }
            },
            Expr::Paren(inner) => self.walk_where_for_series_ids(inner),
            _ => Ok((SeriesIds::new(), FilterMap::new())),
        }
    }

    /// The candidate series IDs for a single comparison
    pub fn ids_for_expr(&self, n: &BinaryExpr) -> IndexResult<SeriesIds> {
        let (ids, _) = self.ids_and_filter_for_expr(n)?;
        Ok(ids)
    }

    /// Walk an expression for matching series IDs, or return every live ID
    /// when no expression is given
    pub fn series_ids_all_or_by_expr(&self, expr: Option<&Expr>) -> IndexResult<SeriesIds> {
        let Some(expr) = expr else {
            return Ok(self.series_ids());
        };
        if !self.has_series() {
            return Ok(SeriesIds::new());
        }

        let (ids, _) = self.walk_where_for_series_ids(expr)?;
        Ok(ids)
    }

    /// Call `f` with the key and tags of every live series matching the
    /// condition, propagating the callback's error
    pub fn for_each_series_by_expr<F>(&self, condition: Option<&Expr>, mut f: F) -> IndexResult<()>
    where
        F: FnMut(&str, &Tags) -> IndexResult<()>,
    {
        let (ids, _) = self.filters(condition)?;

        for &id in &ids {
            if let Some(series) = self.series_by_id(id) {
                if series.deleted() {
                    continue;
                }
                f(series.key(), &series.tags())?;
            }
        }

        Ok(())
    }

    /// True when the reference names a field rather than a tag
    fn is_field_ref(&self, v: &VarRef) -> bool {
        match v.var_type {
            VarType::Unknown => self.has_field(&v.name),
            VarType::AnyField => true,
            VarType::Tag => false,
            _ => true,
        }
    }

    /// Resolve one comparison to (candidate ids, residual filter).
    ///
    /// Field comparisons return every live series with the comparison
    /// itself as the residual. Tag comparisons are answered exactly from
    /// the value index and carry no residual.
    fn ids_and_filter_for_expr(
        &self,
        n: &BinaryExpr,
    ) -> IndexResult<(SeriesIds, Option<Arc<Expr>>)> {
        // A nested binary expression is arithmetic on fields; the executor
        // evaluates it per point.
        if matches!(n.lhs.as_ref(), Expr::Binary(_)) || matches!(n.rhs.as_ref(), Expr::Binary(_)) {
            return Ok((self.series_ids(), Some(Arc::new(Expr::Binary(n.clone())))));
        }

        // Find the variable reference, preferring the left side.
        let (name, value) = match (n.lhs.as_ref(), n.rhs.as_ref()) {
            (Expr::VarRef(v), other) => (v, other),
            (other, Expr::VarRef(v)) => (v, other),
            _ => {
                return Err(IndexError::InvalidExpression(
                    Expr::Binary(n.clone()).to_string(),
                ))
            }
        };

        // Field comparisons cannot be answered from the index.
        if name.name != NAME_TAG && self.is_field_ref(name) {
            return Ok((self.series_ids(), Some(Arc::new(Expr::Binary(n.clone())))));
        }
        if let Expr::VarRef(value_ref) = value {
            if value_ref.name != NAME_TAG && self.is_field_ref(value_ref) {
                return Ok((self.series_ids(), Some(Arc::new(Expr::Binary(n.clone())))));
            }
        }

        let tag_vals = self.series_by_tag_key_value(&name.name);

        if let Expr::StringLiteral(s) = value {
            return Ok((self.ids_for_string_literal(n.op, name, s, tag_vals.as_deref()), None));
        }

        if let Expr::RegexLiteral(re) = value {
            return self.ids_for_regex(n.op, name, re, tag_vals.as_deref());
        }

        if let Expr::VarRef(value_ref) = value {
            return Ok((
                self.ids_for_tag_comparison(n.op, value_ref, tag_vals.as_deref()),
                None,
            ));
        }

        // Comparison against some other literal: a negative operator
        // matches everything, anything else matches nothing.
        if n.op == Operator::Neq || n.op == Operator::NeqRegex {
            return Ok((self.series_ids(), None));
        }
        Ok((SeriesIds::new(), None))
    }

    fn ids_for_string_literal(
        &self,
        op: Operator,
        name: &VarRef,
        s: &str,
        tag_vals: Option<&TagValueIndex>,
    ) -> SeriesIds {
        // The measurement-name pseudo-tag matches all series or none.
        if name.name == NAME_TAG {
            if (op == Operator::Eq && s == self.name())
                || (op == Operator::Neq && s != self.name())
            {
                return self.series_ids();
            }
            return SeriesIds::new();
        }

        let mut ids = SeriesIds::new();
        if op == Operator::Eq {
            if !s.is_empty() {
                if let Some(tv) = tag_vals {
                    ids = tv.load(s);
                }
            } else {
                // key = '': the series missing this tag entirely. Start
                // from the full universe and evict everything that carries
                // any value for the key.
                let mut evictable = EvictSeriesIds::new(&self.series_ids());
                if let Some(tv) = tag_vals {
                    tv.range_all(|_, a| evictable.mark(a));
                }
                ids = evictable.evict();
            }
        } else if op == Operator::Neq {
            if !s.is_empty() {
                let loaded = tag_vals.map(|tv| tv.load(s)).unwrap_or_default();
                ids = self.series_ids().reject(&loaded);
            } else {
                // key != '': every series carrying any value for the key.
                if let Some(tv) = tag_vals {
                    tv.range_all(|_, a| ids.extend_from(a));
                }
                ids.sort();
            }
        }
        ids
    }

    fn ids_for_regex(
        &self,
        op: Operator,
        name: &VarRef,
        re: &Regex,
        tag_vals: Option<&TagValueIndex>,
    ) -> IndexResult<(SeriesIds, Option<Arc<Expr>>)> {
        if name.name == NAME_TAG {
            let is_match = re.is_match(self.name());
            if (op == Operator::EqRegex && is_match)
                || (op == Operator::NeqRegex && !is_match)
            {
                return Ok((
                    self.series_ids(),
                    Some(Arc::new(Expr::BooleanLiteral(true))),
                ));
            }
            return Ok((SeriesIds::new(), None));
        }

        // A pattern matching the empty string also matches series that are
        // missing the tag, which flips the scan between collecting matches
        // and evicting non-matches from the full universe.
        let empty = re.is_match("");

        let mut ids = SeriesIds::new();
        if empty && op == Operator::EqRegex {
            let mut evictable = EvictSeriesIds::new(&self.series_ids());
            if let Some(tv) = tag_vals {
                tv.range_all(|value, a| {
                    if !re.is_match(value) {
                        evictable.mark(a);
                    }
                });
            }
            ids = evictable.evict();
        } else if empty && op == Operator::NeqRegex {
            if let Some(tv) = tag_vals {
                tv.range_all(|value, a| {
                    if !re.is_match(value) {
                        ids.extend_from(a);
                    }
                });
            }
            ids.sort();
        } else if !empty && op == Operator::EqRegex {
            if let Some(tv) = tag_vals {
                tv.range_all(|value, a| {
                    if re.is_match(value) {
                        ids.extend_from(a);
                    }
                });
            }
            ids.sort();
        } else if !empty && op == Operator::NeqRegex {
            let mut evictable = EvictSeriesIds::new(&self.series_ids());
            if let Some(tv) = tag_vals {
                tv.range_all(|value, a| {
                    if re.is_match(value) {
                        evictable.mark(a);
                    }
                });
            }
            ids = evictable.evict();
        }

        Ok((ids, None))
    }

    fn ids_for_tag_comparison(
        &self,
        op: Operator,
        value_ref: &VarRef,
        tag_vals: Option<&TagValueIndex>,
    ) -> SeriesIds {
        let mut ids = if op == Operator::Neq {
            self.series_ids()
        } else {
            SeriesIds::new()
        };

        let rhs_vals = self.series_by_tag_key_value(&value_ref.name);
        if let Some(tv) = tag_vals {
            tv.range_all(|value, a| {
                // Series whose two tags carry the same value.
                let matched = a.intersect(
                    &rhs_vals
                        .as_deref()
                        .map(|r| r.load(value))
                        .unwrap_or_default(),
                );
                if op == Operator::Eq {
                    ids = ids.union(&matched);
                } else if op == Operator::Neq {
                    ids = ids.reject(&matched);
                }
            });
        }
        ids
    }

    /// Group the series matching `opt.condition` by the values of the
    /// requested dimension tag keys.
    ///
    /// Only live series assigned to `shard_id` (and passing the authorizer,
    /// if any) are grouped. Each group carries its series keys sorted, with
    /// the residual filter for each; groups come back sorted by group key.
    pub fn tag_sets(&self, shard_id: u64, opt: &SelectOptions) -> IndexResult<Vec<TagSet>> {
        let (ids, filters) = self.filters(opt.condition.as_ref())?;

        let mut dims = opt.dimensions.clone();
        dims.sort_unstable();

        let mut groups: HashMap<Vec<u8>, TagSet> = HashMap::with_capacity(64);
        {
            let inner = self.inner.read().unwrap();
            let mut series_n = 0usize;
            for &id in &ids {
                if let Some(interrupt) = &opt.interrupt {
                    if interrupt.is_signalled() {
                        return Err(IndexError::QueryInterrupted);
                    }
                }

                if opt.max_series_n > 0 && series_n > opt.max_series_n {
                    return Err(IndexError::MaxSeriesExceeded {
                        count: series_n,
                        limit: opt.max_series_n,
                    });
                }

                let Some(series) = inner.series_by_id.get(&id) else {
                    continue;
                };
                if series.deleted() || !series.assigned(shard_id) {
                    continue;
                }

                if let Some(auth) = &opt.authorizer {
                    if !auth.authorize_series_read(self.database(), self.name(), &series.tags())
                    {
                        continue;
                    }
                }

                let tags_key = if dims.is_empty() {
                    Vec::new()
                } else {
                    make_tags_key(&dims, &series.tags())
                };

                let group = groups
                    .entry(tags_key)
                    .or_insert_with_key(|key| TagSet::new(key.clone()));
                group.add_filter(series.key().to_string(), filters.get(id).cloned());
                series_n += 1;
            }
        }

        // The measurement lock is released; only the groups are touched
        // from here on.
        let mut result: Vec<TagSet> = groups.into_values().collect();
        for group in &mut result {
            if let Some(interrupt) = &opt.interrupt {
                if interrupt.is_signalled() {
                    return Err(IndexError::QueryInterrupted);
                }
            }
            group.sort_series();
        }
        result.sort_by(|a, b| a.key.cmp(&b.key));

        Ok(result)
    }

    /// Resolve a meta-query expression over the `_tagKey` pseudo-tag to the
    /// set of tag keys it selects.
    ///
    /// Returns `Ok(None)` when the expression does not constrain the key
    /// space (a comparison on some other name). Passing no expression
    /// selects every tag key.
    pub fn tag_keys_by_expr(&self, expr: Option<&Expr>) -> IndexResult<Option<StringSet>> {
        let Some(expr) = expr else {
            return Ok(Some(self.tag_keys().into_iter().collect()));
        };

        match expr {
            Expr::Binary(b) => match b.op {
                Operator::Eq | Operator::Neq | Operator::EqRegex | Operator::NeqRegex => {
                    let Expr::VarRef(tag) = b.lhs.as_ref() else {
                        return Err(IndexError::InvalidExpression(format!(
                            "left side of '{}' must be a tag key",
                            b.op
                        )));
                    };
                    if tag.name != TAG_KEY_TAG {
                        return Ok(None);
                    }

                    if b.op.is_regex_op() {
                        let Expr::RegexLiteral(re) = b.rhs.as_ref() else {
                            return Err(IndexError::InvalidExpression(format!(
                                "right side of '{}' must be a regular expression",
                                b.op
                            )));
                        };
                        Ok(Some(self.tag_keys_by_filter(b.op, "", Some(re))))
                    } else {
                        let Expr::StringLiteral(s) = b.rhs.as_ref() else {
                            return Err(IndexError::InvalidExpression(format!(
                                "right side of '{}' must be a tag value string",
                                b.op
                            )));
                        };
                        Ok(Some(self.tag_keys_by_filter(b.op, s, None)))
                    }
                }
                Operator::And | Operator::Or => {
                    let lhs = self.tag_keys_by_expr(Some(&b.lhs))?;
                    let rhs = self.tag_keys_by_expr(Some(&b.rhs))?;

                    match (lhs, rhs) {
                        (Some(l), Some(r)) => {
                            if b.op == Operator::Or {
                                Ok(Some(l.union(&r)))
                            } else {
                                Ok(Some(l.intersect(&r)))
                            }
                        }
                        (Some(l), None) => Ok(Some(l)),
                        (None, Some(r)) => Ok(Some(r)),
                        (None, None) => Ok(None),
                    }
                }
                _ => Err(IndexError::InvalidExpression("invalid operator".to_string())),
            },
            Expr::Paren(inner) => self.tag_keys_by_expr(Some(inner)),
            _ => Err(IndexError::InvalidExpression(expr.to_string())),
        }
    }

    fn tag_keys_by_filter(&self, op: Operator, val: &str, regex: Option<&Regex>) -> StringSet {
        let mut set = StringSet::new();
        for key in self.tag_keys() {
            let matched = match (op, regex) {
                (Operator::Eq, _) => key == val,
                (Operator::Neq, _) => key != val,
                (Operator::EqRegex, Some(re)) => re.is_match(&key),
                (Operator::NeqRegex, Some(re)) => !re.is_match(&key),
                _ => false,
            };
            if matched {
                set.add(key);
            }
        }
        set
    }
}
