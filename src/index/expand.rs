//! Expression expansion
//!
//! Enumerates the tag values an expression pins down with equality and
//! expands the expression into the cross-product of concrete tag bindings.
//! Each key also gets one catch-all binding ("none of these values"), so
//! the expansion covers the whole value space. Callers use this to plan
//! meta queries over every distinct tag combination an expression can
//! select.

use crate::expr::{reduce, walk, Expr, Operator, Value, Valuer};
use crate::index::Measurement;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// One or more values bound to a tag key
///
/// `Eq` binds the single value in `values`; `Neq` is the catch-all binding
/// meaning "none of these values".
#[derive(Debug, Clone, PartialEq)]
pub struct TagExpr {
    /// The bound tag key
    pub key: String,
    /// The value (for `Eq`) or the excluded values (for `Neq`)
    pub values: Vec<String>,
    /// `Eq` or `Neq`
    pub op: Operator,
}

/// A combination of tag bindings and the expression reduced under them
#[derive(Debug, Clone, PartialEq)]
pub struct TagSetExpr {
    /// The bindings, in sorted key order
    pub values: Vec<TagExpr>,
    /// The input expression reduced against the bindings
    pub expr: Expr,
}

/// Valuer over one concrete set of tag bindings; a catch-all binding maps
/// its key to the absent value
struct TagValuer<'a> {
    tags: HashMap<&'a str, Option<&'a str>>,
}

impl Valuer for TagValuer<'_> {
    fn value(&self, name: &str) -> Option<Value> {
        match self.tags.get(name) {
            Some(Some(v)) => Some(Value::String((*v).to_string())),
            Some(None) => Some(Value::Null),
            None => None,
        }
    }
}

impl Measurement {
    /// Collect the distinct tag values referenced by equality comparisons
    /// in `expr`, as a sorted map of sorted values.
    ///
    /// Only equality contributes; no other operator can enumerate values.
    pub fn unique_tag_values(&self, expr: &Expr) -> BTreeMap<String, Vec<String>> {
        let mut tags: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();

        walk(expr, &mut |node| {
            let Expr::Binary(b) = node else { return };
            if b.op != Operator::Eq {
                return;
            }

            let (key, value) = match (b.lhs.as_ref(), b.rhs.as_ref()) {
                (Expr::VarRef(v), Expr::StringLiteral(s)) => (&v.name, s),
                (Expr::StringLiteral(s), Expr::VarRef(v)) => (&v.name, s),
                _ => return,
            };

            tags.entry(key.clone()).or_default().insert(value.clone());
        });

        tags.into_iter()
            .map(|(k, vs)| (k, vs.into_iter().collect()))
            .collect()
    }

    /// Expand `expr` into a tagset expression for every combination of its
    /// equality-referenced tag values.
    ///
    /// For each key, every referenced value produces an equality binding,
    /// plus one catch-all binding excluding them all. The expression is
    /// reduced under each combination; combinations that reduce to `false`
    /// are dropped.
    pub fn expand_expr(&self, expr: &Expr) -> Vec<TagSetExpr> {
        let values_by_key = self.unique_tag_values(expr);

        let keys: Vec<String> = values_by_key.keys().cloned().collect();
        let uniques: Vec<Vec<String>> = values_by_key.into_values().collect();

        let mut out = Vec::new();
        expand_with_values(expr, &keys, &mut Vec::new(), &uniques, 0, &mut out);
        out
    }
}

fn expand_with_values(
    expr: &Expr,
    keys: &[String],
    tag_exprs: &mut Vec<TagExpr>,
    uniques: &[Vec<String>],
    index: usize,
    out: &mut Vec<TagSetExpr>,
) {
    // All keys bound: reduce under this combination and keep it unless it
    // can never match.
    if index == keys.len() {
        let mut bindings: HashMap<&str, Option<&str>> = HashMap::with_capacity(keys.len());
        for (i, key) in keys.iter().enumerate() {
            let bound = match tag_exprs[i].op {
                Operator::Eq => Some(tag_exprs[i].values[0].as_str()),
                _ => None,
            };
            bindings.insert(key.as_str(), bound);
        }

        let reduced = reduce(expr, Some(&TagValuer { tags: bindings }));
        if matches!(reduced, Expr::BooleanLiteral(false)) {
            return;
        }

        out.push(TagSetExpr {
            values: tag_exprs.clone(),
            expr: reduced,
        });
        return;
    }

    for value in &uniques[index] {
        tag_exprs.push(TagExpr {
            key: keys[index].clone(),
            values: vec![value.clone()],
            op: Operator::Eq,
        });
        expand_with_values(expr, keys, tag_exprs, uniques, index + 1, out);
        tag_exprs.pop();
    }

    tag_exprs.push(TagExpr {
        key: keys[index].clone(),
        values: uniques[index].clone(),
        op: Operator::Neq,
    });
    expand_with_values(expr, keys, tag_exprs, uniques, index + 1, out);
    tag_exprs.pop();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn measurement() -> Arc<Measurement> {
        Arc::new(Measurement::new("db0", "cpu"))
    }

    fn tag_eq(key: &str, value: &str) -> Expr {
        Expr::binary(Operator::Eq, Expr::var(key), Expr::string(value))
    }

    #[test]
    fn test_unique_tag_values() {
        let m = measurement();

        let expr = Expr::and(
            Expr::or(tag_eq("host", "b"), tag_eq("host", "a")),
            Expr::or(
                tag_eq("region", "east"),
                // Reversed operand order still counts.
                Expr::binary(Operator::Eq, Expr::string("west"), Expr::var("region")),
            ),
        );

        let values = m.unique_tag_values(&expr);
        let keys: Vec<&String> = values.keys().collect();
        assert_eq!(keys, vec!["host", "region"]);
        assert_eq!(values["host"], vec!["a", "b"]);
        assert_eq!(values["region"], vec!["east", "west"]);
    }

    #[test]
    fn test_unique_tag_values_only_equality() {
        let m = measurement();

        let expr = Expr::and(
            Expr::binary(Operator::Neq, Expr::var("host"), Expr::string("a")),
            Expr::binary(Operator::Gt, Expr::var("value"), Expr::number(5.0)),
        );
        assert!(m.unique_tag_values(&expr).is_empty());
    }

    #[test]
    fn test_expand_single_key() {
        let m = measurement();

        let expr = Expr::or(tag_eq("host", "a"), tag_eq("host", "b"));
        let expanded = m.expand_expr(&expr);

        // Both equality bindings survive; the catch-all reduces to false
        // and is dropped.
        assert_eq!(expanded.len(), 2);

        assert_eq!(expanded[0].values.len(), 1);
        assert_eq!(expanded[0].values[0].key, "host");
        assert_eq!(expanded[0].values[0].values, vec!["a"]);
        assert_eq!(expanded[0].values[0].op, Operator::Eq);
        assert_eq!(expanded[0].expr, Expr::boolean(true));

        assert_eq!(expanded[1].values[0].values, vec!["b"]);
    }

    #[test]
    fn test_expand_keeps_field_residual() {
        let m = measurement();

        let residual = Expr::binary(Operator::Gt, Expr::var("value"), Expr::number(5.0));
        let expr = Expr::and(tag_eq("host", "a"), residual.clone());
        let expanded = m.expand_expr(&expr);

        assert_eq!(expanded.len(), 1);
        assert_eq!(expanded[0].values[0].values, vec!["a"]);
        assert_eq!(expanded[0].expr, residual);
    }

    #[test]
    fn test_expand_cross_product() {
        let m = measurement();

        let expr = Expr::or(tag_eq("host", "a"), tag_eq("region", "east"));
        let expanded = m.expand_expr(&expr);

        // (a, east), (a, none-of), (none-of, east) survive; the double
        // catch-all reduces to false.
        assert_eq!(expanded.len(), 3);
        for tse in &expanded {
            assert_eq!(tse.expr, Expr::boolean(true));
            assert_eq!(tse.values.len(), 2);
            assert_eq!(tse.values[0].key, "host");
            assert_eq!(tse.values[1].key, "region");
        }

        let catch_all: Vec<_> = expanded
            .iter()
            .flat_map(|t| t.values.iter())
            .filter(|v| v.op == Operator::Neq)
            .collect();
        assert_eq!(catch_all.len(), 2);
    }

    #[test]
    fn test_expand_without_equality_references() {
        let m = measurement();

        let expr = Expr::binary(Operator::Neq, Expr::var("host"), Expr::string("a"));
        let expanded = m.expand_expr(&expr);

        // Nothing to bind: one unreduced entry with no values.
        assert_eq!(expanded.len(), 1);
        assert!(expanded[0].values.is_empty());
        assert_eq!(expanded[0].expr, expr);
    }
}
