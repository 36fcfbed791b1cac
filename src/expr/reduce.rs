//! Expression reduction
//!
//! Constant-folds an expression tree, optionally substituting variable
//! references through a `Valuer`. The planner leans on this twice: to
//! simplify combined residual filters during AND/OR merges, and to test
//! concrete tag bindings during expression expansion.

use super::{BinaryExpr, Expr, Operator};

/// A concrete value a variable reference can reduce to
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// A string value
    String(String),
    /// A numeric value
    Number(f64),
    /// A boolean value
    Boolean(bool),
    /// The name is known but carries no value (an absent tag)
    Null,
}

/// Maps variable names to optional values during reduction
pub trait Valuer {
    /// Return the value bound to `name`, or `None` if the name is unknown
    /// to this valuer (the reference is left in place)
    fn value(&self, name: &str) -> Option<Value>;
}

/// Reduce an expression by constant folding, substituting variable
/// references through `valuer` when one is provided.
///
/// Reduction is conservative: anything that cannot be folded is rebuilt
/// unchanged, so the result is always a valid filter for the executor.
pub fn reduce(expr: &Expr, valuer: Option<&dyn Valuer>) -> Expr {
    match expr {
        Expr::Binary(b) => reduce_binary(b, valuer),
        Expr::Paren(inner) => {
            let r = reduce(inner, valuer);
            if r.is_literal() {
                r
            } else {
                Expr::Paren(Box::new(r))
            }
        }
        Expr::VarRef(v) => {
            if let Some(valuer) = valuer {
                if let Some(value) = valuer.value(&v.name) {
                    return value_expr(value);
                }
            }
            expr.clone()
        }
        _ => expr.clone(),
    }
}

fn value_expr(value: Value) -> Expr {
    match value {
        Value::String(s) => Expr::StringLiteral(s),
        Value::Number(n) => Expr::NumberLiteral(n),
        Value::Boolean(b) => Expr::BooleanLiteral(b),
        Value::Null => Expr::NullLiteral,
    }
}

fn reduce_binary(b: &BinaryExpr, valuer: Option<&dyn Valuer>) -> Expr {
    let lhs = reduce(&b.lhs, valuer);
    let rhs = reduce(&b.rhs, valuer);

    match b.op {
        Operator::And => match (&lhs, &rhs) {
            (Expr::BooleanLiteral(false), _) | (_, Expr::BooleanLiteral(false)) => {
                Expr::BooleanLiteral(false)
            }
            (Expr::BooleanLiteral(true), other) | (other, Expr::BooleanLiteral(true)) => {
                other.clone()
            }
            _ => Expr::binary(b.op, lhs, rhs),
        },
        Operator::Or => match (&lhs, &rhs) {
            (Expr::BooleanLiteral(true), _) | (_, Expr::BooleanLiteral(true)) => {
                Expr::BooleanLiteral(true)
            }
            (Expr::BooleanLiteral(false), other) | (other, Expr::BooleanLiteral(false)) => {
                other.clone()
            }
            _ => Expr::binary(b.op, lhs, rhs),
        },
        op if op.is_comparison() => fold_comparison(op, lhs, rhs),
        Operator::Add | Operator::Sub | Operator::Mul | Operator::Div => {
            if let (Expr::NumberLiteral(a), Expr::NumberLiteral(c)) = (&lhs, &rhs) {
                let n = match b.op {
                    Operator::Add => a + c,
                    Operator::Sub => a - c,
                    Operator::Mul => a * c,
                    _ => a / c,
                };
                Expr::NumberLiteral(n)
            } else {
                Expr::binary(b.op, lhs, rhs)
            }
        }
        _ => Expr::binary(b.op, lhs, rhs),
    }
}

fn fold_comparison(op: Operator, lhs: Expr, rhs: Expr) -> Expr {
    // A comparison against the absent value can never hold, except for the
    // negative operators which hold vacuously.
    if matches!(lhs, Expr::NullLiteral) || matches!(rhs, Expr::NullLiteral) {
        return Expr::BooleanLiteral(matches!(op, Operator::Neq | Operator::NeqRegex));
    }

    let folded = match (&lhs, &rhs) {
        (Expr::StringLiteral(a), Expr::StringLiteral(b)) => op.compare_str(a, b),
        (Expr::NumberLiteral(a), Expr::NumberLiteral(b)) => op.compare_f64(*a, *b),
        (Expr::BooleanLiteral(a), Expr::BooleanLiteral(b)) => match op {
            Operator::Eq => Some(a == b),
            Operator::Neq => Some(a != b),
            _ => None,
        },
        (Expr::StringLiteral(s), Expr::RegexLiteral(re)) => match op {
            Operator::EqRegex => Some(re.is_match(s)),
            Operator::NeqRegex => Some(!re.is_match(s)),
            _ => None,
        },
        _ => None,
    };

    match folded {
        Some(v) => Expr::BooleanLiteral(v),
        None => Expr::binary(op, lhs, rhs),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use regex::Regex;
    use std::collections::HashMap;

    struct MapValuer(HashMap<String, Value>);

    impl Valuer for MapValuer {
        fn value(&self, name: &str) -> Option<Value> {
            self.0.get(name).cloned()
        }
    }

    fn host_eq(v: &str) -> Expr {
        Expr::binary(Operator::Eq, Expr::var("host"), Expr::string(v))
    }

    #[test]
    fn test_boolean_short_circuit() {
        let residual = Expr::binary(Operator::Gt, Expr::var("value"), Expr::number(5.0));

        let expr = Expr::and(Expr::boolean(true), residual.clone());
        assert_eq!(reduce(&expr, None), residual);

        let expr = Expr::and(Expr::boolean(false), residual.clone());
        assert_eq!(reduce(&expr, None), Expr::boolean(false));

        let expr = Expr::or(Expr::boolean(true), residual.clone());
        assert_eq!(reduce(&expr, None), Expr::boolean(true));

        let expr = Expr::or(Expr::boolean(false), residual.clone());
        assert_eq!(reduce(&expr, None), residual);
    }

    #[test]
    fn test_fold_literals() {
        let expr = Expr::binary(Operator::Lt, Expr::number(1.0), Expr::number(2.0));
        assert_eq!(reduce(&expr, None), Expr::boolean(true));

        let expr = Expr::binary(Operator::Eq, Expr::string("a"), Expr::string("b"));
        assert_eq!(reduce(&expr, None), Expr::boolean(false));

        let expr = Expr::binary(
            Operator::EqRegex,
            Expr::string("server01"),
            Expr::regex(Regex::new("^server").unwrap()),
        );
        assert_eq!(reduce(&expr, None), Expr::boolean(true));
    }

    #[test]
    fn test_fold_arithmetic() {
        // value + 5 > 10 with value bound to 7 folds all the way down
        let expr = Expr::binary(
            Operator::Gt,
            Expr::binary(Operator::Add, Expr::var("value"), Expr::number(5.0)),
            Expr::number(10.0),
        );

        let mut bindings = HashMap::new();
        bindings.insert("value".to_string(), Value::Number(7.0));
        let valuer = MapValuer(bindings);

        assert_eq!(reduce(&expr, Some(&valuer)), Expr::boolean(true));
    }

    #[test]
    fn test_valuer_substitution() {
        let mut bindings = HashMap::new();
        bindings.insert("host".to_string(), Value::String("a".to_string()));
        let valuer = MapValuer(bindings);

        assert_eq!(reduce(&host_eq("a"), Some(&valuer)), Expr::boolean(true));
        assert_eq!(reduce(&host_eq("b"), Some(&valuer)), Expr::boolean(false));

        // Unknown names are left in place.
        let expr = Expr::binary(Operator::Eq, Expr::var("region"), Expr::string("east"));
        assert_eq!(reduce(&expr, Some(&valuer)), expr);
    }

    #[test]
    fn test_null_comparisons() {
        let mut bindings = HashMap::new();
        bindings.insert("host".to_string(), Value::Null);
        let valuer = MapValuer(bindings);

        assert_eq!(reduce(&host_eq("a"), Some(&valuer)), Expr::boolean(false));

        let expr = Expr::binary(Operator::Neq, Expr::var("host"), Expr::string("a"));
        assert_eq!(reduce(&expr, Some(&valuer)), Expr::boolean(true));

        let expr = Expr::binary(
            Operator::NeqRegex,
            Expr::var("host"),
            Expr::regex(Regex::new("a").unwrap()),
        );
        assert_eq!(reduce(&expr, Some(&valuer)), Expr::boolean(true));
    }

    #[test]
    fn test_paren_collapse() {
        let expr = Expr::paren(Expr::binary(
            Operator::Eq,
            Expr::string("a"),
            Expr::string("a"),
        ));
        assert_eq!(reduce(&expr, None), Expr::boolean(true));

        // Non-literal contents keep their parentheses.
        let expr = Expr::paren(Expr::var("host"));
        assert_eq!(reduce(&expr, None), expr);
    }
}
