//! Predicate expression AST
//!
//! Defines the expression tree the planner consumes: variable references,
//! literals, and binary operations combined with AND/OR. The index never
//! parses query text; expressions arrive pre-built from the query layer.
//!
//! # Example
//!
//! ```
//! use ridgeline::expr::{Expr, Operator};
//!
//! // host = 'a' AND region != 'west'
//! let expr = Expr::binary(
//!     Operator::And,
//!     Expr::binary(Operator::Eq, Expr::var("host"), Expr::string("a")),
//!     Expr::binary(Operator::Neq, Expr::var("region"), Expr::string("west")),
//! );
//! assert_eq!(expr.to_string(), "host = 'a' AND region != 'west'");
//! ```

mod reduce;

pub use reduce::{reduce, Value, Valuer};

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Binary operators over expressions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operator {
    /// Equal to
    Eq,
    /// Not equal to
    Neq,
    /// Less than
    Lt,
    /// Less than or equal to
    Lte,
    /// Greater than
    Gt,
    /// Greater than or equal to
    Gte,
    /// Matches regular expression
    EqRegex,
    /// Does not match regular expression
    NeqRegex,
    /// Logical conjunction
    And,
    /// Logical disjunction
    Or,
    /// Addition (field arithmetic in residual filters)
    Add,
    /// Subtraction
    Sub,
    /// Multiplication
    Mul,
    /// Division
    Div,
}

impl Operator {
    /// Parse from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "=" | "==" => Some(Self::Eq),
            "!=" | "<>" => Some(Self::Neq),
            "<" => Some(Self::Lt),
            "<=" => Some(Self::Lte),
            ">" => Some(Self::Gt),
            ">=" => Some(Self::Gte),
            "=~" => Some(Self::EqRegex),
            "!~" => Some(Self::NeqRegex),
            "AND" | "and" => Some(Self::And),
            "OR" | "or" => Some(Self::Or),
            "+" => Some(Self::Add),
            "-" => Some(Self::Sub),
            "*" => Some(Self::Mul),
            "/" => Some(Self::Div),
            _ => None,
        }
    }

    /// True for the regex match operators
    pub fn is_regex_op(&self) -> bool {
        matches!(self, Self::EqRegex | Self::NeqRegex)
    }

    /// True for the comparison operators the planner dispatches on
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            Self::Eq
                | Self::Neq
                | Self::Lt
                | Self::Lte
                | Self::Gt
                | Self::Gte
                | Self::EqRegex
                | Self::NeqRegex
        )
    }

    /// Compare two f64 values under this operator
    pub fn compare_f64(&self, a: f64, b: f64) -> Option<bool> {
        Some(match self {
            Self::Eq => (a - b).abs() < f64::EPSILON,
            Self::Neq => (a - b).abs() >= f64::EPSILON,
            Self::Gt => a > b,
            Self::Gte => a >= b,
            Self::Lt => a < b,
            Self::Lte => a <= b,
            _ => return None,
        })
    }

    /// Compare two strings under this operator (lexicographic ordering)
    pub fn compare_str(&self, a: &str, b: &str) -> Option<bool> {
        Some(match self {
            Self::Eq => a == b,
            Self::Neq => a != b,
            Self::Gt => a > b,
            Self::Gte => a >= b,
            Self::Lt => a < b,
            Self::Lte => a <= b,
            _ => return None,
        })
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Eq => write!(f, "="),
            Self::Neq => write!(f, "!="),
            Self::Lt => write!(f, "<"),
            Self::Lte => write!(f, "<="),
            Self::Gt => write!(f, ">"),
            Self::Gte => write!(f, ">="),
            Self::EqRegex => write!(f, "=~"),
            Self::NeqRegex => write!(f, "!~"),
            Self::And => write!(f, "AND"),
            Self::Or => write!(f, "OR"),
            Self::Add => write!(f, "+"),
            Self::Sub => write!(f, "-"),
            Self::Mul => write!(f, "*"),
            Self::Div => write!(f, "/"),
        }
    }
}

/// Declared type of a variable reference
///
/// The planner uses this to separate indexed tags from fields whose filters
/// must be re-evaluated against the point stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VarType {
    /// Not declared; resolved against the measurement's field names
    #[default]
    Unknown,
    /// An indexed tag
    Tag,
    /// A field of any type
    AnyField,
    /// A float field
    Float,
    /// An integer field
    Integer,
    /// A string field
    String,
    /// A boolean field
    Boolean,
}

/// A reference to a tag or field by name
#[derive(Debug, Clone, PartialEq)]
pub struct VarRef {
    /// Referenced name
    pub name: String,
    /// Declared type, if the caller resolved one
    pub var_type: VarType,
}

/// A binary operation over two sub-expressions
#[derive(Debug, Clone, PartialEq)]
pub struct BinaryExpr {
    /// The operator
    pub op: Operator,
    /// Left operand
    pub lhs: Box<Expr>,
    /// Right operand
    pub rhs: Box<Expr>,
}

/// A predicate expression tree
#[derive(Debug, Clone)]
pub enum Expr {
    /// Reference to a tag or field
    VarRef(VarRef),
    /// String literal
    StringLiteral(String),
    /// Numeric literal
    NumberLiteral(f64),
    /// Boolean literal
    BooleanLiteral(bool),
    /// Compiled regular expression literal
    RegexLiteral(Regex),
    /// The absent value, produced when reduction binds a name to nothing
    NullLiteral,
    /// Binary operation
    Binary(BinaryExpr),
    /// Parenthesized sub-expression
    Paren(Box<Expr>),
}

impl Expr {
    /// An untyped variable reference
    pub fn var(name: impl Into<String>) -> Self {
        Self::VarRef(VarRef {
            name: name.into(),
            var_type: VarType::Unknown,
        })
    }

    /// A variable reference with a declared type
    pub fn var_typed(name: impl Into<String>, var_type: VarType) -> Self {
        Self::VarRef(VarRef {
            name: name.into(),
            var_type,
        })
    }

    /// A string literal
    pub fn string(s: impl Into<String>) -> Self {
        Self::StringLiteral(s.into())
    }

    /// A numeric literal
    pub fn number(n: f64) -> Self {
        Self::NumberLiteral(n)
    }

    /// A boolean literal
    pub fn boolean(b: bool) -> Self {
        Self::BooleanLiteral(b)
    }

    /// A regular expression literal
    pub fn regex(re: Regex) -> Self {
        Self::RegexLiteral(re)
    }

    /// A binary operation
    pub fn binary(op: Operator, lhs: Expr, rhs: Expr) -> Self {
        Self::Binary(BinaryExpr {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        })
    }

    /// Conjunction of two expressions
    pub fn and(lhs: Expr, rhs: Expr) -> Self {
        Self::binary(Operator::And, lhs, rhs)
    }

    /// Disjunction of two expressions
    pub fn or(lhs: Expr, rhs: Expr) -> Self {
        Self::binary(Operator::Or, lhs, rhs)
    }

    /// A parenthesized sub-expression
    pub fn paren(inner: Expr) -> Self {
        Self::Paren(Box::new(inner))
    }

    /// True if this node is a literal value
    pub fn is_literal(&self) -> bool {
        matches!(
            self,
            Self::StringLiteral(_)
                | Self::NumberLiteral(_)
                | Self::BooleanLiteral(_)
                | Self::RegexLiteral(_)
                | Self::NullLiteral
        )
    }
}

impl PartialEq for Expr {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::VarRef(a), Self::VarRef(b)) => a == b,
            (Self::StringLiteral(a), Self::StringLiteral(b)) => a == b,
            (Self::NumberLiteral(a), Self::NumberLiteral(b)) => a == b,
            (Self::BooleanLiteral(a), Self::BooleanLiteral(b)) => a == b,
            (Self::RegexLiteral(a), Self::RegexLiteral(b)) => a.as_str() == b.as_str(),
            (Self::NullLiteral, Self::NullLiteral) => true,
            (Self::Binary(a), Self::Binary(b)) => a == b,
            (Self::Paren(a), Self::Paren(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::VarRef(v) => write!(f, "{}", v.name),
            Self::StringLiteral(s) => write!(f, "'{}'", s),
            Self::NumberLiteral(n) => write!(f, "{}", n),
            Self::BooleanLiteral(b) => write!(f, "{}", b),
            Self::RegexLiteral(re) => write!(f, "/{}/", re.as_str()),
            Self::NullLiteral => write!(f, "null"),
            Self::Binary(b) => write!(f, "{} {} {}", b.lhs, b.op, b.rhs),
            Self::Paren(inner) => write!(f, "({})", inner),
        }
    }
}

/// Visit every node of the expression tree in pre-order
pub fn walk<F: FnMut(&Expr)>(expr: &Expr, f: &mut F) {
    f(expr);
    match expr {
        Expr::Binary(b) => {
            walk(&b.lhs, f);
            walk(&b.rhs, f);
        }
        Expr::Paren(inner) => walk(inner, f),
        _ => {}
    }
}
