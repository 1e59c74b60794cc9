//! Filter expression AST shared by specifications and query sources.
//!
//! Predicates are data, not closures: a storage driver can translate them into
//! its own query language while [`crate::MemorySource`] evaluates them directly.

use std::fmt;

use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use uuid::Uuid;

/// Function name used for LIKE-style search conditions.
pub const LIKE_FN: &str = "like";

#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    Compare(Box<Expr>, CompareOperator, Box<Expr>),
    In(Box<Expr>, Vec<Expr>),
    Function(String, Vec<Expr>),
    Identifier(String),
    Value(Value),
}

impl Expr {
    /// Combine two expressions with AND: `expr1 and expr2`
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// let filter = AGE.gt(18).and(NAME.contains("john"));
    /// ```
    #[must_use]
    pub fn and(self, other: Expr) -> Expr {
        Expr::And(Box::new(self), Box::new(other))
    }

    /// Combine two expressions with OR: `expr1 or expr2`
    #[must_use]
    pub fn or(self, other: Expr) -> Expr {
        Expr::Or(Box::new(self), Box::new(other))
    }

    /// Negate an expression: `not expr`
    #[must_use]
    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Expr {
        !self
    }

    /// LIKE-style match of `field` against `pattern` (`%` and `_` wildcards).
    #[must_use]
    pub fn like(field: impl Into<String>, pattern: impl Into<String>) -> Expr {
        Expr::Function(
            LIKE_FN.to_owned(),
            vec![
                Expr::Identifier(field.into()),
                Expr::Value(Value::String(pattern.into())),
            ],
        )
    }

    /// Fold expressions with AND, preserving order. `None` for an empty input.
    #[must_use]
    pub fn all<I>(exprs: I) -> Option<Expr>
    where
        I: IntoIterator<Item = Expr>,
    {
        exprs.into_iter().reduce(Expr::and)
    }

    /// Fold expressions with OR, preserving order. `None` for an empty input.
    #[must_use]
    pub fn any<I>(exprs: I) -> Option<Expr>
    where
        I: IntoIterator<Item = Expr>,
    {
        exprs.into_iter().reduce(Expr::or)
    }
}

impl std::ops::Not for Expr {
    type Output = Expr;

    fn not(self) -> Self::Output {
        Expr::Not(Box::new(self))
    }
}

/// Canonical textual form, used for cache keys and diagnostics.
impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::And(a, b) => write!(f, "({a} and {b})"),
            Expr::Or(a, b) => write!(f, "({a} or {b})"),
            Expr::Not(x) => write!(f, "(not {x})"),
            Expr::Compare(l, op, r) => write!(f, "({l} {op} {r})"),
            Expr::In(l, list) => {
                write!(f, "({l} in (")?;
                for (i, item) in list.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("))")
            }
            Expr::Function(name, args) => {
                write!(f, "{name}(")?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{arg}")?;
                }
                f.write_str(")")
            }
            Expr::Identifier(name) => f.write_str(name),
            Expr::Value(v) => write!(f, "{}", v.literal()),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompareOperator {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl fmt::Display for CompareOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CompareOperator::Eq => "eq",
            CompareOperator::Ne => "ne",
            CompareOperator::Gt => "gt",
            CompareOperator::Ge => "ge",
            CompareOperator::Lt => "lt",
            CompareOperator::Le => "le",
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Number(BigDecimal),
    Uuid(Uuid),
    DateTime(DateTime<Utc>),
    Date(NaiveDate),
    Time(NaiveTime),
    String(String),
}

impl Value {
    /// Name of the value's kind, used in type-mismatch errors.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::Uuid(_) => "uuid",
            Value::DateTime(_) => "datetime",
            Value::Date(_) => "date",
            Value::Time(_) => "time",
            Value::String(_) => "string",
        }
    }

    /// Literal rendering with the concrete value included.
    #[must_use]
    pub fn literal(&self) -> String {
        match self {
            Value::Null => "null".to_owned(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => n.normalized().to_string(),
            Value::Uuid(u) => u.to_string(),
            Value::DateTime(dt) => dt.to_rfc3339(),
            Value::Date(d) => d.to_string(),
            Value::Time(t) => t.to_string(),
            Value::String(s) => format!("'{}'", s.replace('\'', "''")),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind())
    }
}
