//! In-memory evaluation of filter expressions against entity values.

use std::cmp::Ordering;

use crate::ast::{CompareOperator, Expr, LIKE_FN, Value};
use crate::error::FieldError;

/// Field-level access to an entity, by field name.
///
/// Implemented by entities that are evaluated in memory ([`crate::MemorySource`])
/// or targeted by update intents.
pub trait Record {
    /// Current value of the named field, `None` if the entity has no such field.
    fn field(&self, name: &str) -> Option<Value>;

    /// Assign a field from an update intent.
    ///
    /// # Errors
    /// `FieldError::ReadOnly` unless the entity opts in.
    fn set_field(&mut self, name: &str, value: Value) -> Result<(), FieldError> {
        let _ = value;
        Err(FieldError::ReadOnly(name.to_owned()))
    }
}

/// Evaluate a boolean filter expression against a record.
///
/// Comparisons against `null` follow SQL-ish semantics: only `eq`/`ne` are
/// meaningful, every ordering comparison involving `null` is false.
///
/// # Errors
/// Unknown fields, non-boolean nodes in boolean position, or mismatched operand kinds.
pub fn matches<R: Record + ?Sized>(record: &R, expr: &Expr) -> Result<bool, FieldError> {
    match expr {
        Expr::And(a, b) => Ok(matches(record, a)? && matches(record, b)?),
        Expr::Or(a, b) => Ok(matches(record, a)? || matches(record, b)?),
        Expr::Not(x) => Ok(!matches(record, x)?),
        Expr::Compare(l, op, r) => {
            let lhs = operand(record, l)?;
            let rhs = operand(record, r)?;
            compare(&lhs, *op, &rhs)
        }
        Expr::In(l, list) => {
            let lhs = operand(record, l)?;
            for item in list {
                let rhs = operand(record, item)?;
                if compare(&lhs, CompareOperator::Eq, &rhs)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        Expr::Function(name, args) => call(record, name, args),
        Expr::Identifier(name) => match field(record, name)? {
            Value::Bool(b) => Ok(b),
            other => Err(FieldError::TypeMismatch {
                field: name.clone(),
                expected: "bool",
                got: other.kind(),
            }),
        },
        Expr::Value(Value::Bool(b)) => Ok(*b),
        Expr::Value(v) => Err(FieldError::NotBoolean(v.kind())),
    }
}

fn field<R: Record + ?Sized>(record: &R, name: &str) -> Result<Value, FieldError> {
    record
        .field(name)
        .ok_or_else(|| FieldError::Unknown(name.to_owned()))
}

fn operand<R: Record + ?Sized>(record: &R, expr: &Expr) -> Result<Value, FieldError> {
    match expr {
        Expr::Identifier(name) => field(record, name),
        Expr::Value(v) => Ok(v.clone()),
        other => Ok(Value::Bool(matches(record, other)?)),
    }
}

fn compare(lhs: &Value, op: CompareOperator, rhs: &Value) -> Result<bool, FieldError> {
    if matches!(lhs, Value::Null) || matches!(rhs, Value::Null) {
        let both = matches!(lhs, Value::Null) && matches!(rhs, Value::Null);
        return Ok(match op {
            CompareOperator::Eq => both,
            CompareOperator::Ne => !both,
            _ => false,
        });
    }
    let ord = compare_values(lhs, rhs).ok_or(FieldError::Incomparable {
        lhs: lhs.kind(),
        rhs: rhs.kind(),
    })?;
    Ok(match op {
        CompareOperator::Eq => ord == Ordering::Equal,
        CompareOperator::Ne => ord != Ordering::Equal,
        CompareOperator::Gt => ord == Ordering::Greater,
        CompareOperator::Ge => ord != Ordering::Less,
        CompareOperator::Lt => ord == Ordering::Less,
        CompareOperator::Le => ord != Ordering::Greater,
    })
}

fn call<R: Record + ?Sized>(record: &R, name: &str, args: &[Expr]) -> Result<bool, FieldError> {
    let [subject, arg] = args else {
        return Err(FieldError::UnsupportedFunction(name.to_owned()));
    };
    let (Value::String(text), Value::String(arg)) = (operand(record, subject)?, operand(record, arg)?)
    else {
        // non-string operands (including null) never match
        return Ok(false);
    };
    match name {
        "contains" => Ok(text.contains(arg.as_str())),
        "startswith" => Ok(text.starts_with(arg.as_str())),
        "endswith" => Ok(text.ends_with(arg.as_str())),
        LIKE_FN => Ok(like(&text, &arg)),
        _ => Err(FieldError::UnsupportedFunction(name.to_owned())),
    }
}

/// Order two values of the same kind. `None` if the kinds differ.
#[must_use]
pub fn compare_values(lhs: &Value, rhs: &Value) -> Option<Ordering> {
    match (lhs, rhs) {
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        (Value::Number(a), Value::Number(b)) => Some(a.cmp(b)),
        (Value::Uuid(a), Value::Uuid(b)) => Some(a.cmp(b)),
        (Value::DateTime(a), Value::DateTime(b)) => Some(a.cmp(b)),
        (Value::Date(a), Value::Date(b)) => Some(a.cmp(b)),
        (Value::Time(a), Value::Time(b)) => Some(a.cmp(b)),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

/// Total order used for sorting: nulls first, mismatched kinds by kind name.
#[must_use]
pub fn sort_order(lhs: &Value, rhs: &Value) -> Ordering {
    match (lhs, rhs) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Less,
        (_, Value::Null) => Ordering::Greater,
        _ => compare_values(lhs, rhs).unwrap_or_else(|| lhs.kind().cmp(rhs.kind())),
    }
}

/// Case-insensitive SQL `LIKE`: `%` matches any run, `_` matches one character.
#[must_use]
pub fn like(text: &str, pattern: &str) -> bool {
    let text: Vec<char> = text.to_lowercase().chars().collect();
    let pattern: Vec<char> = pattern.to_lowercase().chars().collect();

    // Iterative wildcard matching with single-point backtracking on `%`.
    let (mut t, mut p) = (0usize, 0usize);
    let mut star: Option<(usize, usize)> = None;
    while t < text.len() {
        match pattern.get(p) {
            Some('%') => {
                star = Some((p, t));
                p += 1;
            }
            Some('_') => {
                t += 1;
                p += 1;
            }
            Some(c) if *c == text[t] => {
                t += 1;
                p += 1;
            }
            _ => match star {
                Some((sp, st)) => {
                    p = sp + 1;
                    t = st + 1;
                    star = Some((sp, st + 1));
                }
                None => return false,
            },
        }
    }
    pattern[p..].iter().all(|c| *c == '%')
}
