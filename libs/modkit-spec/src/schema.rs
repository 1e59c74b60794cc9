//! Typed field and navigation references.
//!
//! - `FieldRef<E, T>`: field of entity `E` holding values of Rust type `T`
//! - `NavRef<E, P>`: navigation from `E` to related type `P`, used by includes
//!
//! Both are `const`-constructible so entities can expose them as associated
//! constants:
//!
//! ```rust,ignore
//! impl User {
//!     pub const NAME: FieldRef<User, String> = FieldRef::new("name");
//!     pub const ORDERS: NavRef<User, Order> = NavRef::new("orders");
//! }
//!
//! let spec = Specification::<User>::new().filter(User::NAME.startswith("jo"));
//! ```

use std::fmt;
use std::marker::PhantomData;

use crate::ast::{CompareOperator, Expr, Value};

/// Type-safe field reference.
///
/// **NOTE:** equality is based solely on the field name. `E` and `T` are
/// phantom types used for compile-time checking of operations.
pub struct FieldRef<E, T> {
    name: &'static str,
    _phantom: PhantomData<fn() -> (E, T)>,
}

impl<E, T> FieldRef<E, T> {
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _phantom: PhantomData,
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    fn identifier(self) -> Expr {
        Expr::Identifier(self.name.to_owned())
    }

    fn compare<V: IntoValue>(self, op: CompareOperator, value: V) -> Expr {
        Expr::Compare(
            Box::new(self.identifier()),
            op,
            Box::new(Expr::Value(value.into_value())),
        )
    }
}

impl<E, T> Clone for FieldRef<E, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<E, T> Copy for FieldRef<E, T> {}

impl<E, T> fmt::Debug for FieldRef<E, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldRef").field("field", &self.name).finish()
    }
}

impl<E, T> PartialEq for FieldRef<E, T> {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl<E, T> Eq for FieldRef<E, T> {}

/// Comparison operations for any field type.
impl<E, T> FieldRef<E, T> {
    /// `field eq value`
    #[must_use]
    pub fn eq<V: IntoValue>(self, value: V) -> Expr {
        self.compare(CompareOperator::Eq, value)
    }

    /// `field ne value`
    #[must_use]
    pub fn ne<V: IntoValue>(self, value: V) -> Expr {
        self.compare(CompareOperator::Ne, value)
    }

    /// `field gt value`
    #[must_use]
    pub fn gt<V: IntoValue>(self, value: V) -> Expr {
        self.compare(CompareOperator::Gt, value)
    }

    /// `field ge value`
    #[must_use]
    pub fn ge<V: IntoValue>(self, value: V) -> Expr {
        self.compare(CompareOperator::Ge, value)
    }

    /// `field lt value`
    #[must_use]
    pub fn lt<V: IntoValue>(self, value: V) -> Expr {
        self.compare(CompareOperator::Lt, value)
    }

    /// `field le value`
    #[must_use]
    pub fn le<V: IntoValue>(self, value: V) -> Expr {
        self.compare(CompareOperator::Le, value)
    }

    /// `field eq null`
    #[must_use]
    pub fn is_null(self) -> Expr {
        self.compare(CompareOperator::Eq, Value::Null)
    }

    /// `field ne null`
    #[must_use]
    pub fn is_not_null(self) -> Expr {
        self.compare(CompareOperator::Ne, Value::Null)
    }

    /// `field in (v1, v2, ...)`
    #[must_use]
    pub fn in_list<I, V>(self, values: I) -> Expr
    where
        I: IntoIterator<Item = V>,
        V: IntoValue,
    {
        Expr::In(
            Box::new(self.identifier()),
            values
                .into_iter()
                .map(|v| Expr::Value(v.into_value()))
                .collect(),
        )
    }
}

/// String operations, available only on `String` fields.
impl<E> FieldRef<E, String> {
    #[must_use]
    pub fn contains(self, needle: &str) -> Expr {
        self.string_fn("contains", needle)
    }

    #[must_use]
    pub fn startswith(self, prefix: &str) -> Expr {
        self.string_fn("startswith", prefix)
    }

    #[must_use]
    pub fn endswith(self, suffix: &str) -> Expr {
        self.string_fn("endswith", suffix)
    }

    fn string_fn(self, name: &str, arg: &str) -> Expr {
        Expr::Function(
            name.to_owned(),
            vec![
                self.identifier(),
                Expr::Value(Value::String(arg.to_owned())),
            ],
        )
    }
}

/// Typed navigation from `E` to a related type `P`.
pub struct NavRef<E, P> {
    name: &'static str,
    _phantom: PhantomData<fn() -> (E, P)>,
}

impl<E, P> NavRef<E, P> {
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _phantom: PhantomData,
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Fully-qualified name of the type the navigation starts from.
    #[must_use]
    pub fn root_type(&self) -> &'static str {
        std::any::type_name::<E>()
    }

    /// Fully-qualified name of the navigated-to type.
    #[must_use]
    pub fn target_type(&self) -> &'static str {
        std::any::type_name::<P>()
    }
}

impl<E, P> Clone for NavRef<E, P> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<E, P> Copy for NavRef<E, P> {}

impl<E, P> fmt::Debug for NavRef<E, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NavRef")
            .field("navigation", &self.name)
            .field("target", &self.target_type())
            .finish()
    }
}

/// Conversion of Rust values into AST values.
pub trait IntoValue {
    fn into_value(self) -> Value;
}

impl IntoValue for Value {
    fn into_value(self) -> Value {
        self
    }
}

impl IntoValue for bool {
    fn into_value(self) -> Value {
        Value::Bool(self)
    }
}

impl IntoValue for uuid::Uuid {
    fn into_value(self) -> Value {
        Value::Uuid(self)
    }
}

impl IntoValue for String {
    fn into_value(self) -> Value {
        Value::String(self)
    }
}

impl IntoValue for &str {
    fn into_value(self) -> Value {
        Value::String(self.to_owned())
    }
}

impl IntoValue for i32 {
    fn into_value(self) -> Value {
        Value::Number(self.into())
    }
}

impl IntoValue for i64 {
    fn into_value(self) -> Value {
        Value::Number(self.into())
    }
}

impl IntoValue for u32 {
    fn into_value(self) -> Value {
        Value::Number(self.into())
    }
}

impl IntoValue for u64 {
    fn into_value(self) -> Value {
        Value::Number(self.into())
    }
}

impl IntoValue for bigdecimal::BigDecimal {
    fn into_value(self) -> Value {
        Value::Number(self)
    }
}

impl IntoValue for chrono::DateTime<chrono::Utc> {
    fn into_value(self) -> Value {
        Value::DateTime(self)
    }
}

impl IntoValue for chrono::NaiveDate {
    fn into_value(self) -> Value {
        Value::Date(self)
    }
}

impl IntoValue for chrono::NaiveTime {
    fn into_value(self) -> Value {
        Value::Time(self)
    }
}

impl<V: IntoValue> IntoValue for Option<V> {
    fn into_value(self) -> Value {
        self.map_or(Value::Null, IntoValue::into_value)
    }
}
