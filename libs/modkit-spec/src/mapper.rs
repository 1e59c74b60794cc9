//! Object mapping used when a projected specification has no selector.

use std::fmt;

/// Maps source entities onto a result type.
pub trait ObjectMapper<T, R>: Send + Sync {
    fn map(&self, source: &T) -> R;

    /// Map a materialized result set. `members_to_expand` carries the
    /// projection's expansion hints, in declaration order.
    fn project(&self, rows: &[T], members_to_expand: &[String]) -> Vec<R> {
        let _ = members_to_expand;
        rows.iter().map(|row| self.map(row)).collect()
    }
}

/// Mapper backed by a closure.
pub struct FnMapper<F>(F);

impl<F> FnMapper<F> {
    #[must_use]
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> fmt::Debug for FnMapper<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnMapper")
    }
}

impl<T, R, F> ObjectMapper<T, R> for FnMapper<F>
where
    F: Fn(&T) -> R + Send + Sync,
{
    fn map(&self, source: &T) -> R {
        (self.0)(source)
    }
}

/// Mapper for result types convertible from a cloned entity.
#[derive(Clone, Copy, Debug, Default)]
pub struct FromMapper;

impl<T, R> ObjectMapper<T, R> for FromMapper
where
    T: Clone,
    R: From<T>,
{
    fn map(&self, source: &T) -> R {
        R::from(source.clone())
    }
}
