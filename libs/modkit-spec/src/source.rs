//! Queryable handle exposed by a storage driver.
//!
//! Shaping is synchronous and only records intent; nothing touches storage
//! until one of the async execution methods runs.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::ast::Expr;
use crate::error::StorageError;
use crate::model::{SortDir, TrackingMode};

#[async_trait]
pub trait QuerySource<T>: Send + Sync {
    /// Disable default (global) query filters of the storage layer.
    fn ignore_query_filters(&mut self);

    fn filter(&mut self, predicate: Expr);

    /// Eager-load a dotted navigation path.
    fn include(&mut self, path: &str);

    fn group_by(&mut self, key: &str);

    /// Start a new sort, replacing any earlier one.
    fn order_by(&mut self, field: &str, dir: SortDir);

    /// Add a tie-break key to the current sort.
    fn then_by(&mut self, field: &str, dir: SortDir);

    fn skip(&mut self, count: u64);

    fn take(&mut self, count: u64);

    fn tracking(&mut self, mode: TrackingMode);

    fn split_query(&mut self);

    /// Materialize the shaped query.
    ///
    /// # Errors
    /// `StorageError::Cancelled` when the token fires, otherwise driver failures.
    async fn fetch(&self, cancel: &CancellationToken) -> Result<Vec<T>, StorageError>;

    /// # Errors
    /// See [`QuerySource::fetch`].
    async fn count(&self, cancel: &CancellationToken) -> Result<u64, StorageError>;

    /// # Errors
    /// See [`QuerySource::fetch`].
    async fn any(&self, cancel: &CancellationToken) -> Result<bool, StorageError>;
}

#[async_trait]
impl<T, S> QuerySource<T> for Box<S>
where
    S: QuerySource<T> + ?Sized,
{
    fn ignore_query_filters(&mut self) {
        (**self).ignore_query_filters();
    }

    fn filter(&mut self, predicate: Expr) {
        (**self).filter(predicate);
    }

    fn include(&mut self, path: &str) {
        (**self).include(path);
    }

    fn group_by(&mut self, key: &str) {
        (**self).group_by(key);
    }

    fn order_by(&mut self, field: &str, dir: SortDir) {
        (**self).order_by(field, dir);
    }

    fn then_by(&mut self, field: &str, dir: SortDir) {
        (**self).then_by(field, dir);
    }

    fn skip(&mut self, count: u64) {
        (**self).skip(count);
    }

    fn take(&mut self, count: u64) {
        (**self).take(count);
    }

    fn tracking(&mut self, mode: TrackingMode) {
        (**self).tracking(mode);
    }

    fn split_query(&mut self) {
        (**self).split_query();
    }

    async fn fetch(&self, cancel: &CancellationToken) -> Result<Vec<T>, StorageError> {
        (**self).fetch(cancel).await
    }

    async fn count(&self, cancel: &CancellationToken) -> Result<u64, StorageError> {
        (**self).count(cancel).await
    }

    async fn any(&self, cancel: &CancellationToken) -> Result<bool, StorageError> {
        (**self).any(cancel).await
    }
}
