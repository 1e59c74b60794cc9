//! In-memory [`QuerySource`] over a snapshot of records.
//!
//! Shaping calls are kept as an operation log and replayed in order on fetch,
//! so tests can assert both the produced rows and the exact sequence of
//! directives an evaluator issued.

use std::cmp::Ordering;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::ast::{Expr, Value};
use crate::error::{FieldError, StorageError};
use crate::model::{SortDir, TrackingMode};
use crate::record::{Record, matches, sort_order};
use crate::source::QuerySource;

/// One recorded shaping directive.
#[derive(Clone, Debug, PartialEq)]
pub enum QueryOp {
    IgnoreQueryFilters,
    Filter(Expr),
    Include(String),
    GroupBy(String),
    OrderBy(String, SortDir),
    ThenBy(String, SortDir),
    Skip(u64),
    Take(u64),
    Tracking(TrackingMode),
    SplitQuery,
}

#[derive(Clone, Debug)]
pub struct MemorySource<T> {
    rows: Arc<Vec<T>>,
    query_filters: Vec<Expr>,
    ops: Vec<QueryOp>,
}

impl<T> MemorySource<T>
where
    T: Record + Clone + Send + Sync,
{
    #[must_use]
    pub fn new(rows: impl IntoIterator<Item = T>) -> Self {
        Self::from_shared(Arc::new(rows.into_iter().collect()))
    }

    /// Query over a shared snapshot without copying it.
    #[must_use]
    pub fn from_shared(rows: Arc<Vec<T>>) -> Self {
        Self {
            rows,
            query_filters: Vec::new(),
            ops: Vec::new(),
        }
    }

    /// Default predicate applied to every query unless filters are ignored.
    #[must_use]
    pub fn with_query_filter(mut self, predicate: Expr) -> Self {
        self.query_filters.push(predicate);
        self
    }

    #[must_use]
    pub fn ops(&self) -> &[QueryOp] {
        &self.ops
    }

    #[must_use]
    pub fn ignores_query_filters(&self) -> bool {
        self.ops.contains(&QueryOp::IgnoreQueryFilters)
    }

    fn run(&self, cancel: &CancellationToken) -> Result<Vec<T>, StorageError> {
        if cancel.is_cancelled() {
            return Err(StorageError::Cancelled);
        }

        let mut rows: Vec<T> = self.rows.as_ref().clone();
        if !self.ignores_query_filters() {
            for predicate in &self.query_filters {
                rows = retain(rows, predicate)?;
            }
        }

        let mut sort_keys: Vec<(String, SortDir)> = Vec::new();
        for op in &self.ops {
            match op {
                QueryOp::Filter(predicate) => rows = retain(rows, predicate)?,
                QueryOp::GroupBy(key) => rows = cluster(rows, key)?,
                QueryOp::OrderBy(field, dir) => {
                    sort_keys = vec![(field.clone(), *dir)];
                    rows = sort(rows, &sort_keys)?;
                }
                QueryOp::ThenBy(field, dir) => {
                    sort_keys.push((field.clone(), *dir));
                    rows = sort(rows, &sort_keys)?;
                }
                QueryOp::Skip(n) => {
                    let n = usize::try_from(*n).unwrap_or(usize::MAX).min(rows.len());
                    rows.drain(..n);
                }
                QueryOp::Take(n) => rows.truncate(usize::try_from(*n).unwrap_or(usize::MAX)),
                QueryOp::IgnoreQueryFilters
                | QueryOp::Include(_)
                | QueryOp::Tracking(_)
                | QueryOp::SplitQuery => {}
            }
        }
        Ok(rows)
    }
}

fn retain<T: Record>(rows: Vec<T>, predicate: &Expr) -> Result<Vec<T>, FieldError> {
    let mut kept = Vec::with_capacity(rows.len());
    for row in rows {
        if matches(&row, predicate)? {
            kept.push(row);
        }
    }
    Ok(kept)
}

fn key_of<T: Record>(row: &T, field: &str) -> Result<Value, FieldError> {
    row.field(field)
        .ok_or_else(|| FieldError::Unknown(field.to_owned()))
}

/// Cluster rows sharing a key, groups in first-seen order.
fn cluster<T: Record>(rows: Vec<T>, key: &str) -> Result<Vec<T>, FieldError> {
    let mut groups: Vec<(Value, Vec<T>)> = Vec::new();
    for row in rows {
        let value = key_of(&row, key)?;
        match groups.iter_mut().find(|(k, _)| *k == value) {
            Some((_, members)) => members.push(row),
            None => groups.push((value, vec![row])),
        }
    }
    Ok(groups.into_iter().flat_map(|(_, members)| members).collect())
}

fn sort<T: Record>(rows: Vec<T>, keys: &[(String, SortDir)]) -> Result<Vec<T>, FieldError> {
    let mut decorated = rows
        .into_iter()
        .map(|row| {
            let values = keys
                .iter()
                .map(|(field, _)| key_of(&row, field))
                .collect::<Result<Vec<_>, _>>()?;
            Ok((values, row))
        })
        .collect::<Result<Vec<_>, FieldError>>()?;

    // stable
    decorated.sort_by(|(a, _), (b, _)| {
        for ((x, y), (_, dir)) in a.iter().zip(b).zip(keys) {
            let ord = match dir {
                SortDir::Asc => sort_order(x, y),
                SortDir::Desc => sort_order(y, x),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
    Ok(decorated.into_iter().map(|(_, row)| row).collect())
}

#[async_trait]
impl<T> QuerySource<T> for MemorySource<T>
where
    T: Record + Clone + Send + Sync,
{
    fn ignore_query_filters(&mut self) {
        self.ops.push(QueryOp::IgnoreQueryFilters);
    }

    fn filter(&mut self, predicate: Expr) {
        self.ops.push(QueryOp::Filter(predicate));
    }

    fn include(&mut self, path: &str) {
        self.ops.push(QueryOp::Include(path.to_owned()));
    }

    fn group_by(&mut self, key: &str) {
        self.ops.push(QueryOp::GroupBy(key.to_owned()));
    }

    fn order_by(&mut self, field: &str, dir: SortDir) {
        self.ops.push(QueryOp::OrderBy(field.to_owned(), dir));
    }

    fn then_by(&mut self, field: &str, dir: SortDir) {
        self.ops.push(QueryOp::ThenBy(field.to_owned(), dir));
    }

    fn skip(&mut self, count: u64) {
        self.ops.push(QueryOp::Skip(count));
    }

    fn take(&mut self, count: u64) {
        self.ops.push(QueryOp::Take(count));
    }

    fn tracking(&mut self, mode: TrackingMode) {
        self.ops.push(QueryOp::Tracking(mode));
    }

    fn split_query(&mut self) {
        self.ops.push(QueryOp::SplitQuery);
    }

    async fn fetch(&self, cancel: &CancellationToken) -> Result<Vec<T>, StorageError> {
        self.run(cancel)
    }

    async fn count(&self, cancel: &CancellationToken) -> Result<u64, StorageError> {
        let len = self.run(cancel)?.len();
        Ok(u64::try_from(len).unwrap_or(u64::MAX))
    }

    async fn any(&self, cancel: &CancellationToken) -> Result<bool, StorageError> {
        Ok(!self.run(cancel)?.is_empty())
    }
}
