//! In-memory storage driver: entity stores over a locked `Vec` and a session
//! that stages writes made inside a transaction.
//!
//! A [`MemoryEntityStore`] used directly writes through immediately. Bound to
//! a unit of work with [`MemoryEntityStore::bind`], its writes go to a working
//! copy held by the [`MemorySession`] while a transaction is active: commit
//! publishes the copy, rollback drops it. The last commit wins.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use modkit_spec::record::matches;
use modkit_spec::{
    DeleteCommand, Expr, IntoValue, MemorySource, QuerySource, StorageError, UpdateCommand,
};
use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use crate::entity::Entity;
use crate::error::RepoError;
use crate::factory::RepositoryContext;
use crate::repository::EntityStore;
use crate::session::{DataSession, SessionTransaction};

fn check_cancelled(cancel: &CancellationToken) -> Result<(), StorageError> {
    if cancel.is_cancelled() {
        Err(StorageError::Cancelled)
    } else {
        Ok(())
    }
}

fn to_u64(n: usize) -> u64 {
    u64::try_from(n).unwrap_or(u64::MAX)
}

/// Entity store over a `Vec`, with optional default query filters.
///
/// Clones share the same rows.
pub struct MemoryEntityStore<E> {
    rows: Arc<RwLock<Vec<E>>>,
    query_filters: Vec<Expr>,
}

impl<E> Clone for MemoryEntityStore<E> {
    fn clone(&self) -> Self {
        Self {
            rows: Arc::clone(&self.rows),
            query_filters: self.query_filters.clone(),
        }
    }
}

impl<E: Entity> MemoryEntityStore<E> {
    #[must_use]
    pub fn new(rows: impl IntoIterator<Item = E>) -> Self {
        Self {
            rows: Arc::new(RwLock::new(rows.into_iter().collect())),
            query_filters: Vec::new(),
        }
    }

    /// Default predicate applied to queries and bulk commands unless they
    /// ignore query filters.
    #[must_use]
    pub fn with_query_filter(mut self, predicate: Expr) -> Self {
        self.query_filters.push(predicate);
        self
    }

    /// Copy of every committed row, filters not applied.
    #[must_use]
    pub fn snapshot(&self) -> Vec<E> {
        self.rows.read().clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }

    /// Store view that joins the unit of work's session, for use in
    /// [`crate::RepositoryFactories::with_store`].
    ///
    /// # Errors
    /// `RepoError::UnsupportedRepository` when the session is not a
    /// [`MemorySession`].
    pub fn bind(&self, ctx: &RepositoryContext) -> Result<Arc<dyn EntityStore<E>>, RepoError> {
        let session = ctx
            .session
            .as_any()
            .downcast_ref::<MemorySession>()
            .ok_or_else(|| {
                RepoError::UnsupportedRepository(format!(
                    "{} needs a MemorySession",
                    ctx.info.implementation()
                ))
            })?;
        Ok(Arc::new(SessionStore {
            table: self.clone(),
            session: session.clone(),
        }))
    }

    fn key(&self) -> usize {
        Arc::as_ptr(&self.rows).addr()
    }

    fn query_over(&self, rows: Vec<E>) -> Box<dyn QuerySource<E>> {
        let source = self
            .query_filters
            .iter()
            .cloned()
            .fold(MemorySource::new(rows), MemorySource::with_query_filter);
        Box::new(source)
    }

    fn targets(
        &self,
        row: &E,
        ignore_filters: bool,
        predicate: Option<&Expr>,
    ) -> Result<bool, StorageError> {
        if !ignore_filters {
            for filter in &self.query_filters {
                if !matches(row, filter)? {
                    return Ok(false);
                }
            }
        }
        predicate.map_or(Ok(true), |p| matches(row, p).map_err(StorageError::from))
    }

    fn insert_into(rows: &mut Vec<E>, entity: E) -> Result<E, StorageError> {
        let id = entity.id();
        if rows.iter().any(|row| row.id() == id) {
            return Err(StorageError::message(format!(
                "duplicate key {}: {}",
                E::ID_FIELD,
                id.into_value().literal()
            )));
        }
        rows.push(entity.clone());
        Ok(entity)
    }

    fn update_in(rows: &mut [E], entity: E) -> bool {
        let id = entity.id();
        let Some(row) = rows.iter_mut().find(|row| row.id() == id) else {
            return false;
        };
        *row = entity;
        true
    }

    fn delete_from(rows: &mut Vec<E>, id: &E::Id) -> bool {
        let before = rows.len();
        rows.retain(|row| row.id() != *id);
        rows.len() != before
    }

    fn update_where(&self, rows: &mut [E], command: &UpdateCommand) -> Result<u64, StorageError> {
        // all-or-nothing: build every updated row before writing any back
        let mut updated = Vec::new();
        for (idx, row) in rows.iter().enumerate() {
            if !self.targets(row, command.ignore_query_filters, command.predicate.as_ref())? {
                continue;
            }
            let mut next = row.clone();
            for assignment in &command.assignments {
                next.set_field(&assignment.field, assignment.value.clone())?;
            }
            updated.push((idx, next));
        }

        let affected = to_u64(updated.len());
        for (idx, next) in updated {
            rows[idx] = next;
        }
        Ok(affected)
    }

    fn delete_where(
        &self,
        rows: &mut Vec<E>,
        command: &DeleteCommand,
    ) -> Result<u64, StorageError> {
        let predicate = command.predicate.as_ref();
        let mut keep = Vec::with_capacity(rows.len());
        for row in rows.iter() {
            keep.push(!self.targets(row, command.ignore_query_filters, predicate)?);
        }
        let before = rows.len();
        let mut flags = keep.into_iter();
        rows.retain(|_| flags.next().unwrap_or(true));
        Ok(to_u64(before - rows.len()))
    }
}

impl<E> fmt::Debug for MemoryEntityStore<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryEntityStore")
            .field("rows", &self.rows.read().len())
            .field("query_filters", &self.query_filters)
            .finish()
    }
}

#[async_trait]
impl<E: Entity> EntityStore<E> for MemoryEntityStore<E> {
    fn query(&self) -> Box<dyn QuerySource<E>> {
        self.query_over(self.snapshot())
    }

    async fn insert(&self, entity: E, cancel: &CancellationToken) -> Result<E, StorageError> {
        check_cancelled(cancel)?;
        Self::insert_into(&mut self.rows.write(), entity)
    }

    async fn update(&self, entity: E, cancel: &CancellationToken) -> Result<bool, StorageError> {
        check_cancelled(cancel)?;
        Ok(Self::update_in(&mut self.rows.write(), entity))
    }

    async fn delete(&self, id: &E::Id, cancel: &CancellationToken) -> Result<bool, StorageError> {
        check_cancelled(cancel)?;
        Ok(Self::delete_from(&mut self.rows.write(), id))
    }

    async fn execute_update(
        &self,
        command: &UpdateCommand,
        cancel: &CancellationToken,
    ) -> Result<u64, StorageError> {
        check_cancelled(cancel)?;
        self.update_where(&mut self.rows.write(), command)
    }

    async fn execute_delete(
        &self,
        command: &DeleteCommand,
        cancel: &CancellationToken,
    ) -> Result<u64, StorageError> {
        check_cancelled(cancel)?;
        self.delete_where(&mut self.rows.write(), command)
    }
}

/// Working copy of one store, published on commit.
trait StagedTable: Send {
    fn publish(self: Box<Self>);

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

struct StagedRows<E> {
    target: Arc<RwLock<Vec<E>>>,
    rows: Vec<E>,
}

impl<E: Entity> StagedTable for StagedRows<E> {
    fn publish(self: Box<Self>) {
        *self.target.write() = self.rows;
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// `None` outside a transaction. Keyed by store identity.
type Staging = Option<HashMap<usize, Box<dyn StagedTable>>>;

/// [`MemoryEntityStore`] bound to one session.
struct SessionStore<E> {
    table: MemoryEntityStore<E>,
    session: MemorySession,
}

impl<E: Entity> SessionStore<E> {
    fn read_rows(&self) -> Vec<E> {
        let mut staging = self.session.state.staging.lock();
        staging
            .as_mut()
            .and_then(|tables| tables.get_mut(&self.table.key()))
            .and_then(|staged| staged.as_any_mut().downcast_mut::<StagedRows<E>>())
            .map_or_else(|| self.table.snapshot(), |staged| staged.rows.clone())
    }

    fn write_rows<R>(
        &self,
        op: impl FnOnce(&mut Vec<E>) -> Result<R, StorageError>,
    ) -> Result<R, StorageError> {
        let mut staging = self.session.state.staging.lock();
        let Some(tables) = staging.as_mut() else {
            return op(&mut *self.table.rows.write());
        };
        let staged = tables.entry(self.table.key()).or_insert_with(|| -> Box<dyn StagedTable> {
            Box::new(StagedRows {
                target: Arc::clone(&self.table.rows),
                rows: self.table.snapshot(),
            })
        });
        let staged = staged
            .as_any_mut()
            .downcast_mut::<StagedRows<E>>()
            .ok_or_else(|| StorageError::message("staged rows belong to another entity type"))?;
        op(&mut staged.rows)
    }
}

#[async_trait]
impl<E: Entity> EntityStore<E> for SessionStore<E> {
    fn query(&self) -> Box<dyn QuerySource<E>> {
        self.table.query_over(self.read_rows())
    }

    async fn insert(&self, entity: E, cancel: &CancellationToken) -> Result<E, StorageError> {
        check_cancelled(cancel)?;
        self.write_rows(|rows| MemoryEntityStore::<E>::insert_into(rows, entity))
    }

    async fn update(&self, entity: E, cancel: &CancellationToken) -> Result<bool, StorageError> {
        check_cancelled(cancel)?;
        self.write_rows(|rows| Ok(MemoryEntityStore::<E>::update_in(rows, entity)))
    }

    async fn delete(&self, id: &E::Id, cancel: &CancellationToken) -> Result<bool, StorageError> {
        check_cancelled(cancel)?;
        self.write_rows(|rows| Ok(MemoryEntityStore::<E>::delete_from(rows, id)))
    }

    async fn execute_update(
        &self,
        command: &UpdateCommand,
        cancel: &CancellationToken,
    ) -> Result<u64, StorageError> {
        check_cancelled(cancel)?;
        self.write_rows(|rows| self.table.update_where(rows, command))
    }

    async fn execute_delete(
        &self,
        command: &DeleteCommand,
        cancel: &CancellationToken,
    ) -> Result<u64, StorageError> {
        check_cancelled(cancel)?;
        self.write_rows(|rows| self.table.delete_where(rows, command))
    }
}

#[derive(Default)]
struct SessionState {
    begun: AtomicU64,
    committed: AtomicU64,
    rolled_back: AtomicU64,
    saved: AtomicU64,
    fail_next_commit: AtomicBool,
    staging: Mutex<Staging>,
}

impl fmt::Debug for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionState")
            .field("begun", &self.begun)
            .field("committed", &self.committed)
            .field("rolled_back", &self.rolled_back)
            .field("saved", &self.saved)
            .finish_non_exhaustive()
    }
}

/// Session that stages transactional writes of bound stores and records
/// transaction and save calls.
#[derive(Clone, Debug, Default)]
pub struct MemorySession {
    state: Arc<SessionState>,
}

impl MemorySession {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn transactions_begun(&self) -> u64 {
        self.state.begun.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn commits(&self) -> u64 {
        self.state.committed.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn rollbacks(&self) -> u64 {
        self.state.rolled_back.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn saves(&self) -> u64 {
        self.state.saved.load(Ordering::SeqCst)
    }

    /// Make the next commit fail once.
    pub fn fail_next_commit(&self) {
        self.state.fail_next_commit.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn in_transaction(&self) -> bool {
        self.state.staging.lock().is_some()
    }
}

#[async_trait]
impl DataSession for MemorySession {
    async fn begin_transaction(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Arc<dyn SessionTransaction>, StorageError> {
        check_cancelled(cancel)?;
        {
            let mut staging = self.state.staging.lock();
            if staging.is_some() {
                return Err(StorageError::message("transaction already active"));
            }
            *staging = Some(HashMap::new());
        }
        self.state.begun.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MemoryTransaction {
            state: Arc::clone(&self.state),
        }))
    }

    async fn save_changes(&self, cancel: &CancellationToken) -> Result<u64, StorageError> {
        check_cancelled(cancel)?;
        self.state.saved.fetch_add(1, Ordering::SeqCst);
        Ok(0)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug)]
struct MemoryTransaction {
    state: Arc<SessionState>,
}

#[async_trait]
impl SessionTransaction for MemoryTransaction {
    async fn commit(&self, cancel: &CancellationToken) -> Result<(), StorageError> {
        check_cancelled(cancel)?;
        if self.state.fail_next_commit.swap(false, Ordering::SeqCst) {
            return Err(StorageError::message("commit rejected"));
        }
        let staged = self.state.staging.lock().take();
        for table in staged.into_iter().flat_map(HashMap::into_values) {
            table.publish();
        }
        self.state.committed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(&self, cancel: &CancellationToken) -> Result<(), StorageError> {
        check_cancelled(cancel)?;
        self.state.staging.lock().take();
        self.state.rolled_back.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
