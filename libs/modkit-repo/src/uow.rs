//! Unit of work: one repository instance per entity type, one transaction.
//!
//! Per-entity cache states:
//!
//! - absent: the first request inserts an entry whose repository is built
//!   lazily, at most once, when the entry is first awaited
//! - read-only: a mutating request atomically swaps in a new mutating entry;
//!   the read-only instance is dropped, never upgraded in place
//! - mutating: serves every later request, read-only or mutating
//!
//! The swap happens under the map shard lock; construction runs outside it.
//! Dropping a resolution future mid-construction leaves the entry empty, so
//! the next caller constructs again.

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OnceCell};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::entity::{Entity, LongId};
use crate::error::RepoError;
use crate::factory::RepositoryContext;
use crate::manager::Shared;
use crate::repository::{ReadRepository, Repository};
use crate::session::{DataSession, SessionTransaction};
use crate::type_cache::{RepoAccess, RepoShape, RepositoryInfo, RepositoryInterface};

type AnyHandle = Arc<dyn Any + Send + Sync>;

struct RepositoryEntry {
    info: Arc<RepositoryInfo>,
    cell: OnceCell<AnyHandle>,
}

impl RepositoryEntry {
    fn new(info: Arc<RepositoryInfo>) -> Self {
        Self {
            info,
            cell: OnceCell::new(),
        }
    }
}

enum RepositoryHandle<E: Entity> {
    ReadOnly(Arc<dyn ReadRepository<E>>),
    Mutating(Arc<dyn Repository<E>>),
}

impl<E: Entity> Clone for RepositoryHandle<E> {
    fn clone(&self) -> Self {
        match self {
            RepositoryHandle::ReadOnly(r) => RepositoryHandle::ReadOnly(Arc::clone(r)),
            RepositoryHandle::Mutating(m) => RepositoryHandle::Mutating(Arc::clone(m)),
        }
    }
}

impl<E: Entity> RepositoryHandle<E> {
    fn into_read(self) -> Arc<dyn ReadRepository<E>> {
        match self {
            RepositoryHandle::ReadOnly(r) => r,
            RepositoryHandle::Mutating(m) => m,
        }
    }
}

pub struct UnitOfWork {
    id: Uuid,
    shared: Arc<Shared>,
    session: Arc<dyn DataSession>,
    entries: DashMap<TypeId, Arc<RepositoryEntry>>,
    /// Serializes begin, commit, rollback and close.
    tx_ops: AsyncMutex<()>,
    /// Only touched synchronously, so dispose can always empty it.
    tx: Mutex<Option<Arc<dyn SessionTransaction>>>,
    disposed: AtomicBool,
}

impl UnitOfWork {
    pub(crate) fn new(shared: Arc<Shared>, session: Arc<dyn DataSession>) -> Self {
        let id = Uuid::new_v4();
        debug!(uow_id = %id, "unit of work opened");
        Self {
            id,
            shared,
            session,
            entries: DashMap::new(),
            tx_ops: AsyncMutex::new(()),
            tx: Mutex::new(None),
            disposed: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    fn ensure_active(&self) -> Result<(), RepoError> {
        if self.is_disposed() {
            Err(RepoError::Disposed)
        } else {
            Ok(())
        }
    }

    /// Read-only repository for `E`.
    ///
    /// # Errors
    /// `Disposed`, `UnknownEntity`, `UnsupportedRepository` when no factory is
    /// registered, or the constructor's own error.
    pub async fn read_repository<E: Entity>(&self) -> Result<Arc<dyn ReadRepository<E>>, RepoError> {
        let handle = self
            .resolve::<E>(RepositoryInterface::generic::<E>(RepoAccess::ReadOnly))
            .await?;
        Ok(handle.into_read())
    }

    /// Mutating repository for `E`, upgrading a cached read-only one.
    ///
    /// # Errors
    /// See [`UnitOfWork::read_repository`].
    pub async fn repository<E: Entity>(&self) -> Result<Arc<dyn Repository<E>>, RepoError> {
        let interface = RepositoryInterface::generic::<E>(RepoAccess::Mutating);
        self.resolve_mutating::<E>(interface).await
    }

    /// Read-only repository through the long-id variant.
    ///
    /// # Errors
    /// `IncompatibleId` when `E` is not keyed by [`LongId`], otherwise see
    /// [`UnitOfWork::read_repository`].
    pub async fn long_read_repository<E: Entity>(
        &self,
    ) -> Result<Arc<dyn ReadRepository<E>>, RepoError> {
        let handle = self
            .resolve::<E>(RepositoryInterface::long_id::<E>(RepoAccess::ReadOnly))
            .await?;
        Ok(handle.into_read())
    }

    /// Mutating repository through the long-id variant.
    ///
    /// # Errors
    /// See [`UnitOfWork::long_read_repository`].
    pub async fn long_repository<E: Entity>(&self) -> Result<Arc<dyn Repository<E>>, RepoError> {
        let interface = RepositoryInterface::long_id::<E>(RepoAccess::Mutating);
        self.resolve_mutating::<E>(interface).await
    }

    /// Map a requested interface onto the variant the cache will hold.
    ///
    /// A generic-id request for a long-id entity resolves to the long-id variant.
    ///
    /// # Errors
    /// `Disposed`, `UnknownEntity` or `IncompatibleId`.
    pub fn resolve_info(
        &self,
        interface: &RepositoryInterface,
    ) -> Result<Arc<RepositoryInfo>, RepoError> {
        self.ensure_active()?;
        let entity = self
            .shared
            .cache
            .entity_info_by(interface.entity)
            .ok_or(RepoError::UnknownEntity(interface.entity.name()))?;

        let long_id = match interface.shape {
            RepoShape::LongId => {
                if !entity.has_long_id() {
                    return Err(RepoError::IncompatibleId {
                        entity: entity.entity_type().name(),
                        requested: std::any::type_name::<LongId>(),
                        actual: entity.id_type().name(),
                    });
                }
                true
            }
            RepoShape::Generic { id } => {
                if id != entity.id_type() {
                    return Err(RepoError::IncompatibleId {
                        entity: entity.entity_type().name(),
                        requested: id.name(),
                        actual: entity.id_type().name(),
                    });
                }
                entity.has_long_id()
            }
        };

        let info = entity
            .repository(interface.access, long_id)
            .ok_or_else(|| RepoError::UnsupportedRepository(interface.to_string()))?;
        if info.interface() != *interface {
            debug!(
                uow_id = %self.id,
                requested = %interface,
                resolved = %info.interface(),
                "substituting long-id repository"
            );
        }
        Ok(Arc::clone(info))
    }

    /// Variant currently cached for `E`, if any.
    #[must_use]
    pub fn cached_repository_info<E: Entity>(&self) -> Option<Arc<RepositoryInfo>> {
        self.entries
            .get(&TypeId::of::<E>())
            .map(|entry| Arc::clone(&entry.info))
    }

    /// Number of entity types with a cached entry.
    #[must_use]
    pub fn cached_len(&self) -> usize {
        self.entries.len()
    }

    async fn resolve_mutating<E: Entity>(
        &self,
        interface: RepositoryInterface,
    ) -> Result<Arc<dyn Repository<E>>, RepoError> {
        let RepositoryHandle::Mutating(repo) = self.resolve::<E>(interface).await? else {
            return Err(RepoError::UnsupportedRepository(interface.to_string()));
        };
        Ok(repo)
    }

    async fn resolve<E: Entity>(
        &self,
        requested: RepositoryInterface,
    ) -> Result<RepositoryHandle<E>, RepoError> {
        let info = self.resolve_info(&requested)?;

        let entry = {
            let mut slot = self
                .entries
                .entry(TypeId::of::<E>())
                .or_insert_with(|| Arc::new(RepositoryEntry::new(Arc::clone(&info))));
            if !slot.info.access().satisfies(requested.access) {
                debug!(
                    uow_id = %self.id,
                    entity = info.entity_type().name(),
                    "upgrading cached repository to mutating"
                );
                *slot = Arc::new(RepositoryEntry::new(Arc::clone(&info)));
            }
            Arc::clone(slot.value())
        };

        let handle = entry
            .cell
            .get_or_try_init(|| self.construct::<E>(&entry.info))
            .await?
            .downcast_ref::<RepositoryHandle<E>>()
            .cloned()
            .ok_or_else(|| RepoError::UnsupportedRepository(entry.info.interface().to_string()))?;

        if self.is_disposed() {
            self.entries.clear();
            return Err(RepoError::Disposed);
        }
        Ok(handle)
    }

    async fn construct<E: Entity>(
        &self,
        info: &Arc<RepositoryInfo>,
    ) -> Result<AnyHandle, RepoError> {
        let ctx = RepositoryContext {
            session: Arc::clone(&self.session),
            evaluator: self.shared.evaluator.clone(),
            clock: Arc::clone(&self.shared.clock),
            config: Arc::clone(&self.shared.config),
            info: Arc::clone(info),
        };
        let missing = || {
            RepoError::UnsupportedRepository(format!(
                "no {} factory registered for {}",
                info.access(),
                info.entity_type().name()
            ))
        };
        let handle: RepositoryHandle<E> = match info.access() {
            RepoAccess::ReadOnly => {
                let ctor = self.shared.factories.read_ctor::<E>().ok_or_else(missing)?;
                RepositoryHandle::ReadOnly(ctor(ctx).await?)
            }
            RepoAccess::Mutating => {
                let ctor = self.shared.factories.mutating_ctor::<E>().ok_or_else(missing)?;
                RepositoryHandle::Mutating(ctor(ctx).await?)
            }
        };
        debug!(
            uow_id = %self.id,
            repository = %info.interface(),
            implementation = info.implementation(),
            "constructed repository"
        );
        Ok(Arc::new(handle))
    }

    /// Start a transaction, or return the one already active.
    ///
    /// # Errors
    /// `Disposed`, or the session's failure. A transaction begun while the
    /// unit of work was being disposed is rolled back and not returned.
    pub async fn begin_transaction(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Arc<dyn SessionTransaction>, RepoError> {
        let _ops = self.tx_ops.lock().await;
        self.ensure_active()?;
        if let Some(active) = self.tx.lock().as_ref() {
            debug!(uow_id = %self.id, "transaction already active");
            return Ok(Arc::clone(active));
        }
        let started = self.session.begin_transaction(cancel).await?;
        if self.store_transaction(&started) {
            info!(uow_id = %self.id, "transaction started");
            return Ok(started);
        }
        warn!(uow_id = %self.id, "disposed while beginning a transaction");
        if let Err(e) = started.rollback(cancel).await {
            warn!(uow_id = %self.id, error = %e, "rollback of orphaned transaction failed");
        }
        Err(RepoError::Disposed)
    }

    /// Install `tx` unless the unit of work is disposed. The flag is read
    /// under the slot lock, which dispose takes after setting it.
    fn store_transaction(&self, tx: &Arc<dyn SessionTransaction>) -> bool {
        let mut slot = self.tx.lock();
        if self.is_disposed() {
            return false;
        }
        *slot = Some(Arc::clone(tx));
        true
    }

    /// Commit the active transaction. Without one, pending changes are saved
    /// directly through the session.
    ///
    /// # Errors
    /// `Disposed`, or the session's failure. A failed commit keeps the
    /// transaction so it can still be rolled back.
    pub async fn commit(&self, cancel: &CancellationToken) -> Result<(), RepoError> {
        let _ops = self.tx_ops.lock().await;
        self.ensure_active()?;
        let active = self.tx.lock().take();
        if let Some(active) = active {
            if let Err(e) = active.commit(cancel).await {
                self.store_transaction(&active);
                return Err(e.into());
            }
            info!(uow_id = %self.id, "transaction committed");
        } else {
            let saved = self.session.save_changes(cancel).await?;
            info!(uow_id = %self.id, saved, "changes saved without transaction");
        }
        Ok(())
    }

    /// Roll back the active transaction; a no-op without one.
    ///
    /// # Errors
    /// `Disposed`, or the session's failure.
    pub async fn rollback(&self, cancel: &CancellationToken) -> Result<(), RepoError> {
        let _ops = self.tx_ops.lock().await;
        self.ensure_active()?;
        let active = self.tx.lock().take();
        if let Some(active) = active {
            active.rollback(cancel).await?;
            info!(uow_id = %self.id, "transaction rolled back");
        } else {
            debug!(uow_id = %self.id, "rollback without active transaction");
        }
        Ok(())
    }

    /// Whether a transaction is active. Always `false` once disposed.
    #[must_use]
    pub fn has_transaction(&self) -> bool {
        let slot = self.tx.lock();
        !self.is_disposed() && slot.is_some()
    }

    /// Persist pending changes through the session.
    ///
    /// # Errors
    /// `Disposed`, or the session's failure.
    pub async fn save_changes(&self, cancel: &CancellationToken) -> Result<u64, RepoError> {
        self.ensure_active()?;
        Ok(self.session.save_changes(cancel).await?)
    }

    /// Roll back an active transaction, then dispose.
    ///
    /// # Errors
    /// The rollback failure; the unit of work is disposed either way.
    pub async fn close(&self, cancel: &CancellationToken) -> Result<(), RepoError> {
        if self.is_disposed() {
            return Ok(());
        }
        let _ops = self.tx_ops.lock().await;
        let active = self.tx.lock().take();
        let result = if let Some(active) = active {
            warn!(uow_id = %self.id, "rolling back active transaction on dispose");
            active.rollback(cancel).await.map_err(RepoError::from)
        } else {
            Ok(())
        };
        self.dispose();
        result
    }

    /// Release the repository cache and the transaction handle. Every later
    /// call fails with `RepoError::Disposed`.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.entries.clear();
        if self.tx.lock().take().is_some() {
            warn!(uow_id = %self.id, "disposed with an uncommitted transaction");
        }
        info!(uow_id = %self.id, "unit of work disposed");
    }
}

impl Drop for UnitOfWork {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for UnitOfWork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnitOfWork")
            .field("id", &self.id)
            .field("cached", &self.entries.len())
            .field("disposed", &self.is_disposed())
            .finish_non_exhaustive()
    }
}
