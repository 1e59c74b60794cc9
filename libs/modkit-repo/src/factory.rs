//! Repository constructors keyed by entity type and access level.
//!
//! Key = (entity `TypeId`, access). Value = an `Arc<dyn Fn>` constructor
//! stored as `Box<dyn Any + Send + Sync>` and downcast on read. Re-registering
//! replaces the previous constructor; instances already built are unaffected.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::{self, BoxFuture};
use modkit_spec::SpecificationEvaluator;
use parking_lot::RwLock;

use crate::clock::TimeSource;
use crate::config::RepositoryConfig;
use crate::entity::Entity;
use crate::error::RepoError;
use crate::repository::{
    EntityStore, ReadRepository, Repository, SpecReadRepository, SpecRepository,
};
use crate::session::DataSession;
use crate::type_cache::{RepoAccess, RepositoryInfo};

/// Everything a constructor may use, scoped to one unit of work.
#[derive(Clone)]
pub struct RepositoryContext {
    pub session: Arc<dyn DataSession>,
    pub evaluator: SpecificationEvaluator,
    pub clock: Arc<dyn TimeSource>,
    pub config: Arc<RepositoryConfig>,
    /// Variant being constructed.
    pub info: Arc<RepositoryInfo>,
}

impl fmt::Debug for RepositoryContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RepositoryContext")
            .field("evaluator", &self.evaluator)
            .field("config", &self.config)
            .field("info", &self.info)
            .finish_non_exhaustive()
    }
}

pub(crate) type ReadCtor<E> = Arc<
    dyn Fn(RepositoryContext) -> BoxFuture<'static, Result<Arc<dyn ReadRepository<E>>, RepoError>>
        + Send
        + Sync,
>;

pub(crate) type MutatingCtor<E> = Arc<
    dyn Fn(RepositoryContext) -> BoxFuture<'static, Result<Arc<dyn Repository<E>>, RepoError>>
        + Send
        + Sync,
>;

type Boxed = Box<dyn Any + Send + Sync>;

/// Type-safe registry of repository constructors.
#[derive(Default)]
pub struct RepositoryFactories {
    map: RwLock<HashMap<(TypeId, RepoAccess), Boxed>>,
}

impl RepositoryFactories {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the read-only constructor for `E`.
    pub fn register_read<E, F, Fut>(&self, ctor: F)
    where
        E: Entity,
        F: Fn(RepositoryContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Arc<dyn ReadRepository<E>>, RepoError>> + Send + 'static,
    {
        let ctor: ReadCtor<E> = Arc::new(move |ctx| ctor(ctx).boxed());
        self.map
            .write()
            .insert((TypeId::of::<E>(), RepoAccess::ReadOnly), Box::new(ctor));
    }

    /// Register the mutating constructor for `E`.
    pub fn register_mutating<E, F, Fut>(&self, ctor: F)
    where
        E: Entity,
        F: Fn(RepositoryContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Arc<dyn Repository<E>>, RepoError>> + Send + 'static,
    {
        let ctor: MutatingCtor<E> = Arc::new(move |ctx| ctor(ctx).boxed());
        self.map
            .write()
            .insert((TypeId::of::<E>(), RepoAccess::Mutating), Box::new(ctor));
    }

    /// Register the specification-backed repositories for both access levels.
    /// `bind` opens the entity store for each unit of work, so drivers can
    /// join its session.
    ///
    /// ```rust,ignore
    /// let orders = MemoryEntityStore::new([]);
    /// factories.with_store::<Order, _>(move |ctx| orders.bind(ctx));
    /// ```
    pub fn with_store<E, F>(&self, bind: F)
    where
        E: Entity,
        F: Fn(&RepositoryContext) -> Result<Arc<dyn EntityStore<E>>, RepoError>
            + Send
            + Sync
            + 'static,
    {
        let bind = Arc::new(bind);
        let read_bind = Arc::clone(&bind);
        self.register_read::<E, _, _>(move |ctx| {
            let repo = read_bind(&ctx).map(|store| -> Arc<dyn ReadRepository<E>> {
                Arc::new(SpecReadRepository::new(store, ctx.evaluator).with_config(ctx.config))
            });
            future::ready(repo)
        });
        self.register_mutating::<E, _, _>(move |ctx| {
            let repo = bind(&ctx).map(|store| -> Arc<dyn Repository<E>> {
                let repo = SpecRepository::new(store, ctx.evaluator, ctx.clock);
                Arc::new(repo.with_config(ctx.config))
            });
            future::ready(repo)
        });
    }

    pub(crate) fn read_ctor<E: Entity>(&self) -> Option<ReadCtor<E>> {
        let r = self.map.read();
        r.get(&(TypeId::of::<E>(), RepoAccess::ReadOnly))?
            .downcast_ref::<ReadCtor<E>>()
            .cloned()
    }

    pub(crate) fn mutating_ctor<E: Entity>(&self) -> Option<MutatingCtor<E>> {
        let r = self.map.read();
        r.get(&(TypeId::of::<E>(), RepoAccess::Mutating))?
            .downcast_ref::<MutatingCtor<E>>()
            .cloned()
    }

    #[must_use]
    pub fn contains<E: Entity>(&self, access: RepoAccess) -> bool {
        self.map.read().contains_key(&(TypeId::of::<E>(), access))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.read().is_empty()
    }
}

impl fmt::Debug for RepositoryFactories {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RepositoryFactories")
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}
