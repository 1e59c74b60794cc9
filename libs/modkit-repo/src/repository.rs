//! Repository contracts and the default specification-backed implementation.
//!
//! Storage drivers implement [`EntityStore`] once per entity type. The default
//! repositories route every query through [`SpecificationEvaluator`] so facet
//! application order is identical across drivers.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use modkit_spec::{
    CacheSettings, DeleteCommand, FieldRef, ObjectMapper, PaginationFilter, ProjectedSpecification,
    QuerySource, Specification, SpecificationBuilder, SpecificationEvaluator, StorageError,
    UpdateCommand, UpdateSpecification,
};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::clock::TimeSource;
use crate::config::RepositoryConfig;
use crate::entity::{Disableable, Entity};
use crate::error::RepoError;

/// One page of results plus the window it was read from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<E> {
    pub items: Vec<E>,
    pub page_info: PageInfo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PageInfo {
    /// 1-based page number actually served.
    pub page_number: u64,
    /// Effective page size after defaulting and capping.
    pub page_size: u64,
    /// Rows matching the criteria, ignoring paging.
    pub total: u64,
}

impl PageInfo {
    #[must_use]
    pub fn total_pages(&self) -> u64 {
        if self.page_size == 0 {
            0
        } else {
            self.total.div_ceil(self.page_size)
        }
    }
}

/// Storage-driver contract for one entity type.
#[async_trait]
pub trait EntityStore<E: Entity>: Send + Sync {
    /// Fresh, unshaped query over the entity set.
    fn query(&self) -> Box<dyn QuerySource<E>>;

    /// # Errors
    /// Driver failures and cancellation.
    async fn insert(&self, entity: E, cancel: &CancellationToken) -> Result<E, StorageError>;

    /// Replace the stored row with the same id. `false` if there is none.
    ///
    /// # Errors
    /// Driver failures and cancellation.
    async fn update(&self, entity: E, cancel: &CancellationToken) -> Result<bool, StorageError>;

    /// # Errors
    /// Driver failures and cancellation.
    async fn delete(&self, id: &E::Id, cancel: &CancellationToken) -> Result<bool, StorageError>;

    /// Apply a bulk update, returning the number of affected rows.
    ///
    /// # Errors
    /// Driver failures and cancellation.
    async fn execute_update(
        &self,
        command: &UpdateCommand,
        cancel: &CancellationToken,
    ) -> Result<u64, StorageError>;

    /// # Errors
    /// Driver failures and cancellation.
    async fn execute_delete(
        &self,
        command: &DeleteCommand,
        cancel: &CancellationToken,
    ) -> Result<u64, StorageError>;
}

/// Read-only repository surface.
#[async_trait]
pub trait ReadRepository<E: Entity>: Send + Sync {
    fn evaluator(&self) -> &SpecificationEvaluator;

    /// Unshaped query, for evaluating specifications directly.
    fn source(&self) -> Box<dyn QuerySource<E>>;

    /// Caching hints for `spec` as a result cache should apply them. `None`
    /// when caching is off for the specification.
    fn cache_settings(&self, spec: &Specification<E>) -> Option<CacheSettings> {
        spec.cache_settings()
    }

    /// # Errors
    /// Storage failures and cancellation.
    async fn get_by_id(
        &self,
        id: E::Id,
        cancel: &CancellationToken,
    ) -> Result<Option<E>, RepoError> {
        let spec = Specification::new().filter(FieldRef::<E, E::Id>::new(E::ID_FIELD).eq(id));
        self.first(&spec, cancel).await
    }

    /// # Errors
    /// Storage failures and cancellation.
    async fn list(
        &self,
        spec: &Specification<E>,
        cancel: &CancellationToken,
    ) -> Result<Vec<E>, RepoError> {
        if let Some(cache) = self.cache_settings(spec) {
            debug!(
                entity = std::any::type_name::<E>(),
                key = %spec.cache_key(),
                mode = ?cache.expiration_mode,
                timeout = ?cache.timeout,
                "cache-eligible query"
            );
        }
        Ok(self.evaluator().evaluate(self.source(), spec, cancel).await?)
    }

    /// First row of the specification's result.
    ///
    /// # Errors
    /// Storage failures and cancellation.
    async fn first(
        &self,
        spec: &Specification<E>,
        cancel: &CancellationToken,
    ) -> Result<Option<E>, RepoError> {
        // post-processing sees the whole result, so only unprocessed,
        // unpaged specifications can be narrowed to one row
        let narrowed = if spec.post_processing().is_none() {
            spec.clone().take(1).ok()
        } else {
            None
        };
        let rows = self.list(narrowed.as_ref().unwrap_or(spec), cancel).await?;
        Ok(rows.into_iter().next())
    }

    /// # Errors
    /// Storage failures and cancellation.
    async fn count(
        &self,
        spec: &Specification<E>,
        cancel: &CancellationToken,
    ) -> Result<u64, RepoError> {
        Ok(SpecificationEvaluator::count(self.source(), spec, cancel).await?)
    }

    /// # Errors
    /// Storage failures and cancellation.
    async fn any(
        &self,
        spec: &Specification<E>,
        cancel: &CancellationToken,
    ) -> Result<bool, RepoError> {
        Ok(SpecificationEvaluator::any(self.source(), spec, cancel).await?)
    }

    /// Read one page. The specification must not carry its own paging.
    ///
    /// # Errors
    /// `RepoError::Specification` if the specification is already paged,
    /// otherwise storage failures and cancellation.
    async fn page(
        &self,
        spec: &Specification<E>,
        filter: PaginationFilter,
        cancel: &CancellationToken,
    ) -> Result<Page<E>, RepoError> {
        let paged = spec.clone().with_pagination_filter(filter)?;
        let total = self.count(spec, cancel).await?;
        let items = self.list(&paged, cancel).await?;
        let (_, page_size) = self.evaluator().page_window(filter);
        Ok(Page {
            items,
            page_info: PageInfo {
                page_number: filter.page_number.max(1),
                page_size,
                total,
            },
        })
    }
}

impl<E: Entity> dyn ReadRepository<E> {
    /// Evaluate a projected specification. Without a selector, `mapper`
    /// produces the result shape.
    ///
    /// # Errors
    /// `RepoError::MissingProjection` when there is neither a selector nor a
    /// mapper, otherwise storage failures and cancellation.
    pub async fn project<R>(
        &self,
        spec: &ProjectedSpecification<E, R>,
        mapper: Option<&dyn ObjectMapper<E, R>>,
        cancel: &CancellationToken,
    ) -> Result<Vec<R>, RepoError> {
        Ok(self
            .evaluator()
            .evaluate_projected(self.source(), spec, mapper, cancel)
            .await?)
    }
}

/// Read-write repository surface.
#[async_trait]
pub trait Repository<E: Entity>: ReadRepository<E> {
    /// # Errors
    /// Storage failures and cancellation.
    async fn insert(&self, entity: E, cancel: &CancellationToken) -> Result<E, RepoError>;

    /// `false` when no row with the entity's id exists.
    ///
    /// # Errors
    /// Storage failures and cancellation.
    async fn update(&self, entity: E, cancel: &CancellationToken) -> Result<bool, RepoError>;

    /// # Errors
    /// Storage failures and cancellation.
    async fn delete(&self, id: E::Id, cancel: &CancellationToken) -> Result<bool, RepoError>;

    /// Bulk update of every row matching the criteria.
    ///
    /// # Errors
    /// Storage failures and cancellation.
    async fn update_by(
        &self,
        spec: &UpdateSpecification<E>,
        cancel: &CancellationToken,
    ) -> Result<u64, RepoError>;

    /// # Errors
    /// Storage failures and cancellation.
    async fn delete_by(
        &self,
        spec: &Specification<E>,
        cancel: &CancellationToken,
    ) -> Result<u64, RepoError>;

    /// Soft-delete every matching row that is not disabled yet.
    ///
    /// # Errors
    /// Storage failures and cancellation.
    async fn disable_by(
        &self,
        spec: &Specification<E>,
        cancel: &CancellationToken,
    ) -> Result<u64, RepoError>
    where
        E: Disableable;
}

/// Read-only repository over an [`EntityStore`].
pub struct SpecReadRepository<E: Entity> {
    store: Arc<dyn EntityStore<E>>,
    evaluator: SpecificationEvaluator,
    config: Arc<RepositoryConfig>,
}

impl<E: Entity> SpecReadRepository<E> {
    #[must_use]
    pub fn new(store: Arc<dyn EntityStore<E>>, evaluator: SpecificationEvaluator) -> Self {
        Self {
            store,
            evaluator,
            config: Arc::default(),
        }
    }

    /// Fill unset caching hints from `config.cache`.
    #[must_use]
    pub fn with_config(mut self, config: Arc<RepositoryConfig>) -> Self {
        self.config = config;
        self
    }
}

impl<E: Entity> fmt::Debug for SpecReadRepository<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpecReadRepository")
            .field("entity", &std::any::type_name::<E>())
            .field("evaluator", &self.evaluator)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<E: Entity> ReadRepository<E> for SpecReadRepository<E> {
    fn evaluator(&self) -> &SpecificationEvaluator {
        &self.evaluator
    }

    fn source(&self) -> Box<dyn QuerySource<E>> {
        self.store.query()
    }

    fn cache_settings(&self, spec: &Specification<E>) -> Option<CacheSettings> {
        self.config.effective_cache(spec.cache_settings())
    }
}

/// Read-write repository over an [`EntityStore`].
pub struct SpecRepository<E: Entity> {
    read: SpecReadRepository<E>,
    clock: Arc<dyn TimeSource>,
}

impl<E: Entity> SpecRepository<E> {
    #[must_use]
    pub fn new(
        store: Arc<dyn EntityStore<E>>,
        evaluator: SpecificationEvaluator,
        clock: Arc<dyn TimeSource>,
    ) -> Self {
        Self {
            read: SpecReadRepository::new(store, evaluator),
            clock,
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: Arc<RepositoryConfig>) -> Self {
        self.read = self.read.with_config(config);
        self
    }

    fn store(&self) -> &dyn EntityStore<E> {
        self.read.store.as_ref()
    }
}

impl<E: Entity> fmt::Debug for SpecRepository<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpecRepository")
            .field("read", &self.read)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<E: Entity> ReadRepository<E> for SpecRepository<E> {
    fn evaluator(&self) -> &SpecificationEvaluator {
        self.read.evaluator()
    }

    fn source(&self) -> Box<dyn QuerySource<E>> {
        self.read.source()
    }

    fn cache_settings(&self, spec: &Specification<E>) -> Option<CacheSettings> {
        self.read.cache_settings(spec)
    }
}

#[async_trait]
impl<E: Entity> Repository<E> for SpecRepository<E> {
    async fn insert(&self, entity: E, cancel: &CancellationToken) -> Result<E, RepoError> {
        Ok(self.store().insert(entity, cancel).await?)
    }

    async fn update(&self, entity: E, cancel: &CancellationToken) -> Result<bool, RepoError> {
        Ok(self.store().update(entity, cancel).await?)
    }

    async fn delete(&self, id: E::Id, cancel: &CancellationToken) -> Result<bool, RepoError> {
        Ok(self.store().delete(&id, cancel).await?)
    }

    async fn update_by(
        &self,
        spec: &UpdateSpecification<E>,
        cancel: &CancellationToken,
    ) -> Result<u64, RepoError> {
        let command = SpecificationEvaluator::get_update(spec);
        let affected = self.store().execute_update(&command, cancel).await?;
        debug!(entity = std::any::type_name::<E>(), affected, "bulk update applied");
        Ok(affected)
    }

    async fn delete_by(
        &self,
        spec: &Specification<E>,
        cancel: &CancellationToken,
    ) -> Result<u64, RepoError> {
        let command = SpecificationEvaluator::get_delete(spec);
        let affected = self.store().execute_delete(&command, cancel).await?;
        debug!(entity = std::any::type_name::<E>(), affected, "bulk delete applied");
        Ok(affected)
    }

    async fn disable_by(
        &self,
        spec: &Specification<E>,
        cancel: &CancellationToken,
    ) -> Result<u64, RepoError>
    where
        E: Disableable,
    {
        debug_assert!(
            E::CAPABILITIES.disableable,
            "{} implements Disableable without the disableable capability",
            std::any::type_name::<E>()
        );
        let command = SpecificationEvaluator::get_disable(spec, self.clock.utc_now());
        let affected = self.store().execute_update(&command, cancel).await?;
        debug!(entity = std::any::type_name::<E>(), affected, "rows disabled");
        Ok(affected)
    }
}
