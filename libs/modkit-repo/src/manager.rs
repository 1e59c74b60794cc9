//! Repository manager: the process-wide entry point that opens units of work.

use std::fmt;
use std::sync::Arc;

use figment::Figment;
use modkit_spec::SpecificationEvaluator;
use tracing::info;

use crate::clock::{SystemTimeSource, TimeSource};
use crate::config::RepositoryConfig;
use crate::error::ConfigError;
use crate::factory::RepositoryFactories;
use crate::session::DataSession;
use crate::type_cache::EntityTypeCache;
use crate::uow::UnitOfWork;

/// State shared by every unit of work opened from one manager.
pub(crate) struct Shared {
    pub(crate) cache: Arc<EntityTypeCache>,
    pub(crate) factories: Arc<RepositoryFactories>,
    pub(crate) config: Arc<RepositoryConfig>,
    pub(crate) evaluator: SpecificationEvaluator,
    pub(crate) clock: Arc<dyn TimeSource>,
}

/// Process-wide entry point: type cache, repository factories, configuration
/// and time source. Opens one [`UnitOfWork`] per logical scope.
///
/// ```rust,ignore
/// let cache = EntityTypeCache::builder().register::<Order>().build();
/// let factories = RepositoryFactories::new();
/// let orders = MemoryEntityStore::new([]);
/// factories.with_store::<Order, _>(move |ctx| orders.bind(ctx));
///
/// let manager = RepositoryManager::new(cache, factories);
/// let uow = manager.begin(Arc::new(MemorySession::new()));
/// let orders = uow.repository::<Order>().await?;
/// ```
#[derive(Clone)]
pub struct RepositoryManager {
    shared: Arc<Shared>,
}

impl RepositoryManager {
    /// Manager with default configuration and the system clock.
    #[must_use]
    pub fn new(cache: EntityTypeCache, factories: RepositoryFactories) -> Self {
        Self::with_parts(
            Arc::new(cache),
            Arc::new(factories),
            RepositoryConfig::default(),
            Arc::new(SystemTimeSource),
        )
    }

    /// Manager configured from the `repository` section of `figment`.
    ///
    /// # Errors
    /// See [`RepositoryConfig::from_figment`].
    pub fn from_figment(
        figment: &Figment,
        cache: EntityTypeCache,
        factories: RepositoryFactories,
    ) -> Result<Self, ConfigError> {
        let config = RepositoryConfig::from_figment(figment)?;
        Ok(Self::with_parts(
            Arc::new(cache),
            Arc::new(factories),
            config,
            Arc::new(SystemTimeSource),
        ))
    }

    #[must_use]
    pub fn with_parts(
        cache: Arc<EntityTypeCache>,
        factories: Arc<RepositoryFactories>,
        config: RepositoryConfig,
        clock: Arc<dyn TimeSource>,
    ) -> Self {
        info!(
            entities = cache.entity_count(),
            repositories = cache.repository_count(),
            factories = factories.len(),
            default_page_size = config.pagination.default_page_size,
            max_page_size = config.pagination.max_page_size,
            "repository manager initialized"
        );
        let evaluator = SpecificationEvaluator::new(config.evaluator_options());
        Self {
            shared: Arc::new(Shared {
                cache,
                factories,
                config: Arc::new(config),
                evaluator,
                clock,
            }),
        }
    }

    /// Replace the time source for units of work opened afterwards.
    #[must_use]
    pub fn with_clock(self, clock: Arc<dyn TimeSource>) -> Self {
        let shared = &self.shared;
        Self {
            shared: Arc::new(Shared {
                cache: Arc::clone(&shared.cache),
                factories: Arc::clone(&shared.factories),
                config: Arc::clone(&shared.config),
                evaluator: shared.evaluator.clone(),
                clock,
            }),
        }
    }

    /// Open a unit of work over an exclusively owned session.
    #[must_use]
    pub fn begin(&self, session: Arc<dyn DataSession>) -> UnitOfWork {
        UnitOfWork::new(Arc::clone(&self.shared), session)
    }

    #[must_use]
    pub fn type_cache(&self) -> &EntityTypeCache {
        &self.shared.cache
    }

    #[must_use]
    pub fn factories(&self) -> &RepositoryFactories {
        &self.shared.factories
    }

    #[must_use]
    pub fn config(&self) -> &RepositoryConfig {
        &self.shared.config
    }

    #[must_use]
    pub fn evaluator(&self) -> &SpecificationEvaluator {
        &self.shared.evaluator
    }
}

impl fmt::Debug for RepositoryManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RepositoryManager")
            .field("entities", &self.shared.cache.entity_count())
            .field("factories", &self.shared.factories)
            .field("config", &self.shared.config)
            .finish_non_exhaustive()
    }
}
