#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
//! `ModKit` repositories.
//!
//! [`EntityTypeCache`] describes registered entity types and their repository
//! variants. [`RepositoryManager`] opens a [`UnitOfWork`] per scope; the unit
//! of work hands out one lazily constructed repository per entity type and
//! owns the scope's storage transaction.
pub mod clock;
pub mod config;
pub mod entity;
pub mod error;
pub mod factory;
pub mod manager;
pub mod memory;
pub mod repository;
pub mod session;
pub mod type_cache;
pub mod uow;

pub use clock::{FixedTimeSource, SystemTimeSource, TimeSource};
pub use config::{CacheConfig, PaginationConfig, RepositoryConfig};
pub use entity::{Capabilities, Disableable, Entity, EntityId, LongId, has_long_id};
pub use error::{ConfigError, ErrorKind, RepoError};
pub use factory::{RepositoryContext, RepositoryFactories};
pub use manager::RepositoryManager;
pub use memory::{MemoryEntityStore, MemorySession};
pub use repository::{
    EntityStore, Page, PageInfo, ReadRepository, Repository, SpecReadRepository, SpecRepository,
};
pub use session::{DataSession, SessionTransaction};
pub use type_cache::{
    EntityTypeCache, EntityTypeCacheBuilder, EntityTypeInfo, RepoAccess, RepoShape,
    RepositoryInfo, RepositoryInterface, TypeKey,
};
pub use uow::UnitOfWork;
