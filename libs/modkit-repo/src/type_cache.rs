//! Entity and repository type cache.
//!
//! Built once at startup from an explicit list of entity types. For each entity
//! it records the identifier type, capability flags and the repository
//! variants it supports:
//!
//! | access    | generic id (`Repository<E, Id>`) | long id (`Repository<E>`) |
//! |-----------|----------------------------------|---------------------------|
//! | read-only | always                           | only when `Id = i64`      |
//! | mutating  | always                           | only when `Id = i64`      |
//!
//! The cache is immutable after [`EntityTypeCacheBuilder::build`] and safe for
//! unsynchronized concurrent reads. Lookups return `Option`; turning a miss
//! into an error is up to the caller.

use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Weak};

use tracing::debug;

use crate::entity::{Capabilities, Entity, has_long_id};
use crate::repository::{SpecReadRepository, SpecRepository};

/// Runtime identity of a Rust type, with its name for diagnostics.
#[derive(Clone, Copy)]
pub struct TypeKey {
    id: TypeId,
    name: &'static str,
}

impl TypeKey {
    #[must_use]
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    #[must_use]
    pub fn type_id(&self) -> TypeId {
        self.id
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for TypeKey {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeKey {}

impl Hash for TypeKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RepoAccess {
    ReadOnly,
    Mutating,
}

impl RepoAccess {
    /// A mutating repository also serves read-only requests.
    #[must_use]
    pub fn satisfies(self, requested: RepoAccess) -> bool {
        self == RepoAccess::Mutating || requested == RepoAccess::ReadOnly
    }
}

impl fmt::Display for RepoAccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RepoAccess::ReadOnly => "read-only",
            RepoAccess::Mutating => "mutating",
        })
    }
}

/// Repository type-parameter shape.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RepoShape {
    /// Parameterized by entity and identifier type.
    Generic { id: TypeKey },
    /// Single-parameter convenience variant for `i64`-keyed entities.
    LongId,
}

/// Repository interface: what a caller asks the unit of work for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RepositoryInterface {
    pub entity: TypeKey,
    pub access: RepoAccess,
    pub shape: RepoShape,
}

impl RepositoryInterface {
    #[must_use]
    pub fn generic<E: Entity>(access: RepoAccess) -> Self {
        Self {
            entity: TypeKey::of::<E>(),
            access,
            shape: RepoShape::Generic {
                id: TypeKey::of::<E::Id>(),
            },
        }
    }

    #[must_use]
    pub fn long_id<E: Entity>(access: RepoAccess) -> Self {
        Self {
            entity: TypeKey::of::<E>(),
            access,
            shape: RepoShape::LongId,
        }
    }
}

impl fmt::Display for RepositoryInterface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self.access {
            RepoAccess::ReadOnly => "ReadRepository",
            RepoAccess::Mutating => "Repository",
        };
        match self.shape {
            RepoShape::Generic { id } => write!(f, "{name}<{}, {}>", self.entity.name, id.name),
            RepoShape::LongId => write!(f, "{name}<{}>", self.entity.name),
        }
    }
}

/// Immutable description of one repository variant.
pub struct RepositoryInfo {
    interface: RepositoryInterface,
    implementation: &'static str,
    id_type: TypeKey,
    entity: Weak<EntityTypeInfo>,
}

impl RepositoryInfo {
    #[must_use]
    pub fn interface(&self) -> RepositoryInterface {
        self.interface
    }

    /// Type name of the default implementation.
    #[must_use]
    pub fn implementation(&self) -> &'static str {
        self.implementation
    }

    #[must_use]
    pub fn id_type(&self) -> TypeKey {
        self.id_type
    }

    #[must_use]
    pub fn access(&self) -> RepoAccess {
        self.interface.access
    }

    #[must_use]
    pub fn is_mutating(&self) -> bool {
        self.interface.access == RepoAccess::Mutating
    }

    #[must_use]
    pub fn is_long_id(&self) -> bool {
        self.interface.shape == RepoShape::LongId
    }

    /// Owning entity info. `None` only once the cache has been dropped.
    #[must_use]
    pub fn entity(&self) -> Option<Arc<EntityTypeInfo>> {
        self.entity.upgrade()
    }

    #[must_use]
    pub fn entity_type(&self) -> TypeKey {
        self.interface.entity
    }
}

impl fmt::Debug for RepositoryInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RepositoryInfo")
            .field("interface", &format_args!("{}", self.interface))
            .field("implementation", &self.implementation)
            .field("id_type", &self.id_type)
            .field("entity", &self.interface.entity)
            .finish_non_exhaustive()
    }
}

/// Immutable description of a registered entity type.
pub struct EntityTypeInfo {
    entity: TypeKey,
    id_type: TypeKey,
    capabilities: Capabilities,
    read_only: Arc<RepositoryInfo>,
    mutating: Arc<RepositoryInfo>,
    long_read_only: Option<Arc<RepositoryInfo>>,
    long_mutating: Option<Arc<RepositoryInfo>>,
}

impl EntityTypeInfo {
    fn new<E: Entity>() -> Arc<Self> {
        let long = has_long_id::<E>();
        Arc::new_cyclic(|owner| {
            let info = |interface: RepositoryInterface| {
                let implementation = match interface.access {
                    RepoAccess::ReadOnly => std::any::type_name::<SpecReadRepository<E>>(),
                    RepoAccess::Mutating => std::any::type_name::<SpecRepository<E>>(),
                };
                Arc::new(RepositoryInfo {
                    interface,
                    implementation,
                    id_type: TypeKey::of::<E::Id>(),
                    entity: Weak::clone(owner),
                })
            };
            EntityTypeInfo {
                entity: TypeKey::of::<E>(),
                id_type: TypeKey::of::<E::Id>(),
                capabilities: E::CAPABILITIES,
                read_only: info(RepositoryInterface::generic::<E>(RepoAccess::ReadOnly)),
                mutating: info(RepositoryInterface::generic::<E>(RepoAccess::Mutating)),
                long_read_only: long
                    .then(|| info(RepositoryInterface::long_id::<E>(RepoAccess::ReadOnly))),
                long_mutating: long
                    .then(|| info(RepositoryInterface::long_id::<E>(RepoAccess::Mutating))),
            }
        })
    }

    #[must_use]
    pub fn entity_type(&self) -> TypeKey {
        self.entity
    }

    #[must_use]
    pub fn id_type(&self) -> TypeKey {
        self.id_type
    }

    #[must_use]
    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    #[must_use]
    pub fn is_disableable(&self) -> bool {
        self.capabilities.disableable
    }

    #[must_use]
    pub fn has_distributed_id(&self) -> bool {
        self.capabilities.distributed_id
    }

    /// Whether the single-parameter long-id variant exists.
    #[must_use]
    pub fn has_long_id(&self) -> bool {
        self.long_mutating.is_some()
    }

    /// Variant for `access`; long-id variants only when `long_id` is set.
    #[must_use]
    pub fn repository(&self, access: RepoAccess, long_id: bool) -> Option<&Arc<RepositoryInfo>> {
        match (access, long_id) {
            (RepoAccess::ReadOnly, false) => Some(&self.read_only),
            (RepoAccess::Mutating, false) => Some(&self.mutating),
            (RepoAccess::ReadOnly, true) => self.long_read_only.as_ref(),
            (RepoAccess::Mutating, true) => self.long_mutating.as_ref(),
        }
    }

    /// Every repository variant of this entity: two or four.
    pub fn repositories(&self) -> impl Iterator<Item = &Arc<RepositoryInfo>> {
        [Some(&self.read_only), Some(&self.mutating)]
            .into_iter()
            .chain([self.long_read_only.as_ref(), self.long_mutating.as_ref()])
            .flatten()
    }
}

impl fmt::Debug for EntityTypeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityTypeInfo")
            .field("entity", &self.entity)
            .field("id_type", &self.id_type)
            .field("capabilities", &self.capabilities)
            .field("read_only", &self.read_only.interface)
            .field("mutating", &self.mutating.interface)
            .field("long_read_only", &self.long_read_only.as_ref().map(|r| r.interface))
            .field("long_mutating", &self.long_mutating.as_ref().map(|r| r.interface))
            .finish()
    }
}

/// Process-wide lookup tables: entity type → info, repository interface → info.
#[derive(Debug, Default)]
pub struct EntityTypeCache {
    entities: HashMap<TypeKey, Arc<EntityTypeInfo>>,
    repositories: HashMap<RepositoryInterface, Arc<RepositoryInfo>>,
}

impl EntityTypeCache {
    #[must_use]
    pub fn builder() -> EntityTypeCacheBuilder {
        EntityTypeCacheBuilder::default()
    }

    #[must_use]
    pub fn entity_info<E: Entity>(&self) -> Option<&Arc<EntityTypeInfo>> {
        self.entity_info_by(TypeKey::of::<E>())
    }

    #[must_use]
    pub fn entity_info_by(&self, entity: TypeKey) -> Option<&Arc<EntityTypeInfo>> {
        self.entities.get(&entity)
    }

    #[must_use]
    pub fn repository_info(&self, interface: &RepositoryInterface) -> Option<&Arc<RepositoryInfo>> {
        self.repositories.get(interface)
    }

    pub fn entities(&self) -> impl Iterator<Item = &Arc<EntityTypeInfo>> {
        self.entities.values()
    }

    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    #[must_use]
    pub fn repository_count(&self) -> usize {
        self.repositories.len()
    }
}

/// Collects entity registrations; the only way to populate a cache.
#[derive(Default)]
pub struct EntityTypeCacheBuilder {
    entities: Vec<Arc<EntityTypeInfo>>,
}

impl EntityTypeCacheBuilder {
    /// Register `E`. Registering the same type twice keeps the first entry.
    #[must_use]
    pub fn register<E: Entity>(mut self) -> Self {
        let key = TypeKey::of::<E>();
        if self.entities.iter().any(|e| e.entity == key) {
            debug!(entity = key.name, "entity already registered");
            return self;
        }
        self.entities.push(EntityTypeInfo::new::<E>());
        self
    }

    #[must_use]
    pub fn build(self) -> EntityTypeCache {
        let mut entities = HashMap::with_capacity(self.entities.len());
        let mut repositories = HashMap::new();
        for info in self.entities {
            for repo in info.repositories() {
                repositories.insert(repo.interface, Arc::clone(repo));
            }
            debug!(
                entity = info.entity.name,
                id_type = info.id_type.name,
                long_id = info.has_long_id(),
                "registered entity type"
            );
            entities.insert(info.entity, info);
        }
        EntityTypeCache {
            entities,
            repositories,
        }
    }
}

impl fmt::Debug for EntityTypeCacheBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityTypeCacheBuilder")
            .field("entities", &self.entities.len())
            .finish()
    }
}
