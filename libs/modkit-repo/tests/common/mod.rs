#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use modkit_repo::{
    Capabilities, Disableable, Entity, EntityStore, EntityTypeCache, MemoryEntityStore,
    ReadRepository, RepoError, Repository, RepositoryFactories, RepositoryManager,
    SpecReadRepository, SpecRepository,
};
use modkit_spec::{FieldError, FieldRef, Record, Value};
use uuid::Uuid;

/// Long-id, soft-deletable entity.
#[derive(Clone, Debug, PartialEq)]
pub struct Customer {
    pub id: i64,
    pub name: String,
    pub tier: String,
    pub is_disabled: bool,
    pub disabled_at: Option<DateTime<Utc>>,
}

impl Customer {
    pub const ID: FieldRef<Customer, i64> = FieldRef::new("id");
    pub const NAME: FieldRef<Customer, String> = FieldRef::new("name");
    pub const TIER: FieldRef<Customer, String> = FieldRef::new("tier");
    pub const IS_DISABLED: FieldRef<Customer, bool> = FieldRef::new("is_disabled");
}

impl Record for Customer {
    fn field(&self, name: &str) -> Option<Value> {
        match name {
            "id" => Some(Value::Number(self.id.into())),
            "name" => Some(Value::String(self.name.clone())),
            "tier" => Some(Value::String(self.tier.clone())),
            "is_disabled" => Some(Value::Bool(self.is_disabled)),
            "disabled_at" => Some(self.disabled_at.map_or(Value::Null, Value::DateTime)),
            _ => None,
        }
    }

    fn set_field(&mut self, name: &str, value: Value) -> Result<(), FieldError> {
        match (name, value) {
            ("name", Value::String(v)) => self.name = v,
            ("tier", Value::String(v)) => self.tier = v,
            ("is_disabled", Value::Bool(v)) => self.is_disabled = v,
            ("disabled_at", Value::DateTime(v)) => self.disabled_at = Some(v),
            ("disabled_at", Value::Null) => self.disabled_at = None,
            (other, _) => return Err(FieldError::ReadOnly(other.to_owned())),
        }
        Ok(())
    }
}

impl Entity for Customer {
    type Id = i64;

    const CAPABILITIES: Capabilities = Capabilities {
        disableable: true,
        ..Capabilities::NONE
    };

    fn id(&self) -> i64 {
        self.id
    }
}

impl Disableable for Customer {
    fn is_disabled(&self) -> bool {
        self.is_disabled
    }

    fn disabled_at(&self) -> Option<DateTime<Utc>> {
        self.disabled_at
    }
}

/// Uuid-keyed entity: no long-id variant.
#[derive(Clone, Debug, PartialEq)]
pub struct Device {
    pub id: Uuid,
    pub label: String,
}

impl Record for Device {
    fn field(&self, name: &str) -> Option<Value> {
        match name {
            "id" => Some(Value::Uuid(self.id)),
            "label" => Some(Value::String(self.label.clone())),
            _ => None,
        }
    }
}

impl Entity for Device {
    type Id = Uuid;

    const CAPABILITIES: Capabilities = Capabilities {
        distributed_id: true,
        ..Capabilities::NONE
    };

    fn id(&self) -> Uuid {
        self.id
    }
}

/// Never registered in the type cache.
#[derive(Clone, Debug, PartialEq)]
pub struct Ghost {
    pub id: i64,
}

impl Record for Ghost {
    fn field(&self, name: &str) -> Option<Value> {
        (name == "id").then(|| Value::Number(self.id.into()))
    }
}

impl Entity for Ghost {
    type Id = i64;

    fn id(&self) -> i64 {
        self.id
    }
}

pub fn customer(id: i64, name: &str, tier: &str) -> Customer {
    Customer {
        id,
        name: name.to_owned(),
        tier: tier.to_owned(),
        is_disabled: false,
        disabled_at: None,
    }
}

pub fn six_customers() -> Vec<Customer> {
    vec![
        customer(1, "Ada", "gold"),
        customer(2, "Ben", "silver"),
        customer(3, "Cy", "gold"),
        customer(4, "Dot", "bronze"),
        customer(5, "Eli", "silver"),
        customer(6, "Fay", "gold"),
    ]
}

pub fn device(label: &str) -> Device {
    Device {
        id: Uuid::new_v4(),
        label: label.to_owned(),
    }
}

pub fn type_cache() -> EntityTypeCache {
    EntityTypeCache::builder()
        .register::<Customer>()
        .register::<Device>()
        .build()
}

/// Manager with the default repositories over in-memory stores.
pub fn memory_manager(customers: Arc<MemoryEntityStore<Customer>>) -> RepositoryManager {
    let factories = RepositoryFactories::new();
    factories.with_store::<Customer, _>(move |ctx| customers.bind(ctx));
    let devices = MemoryEntityStore::<Device>::new(Vec::new());
    factories.with_store::<Device, _>(move |ctx| devices.bind(ctx));
    RepositoryManager::new(type_cache(), factories)
}

/// Construction counters for [`counting_factories`].
#[derive(Debug, Default)]
pub struct Constructions {
    pub read: AtomicUsize,
    pub mutating: AtomicUsize,
}

impl Constructions {
    pub fn read(&self) -> usize {
        self.read.load(Ordering::SeqCst)
    }

    pub fn mutating(&self) -> usize {
        self.mutating.load(Ordering::SeqCst)
    }
}

/// Customer factories that count constructions and take `delay` to build,
/// so concurrent first requests overlap.
pub fn counting_factories(delay: Duration) -> (RepositoryFactories, Arc<Constructions>) {
    let store: Arc<dyn EntityStore<Customer>> = Arc::new(MemoryEntityStore::new(six_customers()));
    let counts = Arc::new(Constructions::default());
    let factories = RepositoryFactories::new();

    let (read_store, read_counts) = (Arc::clone(&store), Arc::clone(&counts));
    factories.register_read::<Customer, _, _>(move |ctx| {
        let store = Arc::clone(&read_store);
        let counts = Arc::clone(&read_counts);
        async move {
            tokio::time::sleep(delay).await;
            counts.read.fetch_add(1, Ordering::SeqCst);
            let repo: Arc<dyn ReadRepository<Customer>> =
                Arc::new(SpecReadRepository::new(store, ctx.evaluator));
            Ok::<_, RepoError>(repo)
        }
    });

    let mutating_counts = Arc::clone(&counts);
    factories.register_mutating::<Customer, _, _>(move |ctx| {
        let store = Arc::clone(&store);
        let counts = Arc::clone(&mutating_counts);
        async move {
            tokio::time::sleep(delay).await;
            counts.mutating.fetch_add(1, Ordering::SeqCst);
            let repo: Arc<dyn Repository<Customer>> =
                Arc::new(SpecRepository::new(store, ctx.evaluator, ctx.clock));
            Ok::<_, RepoError>(repo)
        }
    });

    (factories, counts)
}

/// Thin data pointer of a repository handle, for identity checks across
/// trait-object types.
pub fn addr<T: ?Sized>(repo: &Arc<T>) -> *const () {
    Arc::as_ptr(repo).cast::<()>()
}
