#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Default repositories over the in-memory driver.

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use common::{Customer, Device, customer, device, memory_manager, six_customers, type_cache};
use figment::Figment;
use figment::providers::Serialized;
use modkit_repo::{
    Disableable, Entity, EntityStore, ErrorKind, FixedTimeSource, MemoryEntityStore,
    MemorySession, RepoError, Repository, RepositoryFactories, RepositoryManager, SpecRepository,
    SystemTimeSource,
};
use modkit_spec::{
    CacheSettings, ExpirationMode, FnMapper, PaginationFilter, ProjectedSpecification, Record,
    Specification, SpecificationBuilder, SpecificationEvaluator, UpdateSpecification, Value,
};
use tokio_util::sync::CancellationToken;
use tracing_test::traced_test;

fn names(rows: &[Customer]) -> Vec<&str> {
    rows.iter().map(|c| c.name.as_str()).collect()
}

fn store() -> Arc<MemoryEntityStore<Customer>> {
    Arc::new(MemoryEntityStore::new(six_customers()))
}

#[tokio::test]
async fn crud_round_trip() {
    let store = store();
    let uow = memory_manager(Arc::clone(&store)).begin(Arc::new(MemorySession::new()));
    let repo = uow.repository::<Customer>().await.unwrap();
    let cancel = CancellationToken::new();

    repo.insert(customer(7, "Gus", "silver"), &cancel).await.unwrap();
    assert_eq!(store.len(), 7);

    let err = repo
        .insert(customer(7, "Gus", "silver"), &cancel)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Storage);

    let found = repo.get_by_id(7, &cancel).await.unwrap().unwrap();
    assert_eq!(found.name, "Gus");

    let mut changed = found.clone();
    changed.tier = "gold".to_owned();
    assert!(repo.update(changed, &cancel).await.unwrap());
    assert_eq!(repo.get_by_id(7, &cancel).await.unwrap().unwrap().tier, "gold");
    assert!(!repo.update(customer(99, "Nobody", "none"), &cancel).await.unwrap());

    assert!(repo.delete(7, &cancel).await.unwrap());
    assert!(!repo.delete(7, &cancel).await.unwrap());
    assert!(repo.get_by_id(7, &cancel).await.unwrap().is_none());
}

#[tokio::test]
async fn list_first_count_any_follow_the_specification() {
    let uow = memory_manager(store()).begin(Arc::new(MemorySession::new()));
    let repo = uow.read_repository::<Customer>().await.unwrap();
    let cancel = CancellationToken::new();

    let gold = Specification::<Customer>::new()
        .filter(Customer::TIER.eq("gold"))
        .order_by_descending(Customer::NAME)
        .unwrap()
        .finish();

    let rows = repo.list(&gold, &cancel).await.unwrap();
    assert_eq!(names(&rows), vec!["Fay", "Cy", "Ada"]);

    let first = repo.first(&gold, &cancel).await.unwrap().unwrap();
    assert_eq!(first.name, "Fay");

    assert_eq!(repo.count(&gold, &cancel).await.unwrap(), 3);
    assert!(repo.any(&gold, &cancel).await.unwrap());

    let none = Specification::<Customer>::new().filter(Customer::TIER.eq("platinum"));
    assert!(!repo.any(&none, &cancel).await.unwrap());
    assert!(repo.first(&none, &cancel).await.unwrap().is_none());
}

#[tokio::test]
async fn first_respects_post_processing() {
    let uow = memory_manager(store()).begin(Arc::new(MemorySession::new()));
    let repo = uow.read_repository::<Customer>().await.unwrap();

    let reversed = Specification::<Customer>::new()
        .order_by(Customer::ID)
        .unwrap()
        .finish()
        .post_process(|mut rows: Vec<Customer>| {
            rows.reverse();
            rows
        });
    let first = repo
        .first(&reversed, &CancellationToken::new())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.id, 6);
}

#[tokio::test]
async fn page_reports_window_and_total() {
    let uow = memory_manager(store()).begin(Arc::new(MemorySession::new()));
    let repo = uow.read_repository::<Customer>().await.unwrap();
    let cancel = CancellationToken::new();

    let by_id = Specification::<Customer>::new()
        .order_by(Customer::ID)
        .unwrap()
        .finish();
    let page = repo
        .page(&by_id, PaginationFilter::new(2, 4), &cancel)
        .await
        .unwrap();

    assert_eq!(page.items.iter().map(|c| c.id).collect::<Vec<_>>(), vec![5, 6]);
    assert_eq!(page.page_info.page_number, 2);
    assert_eq!(page.page_info.page_size, 4);
    assert_eq!(page.page_info.total, 6);
    assert_eq!(page.page_info.total_pages(), 2);
}

#[tokio::test]
async fn page_rejects_an_already_paged_specification() {
    let uow = memory_manager(store()).begin(Arc::new(MemorySession::new()));
    let repo = uow.read_repository::<Customer>().await.unwrap();

    let paged = Specification::<Customer>::new().take(2).unwrap();
    let err = repo
        .page(&paged, PaginationFilter::new(1, 10), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, RepoError::Specification(_)));
    assert_eq!(err.kind(), ErrorKind::Specification);
}

#[tokio::test]
async fn page_size_defaults_come_from_configuration() {
    let figment = Figment::new().merge(Serialized::defaults(serde_json::json!({
        "repository": {
            "pagination": { "default_page_size": 4, "max_page_size": 5 }
        }
    })));
    let factories = RepositoryFactories::new();
    let customers = store();
    factories.with_store::<Customer, _>(move |ctx| customers.bind(ctx));
    let manager = RepositoryManager::from_figment(&figment, type_cache(), factories).unwrap();
    assert_eq!(manager.config().pagination.default_page_size, 4);
    assert_eq!(manager.evaluator().options().max_page_size, 5);

    let uow = manager.begin(Arc::new(MemorySession::new()));
    let repo = uow.read_repository::<Customer>().await.unwrap();
    let cancel = CancellationToken::new();
    let all = Specification::<Customer>::new();

    let defaulted = repo
        .page(&all, PaginationFilter::new(1, 0), &cancel)
        .await
        .unwrap();
    assert_eq!(defaulted.items.len(), 4);
    assert_eq!(defaulted.page_info.page_size, 4);

    let capped = repo
        .page(&all, PaginationFilter::new(1, 100), &cancel)
        .await
        .unwrap();
    assert_eq!(capped.items.len(), 5);
    assert_eq!(capped.page_info.page_size, 5);
}

#[tokio::test]
async fn update_by_and_delete_by_apply_in_bulk() {
    let store = store();
    let uow = memory_manager(Arc::clone(&store)).begin(Arc::new(MemorySession::new()));
    let repo = uow.repository::<Customer>().await.unwrap();
    let cancel = CancellationToken::new();

    let promote = UpdateSpecification::<Customer>::new()
        .filter(Customer::TIER.eq("silver"))
        .set(Customer::TIER, "gold");
    assert_eq!(repo.update_by(&promote, &cancel).await.unwrap(), 2);
    assert!(store.snapshot().iter().all(|c| c.tier != "silver"));

    let drop_bronze = Specification::<Customer>::new().filter(Customer::TIER.eq("bronze"));
    assert_eq!(repo.delete_by(&drop_bronze, &cancel).await.unwrap(), 1);
    assert_eq!(store.len(), 5);
}

#[tokio::test]
async fn failed_assignment_leaves_rows_untouched() {
    let store = store();
    let uow = memory_manager(Arc::clone(&store)).begin(Arc::new(MemorySession::new()));
    let repo = uow.repository::<Customer>().await.unwrap();

    // id is read-only on Customer
    let bad = UpdateSpecification::<Customer>::new()
        .set(Customer::TIER, "gold")
        .set(Customer::ID, 0_i64);
    let err = repo
        .update_by(&bad, &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Storage);
    assert_eq!(store.snapshot(), six_customers());
}

#[tokio::test]
async fn disable_by_stamps_once_and_query_filter_hides_rows() {
    let at = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
    let later = Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap();

    let store = Arc::new(
        MemoryEntityStore::new(six_customers()).with_query_filter(Customer::IS_DISABLED.eq(false)),
    );
    let manager = memory_manager(Arc::clone(&store)).with_clock(Arc::new(FixedTimeSource(at)));
    let uow = manager.begin(Arc::new(MemorySession::new()));
    let repo = uow.repository::<Customer>().await.unwrap();
    let cancel = CancellationToken::new();

    let gold = Specification::<Customer>::new().filter(Customer::TIER.eq("gold"));
    assert_eq!(repo.disable_by(&gold, &cancel).await.unwrap(), 3);

    let disabled: Vec<_> = store.snapshot().into_iter().filter(|c| c.is_disabled).collect();
    assert_eq!(disabled.len(), 3);
    assert!(disabled.iter().all(|c| c.disabled_at == Some(at)));

    // default filter hides disabled rows unless ignored
    let all = Specification::<Customer>::new();
    assert_eq!(repo.count(&all, &cancel).await.unwrap(), 3);
    let everything = Specification::<Customer>::new().ignore_query_filters();
    assert_eq!(repo.count(&everything, &cancel).await.unwrap(), 6);

    // already-disabled rows keep their original stamp
    let manager = memory_manager(Arc::clone(&store)).with_clock(Arc::new(FixedTimeSource(later)));
    let uow = manager.begin(Arc::new(MemorySession::new()));
    let repo = uow.repository::<Customer>().await.unwrap();
    let again = Specification::<Customer>::new()
        .filter(Customer::TIER.eq("gold"))
        .ignore_query_filters();
    assert_eq!(repo.disable_by(&again, &cancel).await.unwrap(), 0);
    assert!(
        store
            .snapshot()
            .iter()
            .filter(|c| c.is_disabled)
            .all(|c| c.disabled_at == Some(at))
    );
}

#[tokio::test]
async fn projections_use_selector_or_mapper() {
    let uow = memory_manager(store()).begin(Arc::new(MemorySession::new()));
    let repo = uow.read_repository::<Customer>().await.unwrap();
    let cancel = CancellationToken::new();

    let gold_names = ProjectedSpecification::<Customer, String>::new()
        .filter(Customer::TIER.eq("gold"))
        .select(|c| c.name.clone())
        .unwrap();
    assert_eq!(
        repo.project(&gold_names, None, &cancel).await.unwrap(),
        vec!["Ada", "Cy", "Fay"]
    );

    let unshaped = ProjectedSpecification::<Customer, String>::new()
        .filter(Customer::TIER.eq("silver"));
    let err = repo.project(&unshaped, None, &cancel).await.unwrap_err();
    assert!(matches!(err, RepoError::MissingProjection(_)));
    assert_eq!(err.kind(), ErrorKind::Specification);

    let mapper = FnMapper::new(|c: &Customer| format!("{}:{}", c.id, c.tier));
    assert_eq!(
        repo.project(&unshaped, Some(&mapper), &cancel).await.unwrap(),
        vec!["2:silver", "5:silver"]
    );
}

#[tokio::test]
async fn cancelled_queries_surface_as_cancellation() {
    let uow = memory_manager(store()).begin(Arc::new(MemorySession::new()));
    let repo = uow.repository::<Customer>().await.unwrap();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = repo
        .list(&Specification::new(), &cancel)
        .await
        .unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(err.kind(), ErrorKind::Storage);

    let err = repo
        .insert(customer(8, "Hal", "gold"), &cancel)
        .await
        .unwrap_err();
    assert!(err.is_cancelled());
}

#[tokio::test]
async fn uuid_keyed_entities_work_through_the_generic_variant() -> anyhow::Result<()> {
    let devices = MemoryEntityStore::<Device>::new(Vec::new());
    let factories = RepositoryFactories::new();
    let bound = devices.clone();
    factories.with_store::<Device, _>(move |ctx| bound.bind(ctx));
    let manager = RepositoryManager::new(type_cache(), factories);
    let uow = manager.begin(Arc::new(MemorySession::new()));
    let repo = uow.repository::<Device>().await?;
    let cancel = CancellationToken::new();

    let sensor = device("sensor");
    repo.insert(sensor.clone(), &cancel).await?;
    repo.insert(device("relay"), &cancel).await?;

    let found = repo.get_by_id(sensor.id, &cancel).await?;
    assert_eq!(found, Some(sensor));
    assert_eq!(devices.len(), 2);
    Ok(())
}

#[tokio::test]
#[traced_test]
async fn cache_hints_take_configured_defaults() {
    let figment = Figment::new().merge(Serialized::defaults(serde_json::json!({
        "repository": {
            "cache": { "default_timeout": "90s", "default_mode": "sliding" }
        }
    })));
    let factories = RepositoryFactories::new();
    let customers = store();
    factories.with_store::<Customer, _>(move |ctx| customers.bind(ctx));
    let manager = RepositoryManager::from_figment(&figment, type_cache(), factories).unwrap();
    let uow = manager.begin(Arc::new(MemorySession::new()));
    let repo = uow.read_repository::<Customer>().await.unwrap();

    let unset = Specification::<Customer>::new().with_caching(true).finish();
    assert_eq!(
        repo.cache_settings(&unset),
        Some(CacheSettings {
            expiration_mode: Some(ExpirationMode::Sliding),
            timeout: Some(Duration::from_secs(90)),
        })
    );

    let explicit = Specification::<Customer>::new()
        .with_caching(true)
        .with_expiration_mode(ExpirationMode::Absolute)
        .finish();
    let hints = repo.cache_settings(&explicit).unwrap();
    assert_eq!(hints.expiration_mode, Some(ExpirationMode::Absolute));
    assert_eq!(hints.timeout, Some(Duration::from_secs(90)));

    assert_eq!(repo.cache_settings(&Specification::new()), None);

    // the mutating surface answers the same way
    let writable = uow.repository::<Customer>().await.unwrap();
    assert_eq!(writable.cache_settings(&unset), repo.cache_settings(&unset));

    writable.list(&unset, &CancellationToken::new()).await.unwrap();
    assert!(logs_contain("cache-eligible query"));
}

/// Soft-deletable in code but registered without the capability flag.
#[derive(Clone, Debug, PartialEq)]
struct Unflagged {
    id: i64,
}

impl Record for Unflagged {
    fn field(&self, name: &str) -> Option<Value> {
        (name == "id").then(|| Value::Number(self.id.into()))
    }
}

impl Entity for Unflagged {
    type Id = i64;

    fn id(&self) -> i64 {
        self.id
    }
}

impl Disableable for Unflagged {
    fn is_disabled(&self) -> bool {
        false
    }

    fn disabled_at(&self) -> Option<DateTime<Utc>> {
        None
    }
}

#[cfg(debug_assertions)]
#[tokio::test]
#[should_panic(expected = "without the disableable capability")]
async fn disable_by_requires_the_disableable_capability() {
    let store: Arc<dyn EntityStore<Unflagged>> =
        Arc::new(MemoryEntityStore::new(vec![Unflagged { id: 1 }]));
    let repo = SpecRepository::new(
        store,
        SpecificationEvaluator::default(),
        Arc::new(SystemTimeSource),
    );
    let _ = repo
        .disable_by(&Specification::new(), &CancellationToken::new())
        .await;
}
