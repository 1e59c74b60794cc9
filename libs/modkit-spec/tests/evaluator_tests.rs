#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Evaluator pipeline against the in-memory source.

mod common;

use chrono::{TimeZone, Utc};
use common::{Address, Person, five_people, person};
use modkit_spec::record::matches;
use modkit_spec::{
    Assignment, EvalError, EvaluatorOptions, Expr, FnMapper, MemorySource, PaginationFilter,
    ProjectedSpecification, QueryOp, QuerySource, SortDir, Specification, SpecificationBuilder,
    SpecificationEvaluator, TrackingMode, UpdateSpecification, Value,
};
use tokio_util::sync::CancellationToken;
use tracing_test::traced_test;

fn ids(rows: &[Person]) -> Vec<i64> {
    rows.iter().map(|p| p.id).collect()
}

#[tokio::test]
async fn where_predicates_are_anded() {
    let eval = SpecificationEvaluator::default();
    let cancel = CancellationToken::new();
    let p1 = Person::AGE.gt(18);
    let p2 = Person::CITY.eq("Oslo");

    let spec = Specification::<Person>::new()
        .filter(p1.clone())
        .filter(p2.clone());
    let got = eval
        .evaluate(MemorySource::new(five_people()), &spec, &cancel)
        .await
        .unwrap();

    let conjunction = p1.and(p2);
    let expected: Vec<i64> = five_people()
        .iter()
        .filter(|p| matches(*p, &conjunction).unwrap())
        .map(|p| p.id)
        .collect();
    assert_eq!(ids(&got), expected);
    assert_eq!(ids(&got), vec![1, 3]);
}

#[tokio::test]
async fn skip_one_take_two_returns_indices_one_and_two() {
    let eval = SpecificationEvaluator::default();
    let spec = Specification::<Person>::new()
        .order_by(Person::ID)
        .unwrap()
        .skip(1)
        .unwrap()
        .take(2)
        .unwrap()
        .finish();

    let got = eval
        .evaluate(
            MemorySource::new(five_people()),
            &spec,
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(ids(&got), vec![2, 3]);
}

#[tokio::test]
async fn adults_sorted_by_name_first_page_of_ten() {
    // 25 rows, ids 1..=25; every fifth row is a minor, leaving 20 adults
    let rows: Vec<Person> = (1..=25)
        .map(|i| {
            let age = if i % 5 == 0 { 12 } else { 20 + i };
            person(i64::from(i), &format!("n{:02}", 26 - i), age, "Oslo")
        })
        .collect();

    let spec = Specification::<Person>::new()
        .filter(Person::AGE.gt(18))
        .order_by(Person::NAME)
        .unwrap()
        .skip(0)
        .unwrap()
        .take(10)
        .unwrap()
        .finish();

    let got = SpecificationEvaluator::default()
        .evaluate(MemorySource::new(rows.clone()), &spec, &CancellationToken::new())
        .await
        .unwrap();

    let mut adults: Vec<Person> = rows.into_iter().filter(|p| p.age > 18).collect();
    assert_eq!(adults.len(), 20);
    adults.sort_by(|a, b| a.name.cmp(&b.name));
    adults.truncate(10);
    assert_eq!(got, adults);
}

#[test]
fn facets_are_applied_in_fixed_order() {
    let spec = Specification::<Person>::new()
        .as_split_query()
        .with_tracking(TrackingMode::Tracking)
        .with_pagination_filter(PaginationFilter::new(2, 10))
        .unwrap()
        .order_by(Person::NAME)
        .unwrap()
        .then_by_descending(Person::AGE)
        .group_by(Person::CITY)
        .unwrap()
        .include_path("tags")
        .include(Person::ADDRESS)
        .then_include(Address::COUNTRY)
        .search(Person::NAME, "a%")
        .filter(Person::AGE.gt(18))
        .ignore_query_filters()
        .finish();

    let query = SpecificationEvaluator::default()
        .get_query(MemorySource::new(five_people()), &spec);

    assert_eq!(
        query.ops(),
        &[
            QueryOp::IgnoreQueryFilters,
            QueryOp::Filter(Person::AGE.gt(18)),
            QueryOp::Filter(Expr::like("name", "a%")),
            QueryOp::Include("address".into()),
            QueryOp::Include("address.country".into()),
            QueryOp::Include("tags".into()),
            QueryOp::GroupBy("city".into()),
            QueryOp::OrderBy("name".into(), SortDir::Asc),
            QueryOp::ThenBy("age".into(), SortDir::Desc),
            QueryOp::Skip(10),
            QueryOp::Take(10),
            QueryOp::Tracking(TrackingMode::Tracking),
            QueryOp::SplitQuery,
        ]
    );
}

#[test]
fn overlapping_include_paths_apply_once() {
    let spec = Specification::<Person>::new()
        .include(Person::ADDRESS)
        .then_include(Address::COUNTRY)
        .include(Person::ADDRESS)
        .include_path("address.country")
        .finish();

    let query = SpecificationEvaluator::default()
        .get_query(MemorySource::new(five_people()), &spec);
    let includes: Vec<_> = query
        .ops()
        .iter()
        .filter_map(|op| match op {
            QueryOp::Include(p) => Some(p.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(includes, vec!["address", "address.country"]);
}

#[tokio::test]
async fn search_is_ored_within_group_and_anded_across() {
    let spec = Specification::<Person>::new()
        .search(Person::NAME, "a%")
        .search(Person::NAME, "e%")
        .search_in_group(Person::CITY, "oslo", 2);

    let got = SpecificationEvaluator::default()
        .evaluate(
            MemorySource::new(five_people()),
            &spec,
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    // Ann (Oslo) matches both groups; Eve is in Rome
    assert_eq!(ids(&got), vec![1]);
}

#[tokio::test]
async fn pagination_filter_selects_requested_page() {
    let eval = SpecificationEvaluator::new(EvaluatorOptions {
        default_page_size: 2,
        max_page_size: 2,
    });
    let spec = Specification::<Person>::new()
        .with_pagination_filter(PaginationFilter::new(2, 100))
        .unwrap();
    let got = eval
        .evaluate(
            MemorySource::new(five_people()),
            &spec,
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(ids(&got), vec![3, 4]);
}

#[tokio::test]
async fn group_by_clusters_rows_by_key() {
    let spec = Specification::<Person>::new()
        .group_by(Person::CITY)
        .unwrap();
    let got = SpecificationEvaluator::default()
        .evaluate(
            MemorySource::new(five_people()),
            &spec,
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(ids(&got), vec![1, 3, 2, 5, 4]);
}

#[tokio::test]
async fn post_processing_runs_on_materialized_rows() {
    let spec = Specification::<Person>::new()
        .order_by(Person::ID)
        .unwrap()
        .take(3)
        .unwrap()
        .post_process(|mut rows| {
            rows.reverse();
            rows
        })
        .finish();
    let got = SpecificationEvaluator::default()
        .evaluate(
            MemorySource::new(five_people()),
            &spec,
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(ids(&got), vec![3, 2, 1]);
}

#[tokio::test]
async fn projection_runs_after_shaping() {
    let spec = ProjectedSpecification::<Person, String>::new()
        .select(|p| p.name.clone())
        .unwrap()
        .filter(Person::AGE.gt(18))
        .order_by_descending(Person::AGE)
        .unwrap()
        .take(2)
        .unwrap()
        .post_process(|names| names.into_iter().map(|n| n.to_uppercase()).collect())
        .finish();

    let got = SpecificationEvaluator::default()
        .evaluate_projected(
            MemorySource::new(five_people()),
            &spec,
            None,
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(got, vec!["CID".to_owned(), "ANN".to_owned()]);
}

#[tokio::test]
async fn select_many_flattens() {
    let spec = ProjectedSpecification::<Person, char>::new()
        .select_many(|p| p.name.chars().take(2).collect())
        .unwrap()
        .filter(Person::ID.le(2));
    let got = SpecificationEvaluator::default()
        .evaluate_projected(
            MemorySource::new(five_people()),
            &spec,
            None,
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(got, vec!['A', 'n', 'B', 'o']);
}

#[tokio::test]
async fn mapper_is_used_without_selector() {
    let spec = ProjectedSpecification::<Person, (i64, String)>::new()
        .filter(Person::CITY.eq("Rome"))
        .expand_path("address");
    let mapper = FnMapper::new(|p: &Person| (p.id, p.city.clone()));

    let got = SpecificationEvaluator::default()
        .evaluate_projected(
            MemorySource::new(five_people()),
            &spec,
            Some(&mapper),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(got, vec![(2, "Rome".to_owned()), (5, "Rome".to_owned())]);
}

#[tokio::test]
async fn missing_projection_is_an_error() {
    let spec = ProjectedSpecification::<Person, String>::new();
    let err = SpecificationEvaluator::default()
        .evaluate_projected(
            MemorySource::new(five_people()),
            &spec,
            None,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EvalError::MissingProjection(_)));
}

#[tokio::test]
async fn count_and_any_ignore_paging() {
    let cancel = CancellationToken::new();
    let spec = Specification::<Person>::new()
        .filter(Person::AGE.gt(18))
        .take(1)
        .unwrap();

    let count = SpecificationEvaluator::count(MemorySource::new(five_people()), &spec, &cancel)
        .await
        .unwrap();
    assert_eq!(count, 4);

    let none = Specification::<Person>::new().filter(Person::AGE.gt(100));
    let any = SpecificationEvaluator::any(MemorySource::new(five_people()), &none, &cancel)
        .await
        .unwrap();
    assert!(!any);
}

#[tokio::test]
async fn cancelled_evaluation_surfaces_storage_error() {
    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = SpecificationEvaluator::default()
        .evaluate(
            MemorySource::new(five_people()),
            &Specification::new(),
            &cancel,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EvalError::Storage(e) if e.is_cancelled()));
}

#[tokio::test]
async fn boxed_sources_evaluate_like_concrete_ones() {
    let source: Box<dyn QuerySource<Person>> = Box::new(MemorySource::new(five_people()));
    let spec = Specification::<Person>::new().filter(Person::CITY.eq("Lima"));
    let got = SpecificationEvaluator::default()
        .evaluate(source, &spec, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(ids(&got), vec![4]);
}

#[test]
fn update_intent_carries_criteria_and_assignments() {
    let update = UpdateSpecification::<Person>::new()
        .filter(Person::AGE.lt(18))
        .search_in_group(Person::NAME, "b%", 1)
        .set(Person::CITY, "Paris");

    let cmd = SpecificationEvaluator::get_update(&update);
    assert_eq!(
        cmd.predicate,
        Some(Person::AGE.lt(18).and(Expr::like("name", "b%")))
    );
    assert_eq!(
        cmd.assignments,
        vec![Assignment {
            field: "city".into(),
            value: Value::String("Paris".into())
        }]
    );
}

#[test]
fn delete_intent_without_criteria_targets_everything() {
    let cmd = SpecificationEvaluator::get_delete(&Specification::<Person>::new().ignore_query_filters());
    assert!(cmd.predicate.is_none());
    assert!(cmd.ignore_query_filters);
}

#[test]
fn disable_intent_skips_already_disabled_rows() {
    let at = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
    let spec = Specification::<Person>::new().filter(Person::CITY.eq("Rome"));
    let cmd = SpecificationEvaluator::get_disable(&spec, at);

    let predicate = cmd.predicate.unwrap();
    let mut bob = person(2, "Bob", 17, "Rome");
    assert!(matches(&bob, &predicate).unwrap());
    bob.is_disabled = true;
    assert!(!matches(&bob, &predicate).unwrap());
    assert_eq!(cmd.assignments[1].value, Value::DateTime(at));
}

#[tokio::test]
#[traced_test]
async fn evaluator_logs_stages() {
    let spec = Specification::<Person>::new()
        .group_by(Person::CITY)
        .unwrap()
        .with_pagination_filter(PaginationFilter::new(1, 2))
        .unwrap();
    SpecificationEvaluator::default()
        .evaluate(
            MemorySource::new(five_people()),
            &spec,
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert!(logs_contain("applying group by"));
    assert!(logs_contain("applying pagination filter"));
}
