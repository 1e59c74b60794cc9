//! Folds a [`Specification`] into a [`QuerySource`].
//!
//! Facets are applied in a fixed order:
//!
//! 1. ignore query filters
//! 2. where predicates, in declaration order
//! 3. search criteria, ORed within a group, groups ANDed
//! 4. typed includes, then string includes
//! 5. group by
//! 6. ordering: primary first, secondaries in declaration order
//! 7. paging: pagination filter, or skip/take
//! 8. tracking mode
//! 9. split query
//!
//! Projection and post-processing run on materialized rows in
//! [`SpecificationEvaluator::evaluate`] / [`SpecificationEvaluator::evaluate_projected`].
//!
//! The evaluator assumes a specification produced by the builders and does not
//! re-check builder invariants.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::ast::{CompareOperator, Expr, Value};
use crate::error::EvalError;
use crate::mapper::ObjectMapper;
use crate::model::{
    Assignment, OrderRank, PaginationFilter, Paging, ProjectedSpecification, Specification,
    UpdateSpecification,
};
use crate::source::QuerySource;

/// Default page size when a pagination filter asks for size 0.
pub const DEFAULT_PAGE_SIZE: u64 = 25;
/// Upper bound for a pagination filter's page size.
pub const MAX_PAGE_SIZE: u64 = 1000;

/// Soft-delete flag assigned by [`SpecificationEvaluator::get_disable`].
pub const DISABLED_FIELD: &str = "is_disabled";
/// Soft-delete timestamp assigned by [`SpecificationEvaluator::get_disable`].
pub const DISABLED_AT_FIELD: &str = "disabled_at";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EvaluatorOptions {
    pub default_page_size: u64,
    pub max_page_size: u64,
}

impl Default for EvaluatorOptions {
    fn default() -> Self {
        Self {
            default_page_size: DEFAULT_PAGE_SIZE,
            max_page_size: MAX_PAGE_SIZE,
        }
    }
}

/// Bulk update intent: assignments applied to every row matching `predicate`.
#[derive(Clone, Debug, PartialEq)]
pub struct UpdateCommand {
    pub ignore_query_filters: bool,
    pub predicate: Option<Expr>,
    pub assignments: Vec<Assignment>,
}

/// Bulk delete intent. `predicate: None` targets every row.
#[derive(Clone, Debug, PartialEq)]
pub struct DeleteCommand {
    pub ignore_query_filters: bool,
    pub predicate: Option<Expr>,
}

#[derive(Clone, Debug, Default)]
pub struct SpecificationEvaluator {
    options: EvaluatorOptions,
}

impl SpecificationEvaluator {
    #[must_use]
    pub fn new(options: EvaluatorOptions) -> Self {
        Self { options }
    }

    #[must_use]
    pub fn options(&self) -> EvaluatorOptions {
        self.options
    }

    /// Apply every query-shaping facet to `source`.
    #[must_use]
    pub fn get_query<T, S>(&self, source: S, spec: &Specification<T>) -> S
    where
        S: QuerySource<T>,
    {
        let mut source = Self::get_criteria_query(source, spec);

        let includes = include_paths(spec);
        if !includes.is_empty() {
            debug!(count = includes.len(), "applying includes");
        }
        for path in includes {
            source.include(path);
        }

        if let Some(key) = spec.group_by_key() {
            debug!(key, "applying group by");
            source.group_by(key);
        }

        apply_ordering(&mut source, spec);
        self.apply_paging(&mut source, spec);

        source.tracking(spec.tracking());
        if spec.is_split_query() {
            source.split_query();
        }
        source
    }

    /// Apply only the row-selecting facets: query-filter flag, where, search.
    #[must_use]
    pub fn get_criteria_query<T, S>(mut source: S, spec: &Specification<T>) -> S
    where
        S: QuerySource<T>,
    {
        if spec.ignores_query_filters() {
            debug!("ignoring query filters");
            source.ignore_query_filters();
        }
        for predicate in spec.where_expressions() {
            source.filter(predicate.clone());
        }
        for group in search_groups(spec) {
            source.filter(group);
        }
        source
    }

    fn apply_paging<T, S: QuerySource<T>>(&self, source: &mut S, spec: &Specification<T>) {
        match spec.paging() {
            Paging::None => {}
            Paging::Window { skip, take } => {
                if let Some(skip) = skip {
                    source.skip(skip);
                }
                if let Some(take) = take {
                    source.take(take);
                }
            }
            Paging::Filter(filter) => {
                let (skip, take) = self.page_window(filter);
                debug!(skip, take, "applying pagination filter");
                source.skip(skip);
                source.take(take);
            }
        }
    }

    /// Translate a page request into `(skip, take)`.
    ///
    /// Page numbers start at 1 (0 is treated as 1); a zero page size falls back
    /// to the default, larger sizes are capped at the maximum.
    #[must_use]
    pub fn page_window(&self, filter: PaginationFilter) -> (u64, u64) {
        let page = filter.page_number.max(1);
        let size = if filter.page_size == 0 {
            self.options.default_page_size
        } else {
            filter.page_size
        }
        .min(self.options.max_page_size);
        ((page - 1).saturating_mul(size), size)
    }

    /// Shape, execute and post-process.
    ///
    /// # Errors
    /// Storage failures and cancellation from the source.
    pub async fn evaluate<T, S>(
        &self,
        source: S,
        spec: &Specification<T>,
        cancel: &CancellationToken,
    ) -> Result<Vec<T>, EvalError>
    where
        S: QuerySource<T>,
    {
        let query = self.get_query(source, spec);
        let rows = query.fetch(cancel).await?;
        Ok(match spec.post_processing() {
            Some(action) => action(rows),
            None => rows,
        })
    }

    /// Shape, execute, project and post-process on the result type.
    ///
    /// Without a selector the projection falls back to `mapper`.
    ///
    /// # Errors
    /// `EvalError::MissingProjection` when there is neither a selector nor a
    /// mapper, otherwise storage failures and cancellation.
    pub async fn evaluate_projected<T, R, S>(
        &self,
        source: S,
        spec: &ProjectedSpecification<T, R>,
        mapper: Option<&dyn ObjectMapper<T, R>>,
        cancel: &CancellationToken,
    ) -> Result<Vec<R>, EvalError>
    where
        S: QuerySource<T>,
    {
        if spec.projection().is_none() && mapper.is_none() {
            return Err(EvalError::MissingProjection(std::any::type_name::<R>()));
        }
        let query = self.get_query(source, spec.base());
        let rows = query.fetch(cancel).await?;

        let projected = match (spec.projection(), mapper) {
            (Some(projection), _) => projection.apply(&rows),
            (None, Some(mapper)) => mapper.project(&rows, &spec.all_members_to_expand()),
            (None, None) => return Err(EvalError::MissingProjection(std::any::type_name::<R>())),
        };
        Ok(match spec.post_processing() {
            Some(action) => action(projected),
            None => projected,
        })
    }

    /// # Errors
    /// Storage failures and cancellation from the source.
    pub async fn count<T, S>(
        source: S,
        spec: &Specification<T>,
        cancel: &CancellationToken,
    ) -> Result<u64, EvalError>
    where
        S: QuerySource<T>,
    {
        Self::get_criteria_query(source, spec)
            .count(cancel)
            .await
            .map_err(EvalError::from)
    }

    /// # Errors
    /// Storage failures and cancellation from the source.
    pub async fn any<T, S>(
        source: S,
        spec: &Specification<T>,
        cancel: &CancellationToken,
    ) -> Result<bool, EvalError>
    where
        S: QuerySource<T>,
    {
        Self::get_criteria_query(source, spec)
            .any(cancel)
            .await
            .map_err(EvalError::from)
    }

    #[must_use]
    pub fn get_update<T>(update: &UpdateSpecification<T>) -> UpdateCommand {
        let criteria = update.criteria();
        UpdateCommand {
            ignore_query_filters: criteria.ignores_query_filters(),
            predicate: criteria_predicate(criteria),
            assignments: update.assignments().to_vec(),
        }
    }

    #[must_use]
    pub fn get_delete<T>(spec: &Specification<T>) -> DeleteCommand {
        DeleteCommand {
            ignore_query_filters: spec.ignores_query_filters(),
            predicate: criteria_predicate(spec),
        }
    }

    /// Soft-delete intent. Rows already disabled are not targeted again, so
    /// their original timestamp is kept.
    #[must_use]
    pub fn get_disable<T>(spec: &Specification<T>, at: DateTime<Utc>) -> UpdateCommand {
        let not_disabled = Expr::Compare(
            Box::new(Expr::Identifier(DISABLED_FIELD.to_owned())),
            CompareOperator::Ne,
            Box::new(Expr::Value(Value::Bool(true))),
        );
        let predicate = match criteria_predicate(spec) {
            Some(p) => p.and(not_disabled),
            None => not_disabled,
        };
        UpdateCommand {
            ignore_query_filters: spec.ignores_query_filters(),
            predicate: Some(predicate),
            assignments: vec![
                Assignment {
                    field: DISABLED_FIELD.to_owned(),
                    value: Value::Bool(true),
                },
                Assignment {
                    field: DISABLED_AT_FIELD.to_owned(),
                    value: Value::DateTime(at),
                },
            ],
        }
    }
}

fn apply_ordering<T, S: QuerySource<T>>(source: &mut S, spec: &Specification<T>) {
    let orders = spec.order_expressions();
    let primary = orders.iter().find(|o| o.rank == OrderRank::Primary);
    let secondaries = orders.iter().filter(|o| o.rank == OrderRank::Secondary);

    let mut started = false;
    for order in primary.into_iter().chain(secondaries) {
        if started {
            source.then_by(&order.field, order.dir);
        } else {
            source.order_by(&order.field, order.dir);
            started = true;
        }
    }
    if started {
        debug!(keys = orders.len(), "applied ordering");
    }
}

/// Where predicates and search groups ANDed into one predicate.
#[must_use]
pub fn criteria_predicate<T>(spec: &Specification<T>) -> Option<Expr> {
    Expr::all(
        spec.where_expressions()
            .iter()
            .cloned()
            .chain(search_groups(spec)),
    )
}

/// One ORed expression per search group, in ascending group order.
fn search_groups<T>(spec: &Specification<T>) -> Vec<Expr> {
    let mut groups: BTreeMap<u32, Vec<Expr>> = BTreeMap::new();
    for criterion in spec.search_criteria() {
        groups
            .entry(criterion.group)
            .or_default()
            .push(criterion.to_expr());
    }
    groups.into_values().filter_map(Expr::any).collect()
}

/// Typed include paths then string paths, first occurrence wins.
fn include_paths<T>(spec: &Specification<T>) -> Vec<&str> {
    let mut seen = HashSet::new();
    spec.include_expressions()
        .iter()
        .map(|i| i.path.as_str())
        .chain(spec.include_strings().iter().map(String::as_str))
        .filter(|path| seen.insert(*path))
        .collect()
}
