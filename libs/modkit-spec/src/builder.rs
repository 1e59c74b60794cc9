//! Fluent composition of specifications.
//!
//! Every builder method consumes the builder and returns it (or a narrower
//! sub-builder), so a specification reads as one expression:
//!
//! ```rust,ignore
//! let spec = Specification::<User>::new()
//!     .filter(User::AGE.gt(18))
//!     .order_by(User::NAME)?
//!     .then_by_descending(User::CREATED_AT)
//!     .include(User::ORDERS)
//!     .then_include(Order::LINES)
//!     .skip(0)?
//!     .take(10)?
//!     .finish();
//! ```
//!
//! Conditional variants (`*_if`) skip the facet when the condition is false.
//! For ordering and include chains a false condition also discards the rest of
//! the chain: later `then_by`/`then_include` calls on the same sub-builder are
//! no-ops until a new chain is started.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use crate::ast::Expr;
use crate::error::SpecError;
use crate::model::{
    Assignment, CacheSettings, ExpirationMode, IncludeExpression, IncludeKind, OrderExpression,
    OrderRank, PaginationFilter, Paging, PostProcess, ProjectedSpecification, Projection,
    SearchCriterion, SortDir, Specification, TrackingMode, UpdateSpecification,
};
use crate::schema::{FieldRef, IntoValue, NavRef};

/// Default search group for `search`.
pub const DEFAULT_SEARCH_GROUP: u32 = 1;

/// State of an ordering or include chain.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ChainState {
    #[default]
    Active,
    Discarded,
}

impl ChainState {
    fn from_condition(condition: bool) -> Self {
        if condition {
            ChainState::Active
        } else {
            ChainState::Discarded
        }
    }

    #[must_use]
    pub fn is_discarded(self) -> bool {
        self == ChainState::Discarded
    }
}

/// Fluent builder surface shared by [`Specification`], [`ProjectedSpecification`]
/// and the chain sub-builders.
///
/// `Entity` is the queried type, `Output` the type post-processing runs on,
/// `Root` the top-level builder returned by [`SpecificationBuilder::finish`].
pub trait SpecificationBuilder: Sized {
    type Entity;
    type Output;
    type Root;

    fn specification_mut(&mut self) -> &mut Specification<Self::Entity>;

    fn post_processing_mut(&mut self) -> &mut Option<PostProcess<Self::Output>>;

    /// Leave any sub-builder and return the top-level specification.
    fn finish(self) -> Self::Root;

    /// Append a predicate. Predicates are ANDed in declaration order.
    #[must_use]
    fn filter(self, predicate: Expr) -> Self {
        self.filter_if(predicate, true)
    }

    #[must_use]
    fn filter_if(mut self, predicate: Expr, condition: bool) -> Self {
        if condition {
            self.specification_mut().where_expressions.push(predicate);
        }
        self
    }

    /// Start an ascending ordering chain.
    ///
    /// # Errors
    /// `SpecError::DuplicateOrderBy` if a primary ordering is already present.
    fn order_by<V>(self, field: FieldRef<Self::Entity, V>) -> Result<Ordered<Self>, SpecError> {
        self.start_order(field.name(), SortDir::Asc, true)
    }

    /// # Errors
    /// `SpecError::DuplicateOrderBy` if the condition holds and a primary ordering is already present.
    fn order_by_if<V>(
        self,
        field: FieldRef<Self::Entity, V>,
        condition: bool,
    ) -> Result<Ordered<Self>, SpecError> {
        self.start_order(field.name(), SortDir::Asc, condition)
    }

    /// # Errors
    /// `SpecError::DuplicateOrderBy` if a primary ordering is already present.
    fn order_by_descending<V>(
        self,
        field: FieldRef<Self::Entity, V>,
    ) -> Result<Ordered<Self>, SpecError> {
        self.start_order(field.name(), SortDir::Desc, true)
    }

    /// # Errors
    /// `SpecError::DuplicateOrderBy` if the condition holds and a primary ordering is already present.
    fn order_by_descending_if<V>(
        self,
        field: FieldRef<Self::Entity, V>,
        condition: bool,
    ) -> Result<Ordered<Self>, SpecError> {
        self.start_order(field.name(), SortDir::Desc, condition)
    }

    #[doc(hidden)]
    fn start_order(
        mut self,
        field: &str,
        dir: SortDir,
        condition: bool,
    ) -> Result<Ordered<Self>, SpecError> {
        if condition {
            let orders = &mut self.specification_mut().order_expressions;
            if orders.iter().any(|o| o.rank == OrderRank::Primary) {
                return Err(SpecError::DuplicateOrderBy);
            }
            orders.push(OrderExpression {
                field: field.to_owned(),
                dir,
                rank: OrderRank::Primary,
            });
        }
        Ok(Ordered {
            inner: self,
            state: ChainState::from_condition(condition),
        })
    }

    /// Start a typed include chain from the root entity.
    #[must_use]
    fn include<P>(self, navigation: NavRef<Self::Entity, P>) -> Includable<Self, P> {
        self.include_if(navigation, true)
    }

    #[must_use]
    fn include_if<P>(
        mut self,
        navigation: NavRef<Self::Entity, P>,
        condition: bool,
    ) -> Includable<Self, P> {
        let path = navigation.name().to_owned();
        if condition {
            self.specification_mut()
                .include_expressions
                .push(IncludeExpression {
                    path: path.clone(),
                    navigation: navigation.name(),
                    root_type: navigation.root_type(),
                    target_type: navigation.target_type(),
                    kind: IncludeKind::Include,
                });
        }
        Includable {
            inner: self,
            path,
            state: ChainState::from_condition(condition),
            _target: PhantomData,
        }
    }

    /// Raw dotted include path, e.g. `"orders.lines"`.
    #[must_use]
    fn include_path(self, path: impl Into<String>) -> Self {
        self.include_path_if(path, true)
    }

    #[must_use]
    fn include_path_if(mut self, path: impl Into<String>, condition: bool) -> Self {
        if condition {
            self.specification_mut().include_strings.push(path.into());
        }
        self
    }

    /// Group the filtered source by a key.
    ///
    /// # Errors
    /// `SpecError::DuplicateGroupBy` if a grouping key is already set.
    fn group_by<V>(mut self, key: FieldRef<Self::Entity, V>) -> Result<Self, SpecError> {
        let spec = self.specification_mut();
        if spec.group_by.is_some() {
            return Err(SpecError::DuplicateGroupBy);
        }
        spec.group_by = Some(key.name().to_owned());
        Ok(self)
    }

    /// LIKE-style search in the default group.
    #[must_use]
    fn search(self, field: FieldRef<Self::Entity, String>, pattern: impl Into<String>) -> Self {
        self.search_if(field, pattern, DEFAULT_SEARCH_GROUP, true)
    }

    /// Search criteria sharing a group are ORed; groups are ANDed.
    #[must_use]
    fn search_in_group(
        self,
        field: FieldRef<Self::Entity, String>,
        pattern: impl Into<String>,
        group: u32,
    ) -> Self {
        self.search_if(field, pattern, group, true)
    }

    #[must_use]
    fn search_if(
        mut self,
        field: FieldRef<Self::Entity, String>,
        pattern: impl Into<String>,
        group: u32,
        condition: bool,
    ) -> Self {
        if condition {
            self.specification_mut()
                .search_criteria
                .push(SearchCriterion {
                    field: field.name().to_owned(),
                    pattern: pattern.into(),
                    group,
                });
        }
        self
    }

    /// # Errors
    /// `DuplicateTake` when take is already set, `DuplicatePagination` when a
    /// pagination filter is set, `InvalidPagination` past `i64::MAX`.
    fn take(mut self, count: u64) -> Result<Self, SpecError> {
        check_range(count, "take exceeds i64::MAX")?;
        let spec = self.specification_mut();
        spec.paging = match spec.paging {
            Paging::None => Paging::Window {
                skip: None,
                take: Some(count),
            },
            Paging::Window { take: Some(_), .. } => return Err(SpecError::DuplicateTake),
            Paging::Window { skip, take: None } => Paging::Window {
                skip,
                take: Some(count),
            },
            Paging::Filter(_) => return Err(SpecError::DuplicatePagination("take")),
        };
        Ok(self)
    }

    /// # Errors
    /// `DuplicateSkip` when skip is already set, `DuplicatePagination` when a
    /// pagination filter is set, `InvalidPagination` past `i64::MAX`.
    fn skip(mut self, count: u64) -> Result<Self, SpecError> {
        check_range(count, "skip exceeds i64::MAX")?;
        let spec = self.specification_mut();
        spec.paging = match spec.paging {
            Paging::None => Paging::Window {
                skip: Some(count),
                take: None,
            },
            Paging::Window { skip: Some(_), .. } => return Err(SpecError::DuplicateSkip),
            Paging::Window { skip: None, take } => Paging::Window {
                skip: Some(count),
                take,
            },
            Paging::Filter(_) => return Err(SpecError::DuplicatePagination("skip")),
        };
        Ok(self)
    }

    /// # Errors
    /// `DuplicatePaginationFilter` when a filter is already set,
    /// `DuplicatePagination` when skip or take is set.
    fn with_pagination_filter(mut self, filter: PaginationFilter) -> Result<Self, SpecError> {
        let spec = self.specification_mut();
        match spec.paging {
            Paging::None => spec.paging = Paging::Filter(filter),
            Paging::Filter(_) => return Err(SpecError::DuplicatePaginationFilter),
            Paging::Window { .. } => return Err(SpecError::DuplicatePagination("pagination filter")),
        }
        Ok(self)
    }

    #[must_use]
    fn as_tracking(self) -> Self {
        self.with_tracking(TrackingMode::Tracking)
    }

    #[must_use]
    fn as_no_tracking(self) -> Self {
        self.with_tracking(TrackingMode::NoTracking)
    }

    #[must_use]
    fn as_no_tracking_with_identity_resolution(self) -> Self {
        self.with_tracking(TrackingMode::NoTrackingWithIdentityResolution)
    }

    /// Last call wins.
    #[must_use]
    fn with_tracking(mut self, mode: TrackingMode) -> Self {
        self.specification_mut().tracking = mode;
        self
    }

    #[must_use]
    fn as_split_query(mut self) -> Self {
        self.specification_mut().split_query = true;
        self
    }

    /// Disable the storage layer's default query filters.
    #[must_use]
    fn ignore_query_filters(mut self) -> Self {
        self.specification_mut().ignore_query_filters = true;
        self
    }

    /// Mark the specification cache-eligible and switch to cache configuration.
    ///
    /// `with_caching(false)` clears any earlier cache settings.
    #[must_use]
    fn with_caching(mut self, enabled: bool) -> Cacheable<Self> {
        let spec = self.specification_mut();
        spec.cache = if enabled {
            Some(spec.cache.unwrap_or_default())
        } else {
            None
        };
        Cacheable { inner: self }
    }

    /// In-memory transform applied to materialized results. Replaces an earlier one.
    #[must_use]
    fn post_process<F>(mut self, action: F) -> Self
    where
        F: Fn(Vec<Self::Output>) -> Vec<Self::Output> + Send + Sync + 'static,
    {
        *self.post_processing_mut() = Some(Arc::new(action));
        self
    }
}

fn check_range(count: u64, message: &'static str) -> Result<(), SpecError> {
    if i64::try_from(count).is_err() {
        return Err(SpecError::InvalidPagination(message));
    }
    Ok(())
}

impl<T> SpecificationBuilder for Specification<T> {
    type Entity = T;
    type Output = T;
    type Root = Self;

    fn specification_mut(&mut self) -> &mut Specification<T> {
        self
    }

    fn post_processing_mut(&mut self) -> &mut Option<PostProcess<T>> {
        &mut self.post_processing
    }

    fn finish(self) -> Self {
        self
    }
}

impl<T, R> SpecificationBuilder for ProjectedSpecification<T, R> {
    type Entity = T;
    type Output = R;
    type Root = Self;

    fn specification_mut(&mut self) -> &mut Specification<T> {
        &mut self.base
    }

    fn post_processing_mut(&mut self) -> &mut Option<PostProcess<R>> {
        &mut self.post_processing
    }

    fn finish(self) -> Self {
        self
    }
}

/// Ordering chain returned by `order_by*`.
#[derive(Debug)]
pub struct Ordered<B> {
    inner: B,
    state: ChainState,
}

impl<B: SpecificationBuilder> Ordered<B> {
    #[must_use]
    pub fn chain_state(&self) -> ChainState {
        self.state
    }

    #[must_use]
    pub fn then_by<V>(self, field: FieldRef<B::Entity, V>) -> Self {
        self.then(field.name(), SortDir::Asc, true)
    }

    #[must_use]
    pub fn then_by_if<V>(self, field: FieldRef<B::Entity, V>, condition: bool) -> Self {
        self.then(field.name(), SortDir::Asc, condition)
    }

    #[must_use]
    pub fn then_by_descending<V>(self, field: FieldRef<B::Entity, V>) -> Self {
        self.then(field.name(), SortDir::Desc, true)
    }

    #[must_use]
    pub fn then_by_descending_if<V>(self, field: FieldRef<B::Entity, V>, condition: bool) -> Self {
        self.then(field.name(), SortDir::Desc, condition)
    }

    fn then(mut self, field: &str, dir: SortDir, condition: bool) -> Self {
        if self.state == ChainState::Active && condition {
            self.inner
                .specification_mut()
                .order_expressions
                .push(OrderExpression {
                    field: field.to_owned(),
                    dir,
                    rank: OrderRank::Secondary,
                });
        } else {
            self.state = ChainState::Discarded;
        }
        self
    }

    /// Leave the ordering chain.
    #[must_use]
    pub fn into_inner(self) -> B {
        self.inner
    }
}

impl<B: SpecificationBuilder> SpecificationBuilder for Ordered<B> {
    type Entity = B::Entity;
    type Output = B::Output;
    type Root = B::Root;

    fn specification_mut(&mut self) -> &mut Specification<B::Entity> {
        self.inner.specification_mut()
    }

    fn post_processing_mut(&mut self) -> &mut Option<PostProcess<B::Output>> {
        self.inner.post_processing_mut()
    }

    fn finish(self) -> B::Root {
        self.inner.finish()
    }
}

/// Include chain positioned at navigation target `P`.
#[derive(Debug)]
pub struct Includable<B, P> {
    inner: B,
    path: String,
    state: ChainState,
    _target: PhantomData<fn() -> P>,
}

impl<B: SpecificationBuilder, P> Includable<B, P> {
    #[must_use]
    pub fn chain_state(&self) -> ChainState {
        self.state
    }

    /// Dotted path of the current chain position.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[must_use]
    pub fn then_include<Q>(self, navigation: NavRef<P, Q>) -> Includable<B, Q> {
        self.then_include_if(navigation, true)
    }

    #[must_use]
    pub fn then_include_if<Q>(mut self, navigation: NavRef<P, Q>, condition: bool) -> Includable<B, Q> {
        let path = format!("{}.{}", self.path, navigation.name());
        let mut state = self.state;
        if state == ChainState::Active && condition {
            self.inner
                .specification_mut()
                .include_expressions
                .push(IncludeExpression {
                    path: path.clone(),
                    navigation: navigation.name(),
                    root_type: navigation.root_type(),
                    target_type: navigation.target_type(),
                    kind: IncludeKind::ThenInclude,
                });
        } else {
            state = ChainState::Discarded;
        }
        Includable {
            inner: self.inner,
            path,
            state,
            _target: PhantomData,
        }
    }

    /// Leave the include chain.
    #[must_use]
    pub fn into_inner(self) -> B {
        self.inner
    }
}

impl<B: SpecificationBuilder, P> SpecificationBuilder for Includable<B, P> {
    type Entity = B::Entity;
    type Output = B::Output;
    type Root = B::Root;

    fn specification_mut(&mut self) -> &mut Specification<B::Entity> {
        self.inner.specification_mut()
    }

    fn post_processing_mut(&mut self) -> &mut Option<PostProcess<B::Output>> {
        self.inner.post_processing_mut()
    }

    fn finish(self) -> B::Root {
        self.inner.finish()
    }
}

/// Cache configuration returned by `with_caching`. Exposes only cache settings.
#[derive(Debug)]
pub struct Cacheable<B> {
    inner: B,
}

impl<B: SpecificationBuilder> Cacheable<B> {
    #[must_use]
    pub fn with_expiration_mode(mut self, mode: ExpirationMode) -> Self {
        self.update(|c| c.expiration_mode = Some(mode));
        self
    }

    #[must_use]
    pub fn with_expiration_timeout(mut self, timeout: Duration) -> Self {
        self.update(|c| c.timeout = Some(timeout));
        self
    }

    fn update(&mut self, f: impl FnOnce(&mut CacheSettings)) {
        // no-op when caching was disabled
        if let Some(cache) = self.inner.specification_mut().cache.as_mut() {
            f(cache);
        }
    }

    /// Leave cache configuration and continue building.
    #[must_use]
    pub fn into_inner(self) -> B {
        self.inner
    }

    #[must_use]
    pub fn finish(self) -> B::Root {
        self.inner.finish()
    }
}

impl<T, R> ProjectedSpecification<T, R> {
    /// Single-result projection.
    ///
    /// # Errors
    /// `SpecError::DuplicateSelector` if a projection is already set.
    pub fn select<F>(mut self, selector: F) -> Result<Self, SpecError>
    where
        F: Fn(&T) -> R + Send + Sync + 'static,
    {
        if self.projection.is_some() {
            return Err(SpecError::DuplicateSelector);
        }
        self.projection = Some(Projection::Select(Arc::new(selector)));
        Ok(self)
    }

    /// Flattening projection.
    ///
    /// # Errors
    /// `SpecError::DuplicateSelector` if a projection is already set.
    pub fn select_many<F>(mut self, selector: F) -> Result<Self, SpecError>
    where
        F: Fn(&T) -> Vec<R> + Send + Sync + 'static,
    {
        if self.projection.is_some() {
            return Err(SpecError::DuplicateSelector);
        }
        self.projection = Some(Projection::SelectMany(Arc::new(selector)));
        Ok(self)
    }

    /// Expansion hint on the result type, passed to the object mapper.
    #[must_use]
    pub fn expand<P>(mut self, member: NavRef<R, P>) -> Self {
        self.members_to_expand.push(member.name().to_owned());
        self
    }

    #[must_use]
    pub fn expand_path(mut self, path: impl Into<String>) -> Self {
        self.string_members_to_expand.push(path.into());
        self
    }
}

impl<T> UpdateSpecification<T> {
    /// Assign `value` to `field` on every targeted row. A later assignment to
    /// the same field replaces the earlier one.
    #[must_use]
    pub fn set<V, X: IntoValue>(mut self, field: FieldRef<T, V>, value: X) -> Self {
        let value = value.into_value();
        match self.assignments.iter_mut().find(|a| a.field == field.name()) {
            Some(existing) => existing.value = value,
            None => self.assignments.push(Assignment {
                field: field.name().to_owned(),
                value,
            }),
        }
        self
    }

    #[must_use]
    pub fn filter(self, predicate: Expr) -> Self {
        self.filter_if(predicate, true)
    }

    #[must_use]
    pub fn filter_if(mut self, predicate: Expr, condition: bool) -> Self {
        self.criteria = self.criteria.filter_if(predicate, condition);
        self
    }

    #[must_use]
    pub fn search_in_group(
        mut self,
        field: FieldRef<T, String>,
        pattern: impl Into<String>,
        group: u32,
    ) -> Self {
        self.criteria = self.criteria.search_in_group(field, pattern, group);
        self
    }

    #[must_use]
    pub fn ignore_query_filters(mut self) -> Self {
        self.criteria = self.criteria.ignore_query_filters();
        self
    }
}
