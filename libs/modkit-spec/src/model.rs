//! Specification model: a mutable accumulator of query facets.
//!
//! A [`Specification`] is pure data. Facets are appended by the builder methods
//! in [`crate::builder`] and folded into a query by [`crate::SpecificationEvaluator`].
//!
//! Mutually exclusive settings are single enums ([`Paging`], [`TrackingMode`]),
//! so an invalid combination cannot be represented.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::ast::{Expr, Value};

/// In-memory transform over materialized results.
pub type PostProcess<T> = Arc<dyn Fn(Vec<T>) -> Vec<T> + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortDir {
    #[serde(rename = "asc")]
    Asc,
    #[serde(rename = "desc")]
    Desc,
}

/// Distinguishes `order_by` (primary) from `then_by` (secondary) entries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OrderRank {
    Primary,
    Secondary,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrderExpression {
    pub field: String,
    pub dir: SortDir,
    pub rank: OrderRank,
}

/// Whether an include starts a chain or extends the previous one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IncludeKind {
    Include,
    ThenInclude,
}

/// Typed eager-load hint.
///
/// `path` is the full dotted navigation path from the specification's root
/// entity; `root_type`/`target_type` describe the last navigation step.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IncludeExpression {
    pub path: String,
    pub navigation: &'static str,
    pub root_type: &'static str,
    pub target_type: &'static str,
    pub kind: IncludeKind,
}

/// LIKE-style search condition. Entries sharing a `group` are ORed, groups are ANDed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SearchCriterion {
    pub field: String,
    pub pattern: String,
    pub group: u32,
}

impl SearchCriterion {
    #[must_use]
    pub fn to_expr(&self) -> Expr {
        Expr::like(self.field.clone(), self.pattern.clone())
    }
}

/// Page request value object. Normalization (page floor, size cap) happens
/// in the evaluator, so any values are accepted here.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaginationFilter {
    pub page_number: u64,
    pub page_size: u64,
}

impl PaginationFilter {
    #[must_use]
    pub fn new(page_number: u64, page_size: u64) -> Self {
        Self {
            page_number,
            page_size,
        }
    }
}

/// Paging directive: a skip/take window or a pagination filter, never both.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Paging {
    #[default]
    None,
    Window {
        skip: Option<u64>,
        take: Option<u64>,
    },
    Filter(PaginationFilter),
}

/// Change-tracking mode. Exactly one is active.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingMode {
    Tracking,
    #[default]
    NoTracking,
    NoTrackingWithIdentityResolution,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpirationMode {
    #[default]
    Absolute,
    Sliding,
}

/// Result-caching hints. Present on a specification only when caching is enabled.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheSettings {
    /// `None` leaves the choice to the configured default.
    pub expiration_mode: Option<ExpirationMode>,
    pub timeout: Option<Duration>,
}

/// Declarative description of a query over `T`.
pub struct Specification<T> {
    pub(crate) where_expressions: Vec<Expr>,
    pub(crate) order_expressions: Vec<OrderExpression>,
    pub(crate) group_by: Option<String>,
    pub(crate) include_expressions: Vec<IncludeExpression>,
    pub(crate) include_strings: Vec<String>,
    pub(crate) search_criteria: Vec<SearchCriterion>,
    pub(crate) paging: Paging,
    pub(crate) tracking: TrackingMode,
    pub(crate) split_query: bool,
    pub(crate) ignore_query_filters: bool,
    pub(crate) cache: Option<CacheSettings>,
    pub(crate) post_processing: Option<PostProcess<T>>,
}

impl<T> Specification<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            where_expressions: Vec::new(),
            order_expressions: Vec::new(),
            group_by: None,
            include_expressions: Vec::new(),
            include_strings: Vec::new(),
            search_criteria: Vec::new(),
            paging: Paging::None,
            tracking: TrackingMode::default(),
            split_query: false,
            ignore_query_filters: false,
            cache: None,
            post_processing: None,
        }
    }

    #[must_use]
    pub fn where_expressions(&self) -> &[Expr] {
        &self.where_expressions
    }

    #[must_use]
    pub fn order_expressions(&self) -> &[OrderExpression] {
        &self.order_expressions
    }

    #[must_use]
    pub fn group_by_key(&self) -> Option<&str> {
        self.group_by.as_deref()
    }

    #[must_use]
    pub fn include_expressions(&self) -> &[IncludeExpression] {
        &self.include_expressions
    }

    #[must_use]
    pub fn include_strings(&self) -> &[String] {
        &self.include_strings
    }

    #[must_use]
    pub fn search_criteria(&self) -> &[SearchCriterion] {
        &self.search_criteria
    }

    #[must_use]
    pub fn paging(&self) -> Paging {
        self.paging
    }

    #[must_use]
    pub fn take_value(&self) -> Option<u64> {
        match self.paging {
            Paging::Window { take, .. } => take,
            _ => None,
        }
    }

    #[must_use]
    pub fn skip_value(&self) -> Option<u64> {
        match self.paging {
            Paging::Window { skip, .. } => skip,
            _ => None,
        }
    }

    #[must_use]
    pub fn pagination_filter(&self) -> Option<PaginationFilter> {
        match self.paging {
            Paging::Filter(filter) => Some(filter),
            _ => None,
        }
    }

    #[must_use]
    pub fn tracking(&self) -> TrackingMode {
        self.tracking
    }

    #[must_use]
    pub fn is_split_query(&self) -> bool {
        self.split_query
    }

    #[must_use]
    pub fn ignores_query_filters(&self) -> bool {
        self.ignore_query_filters
    }

    #[must_use]
    pub fn cache_settings(&self) -> Option<CacheSettings> {
        self.cache
    }

    #[must_use]
    pub fn is_cache_enabled(&self) -> bool {
        self.cache.is_some()
    }

    #[must_use]
    pub fn post_processing(&self) -> Option<&PostProcess<T>> {
        self.post_processing.as_ref()
    }

    /// Stable short digest of the query shape, for result caches.
    ///
    /// Two specifications with the same filters, search, includes, grouping,
    /// ordering and paging produce the same key. Tracking, split-query and
    /// post-processing do not change which rows are returned and are ignored.
    #[must_use]
    pub fn cache_key(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.canonical_shape().as_bytes());
        let digest = hasher.finalize();
        hex::encode(&digest[..8])
    }

    fn canonical_shape(&self) -> String {
        let mut parts: Vec<String> = Vec::new();
        parts.extend(self.where_expressions.iter().map(|e| format!("w:{e}")));
        parts.extend(self.search_criteria.iter().map(|c| {
            format!(
                "s:{}~{}@{}",
                c.field,
                Value::String(c.pattern.clone()).literal(),
                c.group
            )
        }));
        parts.extend(self.include_expressions.iter().map(|i| format!("i:{}", i.path)));
        parts.extend(self.include_strings.iter().map(|i| format!("i:{i}")));
        if let Some(key) = &self.group_by {
            parts.push(format!("g:{key}"));
        }
        parts.extend(self.order_expressions.iter().map(|o| {
            let sign = if o.dir == SortDir::Asc { '+' } else { '-' };
            format!("o:{sign}{}", o.field)
        }));
        parts.push(match self.paging {
            Paging::None => "p:none".to_owned(),
            Paging::Window { skip, take } => format!(
                "p:{}/{}",
                skip.map_or_else(|| "-".to_owned(), |n| n.to_string()),
                take.map_or_else(|| "-".to_owned(), |n| n.to_string())
            ),
            Paging::Filter(f) => format!("p:#{}x{}", f.page_number, f.page_size),
        });
        if self.ignore_query_filters {
            parts.push("f:ignore".to_owned());
        }
        parts.join("|")
    }
}

impl<T> Default for Specification<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Specification<T> {
    fn clone(&self) -> Self {
        Self {
            where_expressions: self.where_expressions.clone(),
            order_expressions: self.order_expressions.clone(),
            group_by: self.group_by.clone(),
            include_expressions: self.include_expressions.clone(),
            include_strings: self.include_strings.clone(),
            search_criteria: self.search_criteria.clone(),
            paging: self.paging,
            tracking: self.tracking,
            split_query: self.split_query,
            ignore_query_filters: self.ignore_query_filters,
            cache: self.cache,
            post_processing: self.post_processing.clone(),
        }
    }
}

impl<T> fmt::Debug for Specification<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Specification")
            .field("where", &self.where_expressions)
            .field("order", &self.order_expressions)
            .field("group_by", &self.group_by)
            .field("includes", &self.include_expressions)
            .field("include_strings", &self.include_strings)
            .field("search", &self.search_criteria)
            .field("paging", &self.paging)
            .field("tracking", &self.tracking)
            .field("split_query", &self.split_query)
            .field("ignore_query_filters", &self.ignore_query_filters)
            .field("cache", &self.cache)
            .field("post_processing", &self.post_processing.is_some())
            .finish()
    }
}

/// Projection from `T` to the result type `R`.
pub enum Projection<T, R> {
    Select(Arc<dyn Fn(&T) -> R + Send + Sync>),
    SelectMany(Arc<dyn Fn(&T) -> Vec<R> + Send + Sync>),
}

impl<T, R> Projection<T, R> {
    /// Apply the projection to materialized rows, preserving order.
    #[must_use]
    pub fn apply(&self, rows: &[T]) -> Vec<R> {
        match self {
            Projection::Select(f) => rows.iter().map(f.as_ref()).collect(),
            Projection::SelectMany(f) => rows.iter().flat_map(f.as_ref()).collect(),
        }
    }
}

impl<T, R> Clone for Projection<T, R> {
    fn clone(&self) -> Self {
        match self {
            Projection::Select(f) => Projection::Select(Arc::clone(f)),
            Projection::SelectMany(f) => Projection::SelectMany(Arc::clone(f)),
        }
    }
}

impl<T, R> fmt::Debug for Projection<T, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Projection::Select(_) => "Select",
            Projection::SelectMany(_) => "SelectMany",
        })
    }
}

/// Specification over `T` whose results are shaped into `R`.
pub struct ProjectedSpecification<T, R> {
    pub(crate) base: Specification<T>,
    pub(crate) projection: Option<Projection<T, R>>,
    pub(crate) members_to_expand: Vec<String>,
    pub(crate) string_members_to_expand: Vec<String>,
    pub(crate) post_processing: Option<PostProcess<R>>,
}

impl<T, R> ProjectedSpecification<T, R> {
    #[must_use]
    pub fn new() -> Self {
        Self::from_base(Specification::new())
    }

    #[must_use]
    pub fn from_base(base: Specification<T>) -> Self {
        Self {
            base,
            projection: None,
            members_to_expand: Vec::new(),
            string_members_to_expand: Vec::new(),
            post_processing: None,
        }
    }

    #[must_use]
    pub fn base(&self) -> &Specification<T> {
        &self.base
    }

    #[must_use]
    pub fn projection(&self) -> Option<&Projection<T, R>> {
        self.projection.as_ref()
    }

    #[must_use]
    pub fn members_to_expand(&self) -> &[String] {
        &self.members_to_expand
    }

    #[must_use]
    pub fn string_members_to_expand(&self) -> &[String] {
        &self.string_members_to_expand
    }

    /// Typed members followed by string members, in declaration order.
    #[must_use]
    pub fn all_members_to_expand(&self) -> Vec<String> {
        self.members_to_expand
            .iter()
            .chain(&self.string_members_to_expand)
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn post_processing(&self) -> Option<&PostProcess<R>> {
        self.post_processing.as_ref()
    }
}

impl<T, R> Default for ProjectedSpecification<T, R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, R> Clone for ProjectedSpecification<T, R> {
    fn clone(&self) -> Self {
        Self {
            base: self.base.clone(),
            projection: self.projection.clone(),
            members_to_expand: self.members_to_expand.clone(),
            string_members_to_expand: self.string_members_to_expand.clone(),
            post_processing: self.post_processing.clone(),
        }
    }
}

impl<T, R> fmt::Debug for ProjectedSpecification<T, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProjectedSpecification")
            .field("base", &self.base)
            .field("projection", &self.projection)
            .field("members_to_expand", &self.members_to_expand)
            .field("string_members_to_expand", &self.string_members_to_expand)
            .field("post_processing", &self.post_processing.is_some())
            .finish()
    }
}

/// Single field assignment of an update intent.
#[derive(Clone, Debug, PartialEq)]
pub struct Assignment {
    pub field: String,
    pub value: Value,
}

/// Write intent: set properties on every row the criteria select.
///
/// Only the filtering facets of `criteria` (query-filter flag, where, search)
/// are honored. Ordering, paging and projection have no meaning for a bulk update.
pub struct UpdateSpecification<T> {
    pub(crate) criteria: Specification<T>,
    pub(crate) assignments: Vec<Assignment>,
}

impl<T> UpdateSpecification<T> {
    #[must_use]
    pub fn new() -> Self {
        Self::from_criteria(Specification::new())
    }

    #[must_use]
    pub fn from_criteria(criteria: Specification<T>) -> Self {
        Self {
            criteria,
            assignments: Vec::new(),
        }
    }

    #[must_use]
    pub fn criteria(&self) -> &Specification<T> {
        &self.criteria
    }

    #[must_use]
    pub fn assignments(&self) -> &[Assignment] {
        &self.assignments
    }
}

impl<T> Default for UpdateSpecification<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for UpdateSpecification<T> {
    fn clone(&self) -> Self {
        Self {
            criteria: self.criteria.clone(),
            assignments: self.assignments.clone(),
        }
    }
}

impl<T> fmt::Debug for UpdateSpecification<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdateSpecification")
            .field("criteria", &self.criteria)
            .field("assignments", &self.assignments)
            .finish()
    }
}
