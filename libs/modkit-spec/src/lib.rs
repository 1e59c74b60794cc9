#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
//! Declarative query intent for `ModKit` data access.
//!
//! A [`Specification`] collects filters, search, includes, grouping, ordering,
//! paging and tracking hints; [`SpecificationEvaluator`] folds it into a
//! storage driver's [`QuerySource`] in a fixed order.
pub mod ast;
pub mod builder;
pub mod error;
pub mod evaluator;
pub mod mapper;
pub mod memory;
pub mod model;
pub mod record;
pub mod schema;
pub mod source;

pub use ast::{CompareOperator, Expr, Value};
pub use builder::{Cacheable, ChainState, Includable, Ordered, SpecificationBuilder};
pub use error::{EvalError, FieldError, SpecError, StorageError};
pub use evaluator::{
    DeleteCommand, EvaluatorOptions, SpecificationEvaluator, UpdateCommand, criteria_predicate,
};
pub use mapper::{FnMapper, FromMapper, ObjectMapper};
pub use memory::{MemorySource, QueryOp};
pub use model::{
    Assignment, CacheSettings, ExpirationMode, IncludeExpression, IncludeKind, OrderExpression,
    OrderRank, PaginationFilter, Paging, PostProcess, ProjectedSpecification, Projection,
    SearchCriterion, SortDir, Specification, TrackingMode, UpdateSpecification,
};
pub use record::Record;
pub use schema::{FieldRef, IntoValue, NavRef};
pub use source::QuerySource;
