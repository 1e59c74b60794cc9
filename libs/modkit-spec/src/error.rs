use thiserror::Error;

/// Build-time specification errors, raised at the builder call site.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SpecError {
    #[error("duplicate take: take has already been set on this specification")]
    DuplicateTake,

    #[error("duplicate skip: skip has already been set on this specification")]
    DuplicateSkip,

    /// Take/skip mixed with a pagination filter, in either order.
    #[error("duplicate pagination: {0} conflicts with paging already set on this specification")]
    DuplicatePagination(&'static str),

    #[error("duplicate pagination filter: a pagination filter has already been set")]
    DuplicatePaginationFilter,

    #[error("duplicate order by: a primary ordering is already present, use then_by")]
    DuplicateOrderBy,

    #[error("duplicate group by: a grouping key is already present")]
    DuplicateGroupBy,

    #[error("duplicate selector: a projection has already been set")]
    DuplicateSelector,

    #[error("invalid pagination: {0}")]
    InvalidPagination(&'static str),
}

/// Field-level failures while evaluating expressions against in-memory records.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FieldError {
    #[error("unknown field: {0}")]
    Unknown(String),

    #[error("type mismatch for field {field}: expected {expected}, got {got}")]
    TypeMismatch {
        field: String,
        expected: &'static str,
        got: &'static str,
    },

    #[error("cannot compare {lhs} with {rhs}")]
    Incomparable {
        lhs: &'static str,
        rhs: &'static str,
    },

    #[error("expression of kind {0} is not a boolean predicate")]
    NotBoolean(&'static str),

    #[error("unsupported function or args: {0}()")]
    UnsupportedFunction(String),

    #[error("field is read-only: {0}")]
    ReadOnly(String),
}

/// Failures surfaced by a storage driver at the query-execution boundary.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("operation cancelled")]
    Cancelled,

    #[error("invalid field access: {0}")]
    Field(#[from] FieldError),

    #[error("operation failed: {message}")]
    Failed {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl StorageError {
    /// Wrap a driver failure, keeping the underlying cause.
    #[must_use]
    pub fn failed<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        StorageError::Failed {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// A driver failure with no underlying error value.
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        StorageError::Failed {
            message: message.into(),
            source: None,
        }
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, StorageError::Cancelled)
    }
}

/// Errors produced while executing an evaluated specification.
#[derive(Debug, Error)]
pub enum EvalError {
    /// The specification asks for a distinct result type but carries no
    /// selector, and no object mapper was supplied.
    #[error("no selector and no object mapper for result type {0}")]
    MissingProjection(&'static str),

    #[error(transparent)]
    Storage(#[from] StorageError),
}
