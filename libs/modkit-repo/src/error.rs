//! Error types for repository resolution, storage and configuration.

use modkit_spec::{EvalError, SpecError, StorageError};
use thiserror::Error;

/// Error category, for callers that branch on the kind of failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Invalid specification, raised while building it.
    Specification,
    /// Unknown entity, incompatible identifier or malformed repository request.
    Resolution,
    /// Use of a disposed unit of work.
    Lifecycle,
    /// Failure reported by the storage driver.
    Storage,
}

#[derive(Debug, Error)]
pub enum RepoError {
    #[error(transparent)]
    Specification(#[from] SpecError),

    #[error("no selector and no object mapper for result type {0}")]
    MissingProjection(&'static str),

    #[error("unknown entity type: {0}")]
    UnknownEntity(&'static str),

    #[error("incompatible identifier type for {entity}: requested {requested}, entity uses {actual}")]
    IncompatibleId {
        entity: &'static str,
        requested: &'static str,
        actual: &'static str,
    },

    #[error("unsupported repository request: {0}")]
    UnsupportedRepository(String),

    #[error("unit of work has been disposed")]
    Disposed,

    #[error("storage operation failed")]
    Storage(#[source] StorageError),
}

impl RepoError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            RepoError::Specification(_) | RepoError::MissingProjection(_) => {
                ErrorKind::Specification
            }
            RepoError::UnknownEntity(_)
            | RepoError::IncompatibleId { .. }
            | RepoError::UnsupportedRepository(_) => ErrorKind::Resolution,
            RepoError::Disposed => ErrorKind::Lifecycle,
            RepoError::Storage(_) => ErrorKind::Storage,
        }
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RepoError::Storage(e) if e.is_cancelled())
    }
}

impl From<StorageError> for RepoError {
    fn from(e: StorageError) -> Self {
        RepoError::Storage(e)
    }
}

impl From<EvalError> for RepoError {
    fn from(e: EvalError) -> Self {
        match e {
            EvalError::Storage(e) => RepoError::Storage(e),
            EvalError::MissingProjection(target) => RepoError::MissingProjection(target),
        }
    }
}

/// Invalid repository configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load repository configuration: {0}")]
    Load(#[source] Box<figment::Error>),

    #[error("invalid repository configuration: {0}")]
    Invalid(String),
}

impl From<figment::Error> for ConfigError {
    fn from(e: figment::Error) -> Self {
        ConfigError::Load(Box::new(e))
    }
}
