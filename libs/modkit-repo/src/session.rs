//! Storage session and transaction seams owned by a unit of work.

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use modkit_spec::StorageError;
use tokio_util::sync::CancellationToken;

/// Storage session. Exclusively owned by one [`crate::UnitOfWork`].
#[async_trait]
pub trait DataSession: Send + Sync {
    /// # Errors
    /// Driver failures and cancellation.
    async fn begin_transaction(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Arc<dyn SessionTransaction>, StorageError>;

    /// Persist pending changes outside any explicit transaction. Returns the
    /// number of affected rows as reported by the driver.
    ///
    /// # Errors
    /// Driver failures and cancellation.
    async fn save_changes(&self, cancel: &CancellationToken) -> Result<u64, StorageError>;

    /// Concrete session, for driver stores that join it.
    fn as_any(&self) -> &dyn Any;
}

#[async_trait]
pub trait SessionTransaction: Send + Sync {
    /// # Errors
    /// Driver failures and cancellation.
    async fn commit(&self, cancel: &CancellationToken) -> Result<(), StorageError>;

    /// # Errors
    /// Driver failures and cancellation.
    async fn rollback(&self, cancel: &CancellationToken) -> Result<(), StorageError>;
}
