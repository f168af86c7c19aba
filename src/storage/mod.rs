//! Table storage: the store interface, its adapters, and the handler that
//! commits normalized rows with create-then-upsert semantics.

pub mod azure;
pub mod connection;
pub mod handler;
pub mod memory;

use async_trait::async_trait;

use crate::error::StorageError;
use crate::normalizer::{EntityKey, NormalizedEntity};

pub use azure::AzureTableStore;
pub use connection::ConnectionSettings;
pub use handler::{RowStatus, UpsertHandler};
pub use memory::MemoryTableStore;

/// Table-oriented store with insert-only create, insert-or-replace upsert
/// and point lookup. Implementations must be safe to share across workers.
#[async_trait]
pub trait TableStore: Send + Sync {
    /// Creates the table if it does not exist yet.
    async fn ensure_table(&self, table: &str) -> Result<(), StorageError>;

    /// Inserts a new row; fails with [`StorageError::Conflict`] if the key exists.
    async fn create(&self, entity: &NormalizedEntity) -> Result<(), StorageError>;

    /// Inserts or replaces the row.
    async fn upsert(&self, entity: &NormalizedEntity) -> Result<(), StorageError>;

    async fn exists(&self, key: &EntityKey) -> Result<bool, StorageError>;
}
