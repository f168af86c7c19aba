use std::sync::Arc;
use tracing::{debug, info, instrument};

use super::TableStore;
use crate::error::{ScrapeError, StorageError};
use crate::normalizer::{EntityKey, NormalizedEntity};
use crate::retry::{RetryPolicy, with_retry};

/// What happened to a single row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowStatus {
    Created,
    Upserted,
    SkippedExists,
}

/// Commits rows to the store.
///
/// Creation is insert-only so the first write wins. A conflict falls back to
/// a single upsert when `upsert_at_failed_push` is set and is terminal
/// otherwise. Every other storage failure goes through the creation retry
/// policy.
pub struct UpsertHandler {
    store: Arc<dyn TableStore>,
    upsert_at_failed_push: bool,
    creation_retry: RetryPolicy,
}

impl UpsertHandler {
    pub fn new(
        store: Arc<dyn TableStore>,
        upsert_at_failed_push: bool,
        creation_retry: RetryPolicy,
    ) -> Self {
        UpsertHandler {
            store,
            upsert_at_failed_push,
            creation_retry,
        }
    }

    /// Existence check, retried under `policy`.
    pub async fn exists(&self, key: &EntityKey, policy: &RetryPolicy) -> Result<bool, ScrapeError> {
        with_retry(policy, |_| async move {
            self.store.exists(key).await.map_err(ScrapeError::from)
        })
        .await
    }

    /// Writes one row.
    ///
    /// This function:
    /// - Skips the write when `abandon_if_exists` is set and the row is present
    /// - Inserts the row, so an existing row is never silently replaced
    /// - Falls back to one upsert on conflict when `upsert_at_failed_push` is set
    /// - Retries transient storage failures under the creation policy
    ///
    /// # Arguments
    /// * `entity` - Normalized row to write
    /// * `abandon_if_exists` - Check for the row first and leave it untouched if found
    ///
    /// # Returns
    /// * `Ok(RowStatus)` - Whether the row was created, upserted or skipped
    /// * `Err(ScrapeError)` - Conflict without upsert fallback, or retries exhausted
    #[instrument(
        skip(self, entity),
        fields(table = %entity.table_name, pk = %entity.partition_key, rk = %entity.row_key)
    )]
    pub async fn commit(
        &self,
        entity: &NormalizedEntity,
        abandon_if_exists: bool,
    ) -> Result<RowStatus, ScrapeError> {
        if abandon_if_exists && self.exists(&entity.key(), &self.creation_retry).await? {
            info!("Entity already exists, abandoning write");
            return Ok(RowStatus::SkippedExists);
        }

        with_retry(&self.creation_retry, |attempt| async move {
            match self.store.create(entity).await {
                Ok(()) => Ok(RowStatus::Created),
                Err(StorageError::Conflict { .. }) if self.upsert_at_failed_push => {
                    debug!(attempt, "Create conflicted, falling back to upsert");
                    self.store.upsert(entity).await?;
                    Ok(RowStatus::Upserted)
                }
                Err(error) => Err(error.into()),
            }
        })
        .await
    }
}
