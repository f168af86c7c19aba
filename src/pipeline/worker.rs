use chrono::NaiveDate;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use super::{EntityKind, OutcomeStatus, RowCounts, ScrapeOutcome, ScrapeTarget};
use crate::config::Config;
use crate::data_fetcher::{EntityFetcher, GameApi, GameDataCatalogue};
use crate::error::ScrapeError;
use crate::normalizer::Normalizer;
use crate::retry::{RetryPolicy, with_retry};
use crate::storage::{RowStatus, TableStore, UpsertHandler};

/// Everything a worker needs to take one target from fetch to storage.
/// Shared read-only by all workers of a run.
pub struct PipelineContext {
    fetcher: EntityFetcher,
    normalizer: Normalizer,
    handler: UpsertHandler,
    extraction_retry: RetryPolicy,
    abandon: HashSet<EntityKind>,
    validation_troop_id: String,
}

impl PipelineContext {
    pub fn new(
        fetcher: EntityFetcher,
        normalizer: Normalizer,
        handler: UpsertHandler,
        extraction_retry: RetryPolicy,
    ) -> Self {
        PipelineContext {
            fetcher,
            normalizer,
            handler,
            extraction_retry,
            abandon: HashSet::new(),
            validation_troop_id: crate::constants::sentinel::DEFAULT_VALIDATION_TROOP_ID
                .to_string(),
        }
    }

    pub fn from_config(
        config: &Config,
        api: Arc<dyn GameApi>,
        store: Arc<dyn TableStore>,
        catalogue: Arc<GameDataCatalogue>,
        snapshot_date: NaiveDate,
    ) -> Self {
        let settings = &config.storage_handler_settings;
        let (creation, extraction) = RetryPolicy::from_settings(settings);
        let handler = UpsertHandler::new(store, settings.upsert_at_failed_push_enabled, creation);
        let normalizer = Normalizer::from_config(config, snapshot_date, catalogue.clone());

        let mut context = Self::new(
            EntityFetcher::new(api, catalogue),
            normalizer,
            handler,
            extraction,
        )
        .with_validation_troop_id(&config.player_troops_settings.validation_troop_id);
        for kind in EntityKind::ALL {
            context = context.with_abandon(kind, config.rules_for(kind).abandon_scrape_if_entity_exists);
        }
        context
    }

    pub fn with_abandon(mut self, kind: EntityKind, enabled: bool) -> Self {
        if enabled {
            self.abandon.insert(kind);
        } else {
            self.abandon.remove(&kind);
        }
        self
    }

    pub fn with_validation_troop_id(mut self, troop_id: impl Into<String>) -> Self {
        self.validation_troop_id = troop_id.into();
        self
    }

    pub fn normalizer(&self) -> &Normalizer {
        &self.normalizer
    }

    /// Runs the whole pipeline for one target. Never fails: every error ends
    /// up in the returned outcome.
    #[instrument(skip(self), fields(target = %target))]
    pub async fn process(&self, target: &ScrapeTarget) -> ScrapeOutcome {
        match self.run(target).await {
            Ok(outcome) => {
                debug!(status = outcome.status.label(), "Target finished");
                outcome
            }
            Err(error) => {
                warn!(category = error.category(), "Target failed: {error}");
                ScrapeOutcome::failed(target.clone(), error)
            }
        }
    }

    async fn run(&self, target: &ScrapeTarget) -> Result<ScrapeOutcome, ScrapeError> {
        let abandon = self.abandon.contains(&target.kind);

        let probed = match self.normalizer.probe_key(target, &self.validation_troop_id) {
            Some(key) if abandon => {
                if self.handler.exists(&key, &self.extraction_retry).await? {
                    info!("Entity already stored, skipping fetch");
                    return Ok(ScrapeOutcome::skipped_before_fetch(target.clone()));
                }
                Some(key)
            }
            _ => None,
        };

        let record = with_retry(&self.extraction_retry, |attempt| async move {
            debug!(attempt, "Fetching");
            self.fetcher.fetch(target).await.map_err(ScrapeError::from)
        })
        .await?;

        let rows = self.normalizer.normalize(&record)?;

        let mut counts = RowCounts::default();
        let mut first_failure = None;
        for row in &rows {
            // A row whose key was just probed does not need a second lookup.
            let check_row = abandon && probed.as_ref() != Some(&row.key());
            match self.handler.commit(row, check_row).await {
                Ok(RowStatus::Created) => counts.created += 1,
                Ok(RowStatus::Upserted) => counts.upserted += 1,
                Ok(RowStatus::SkippedExists) => counts.skipped += 1,
                Err(error) => {
                    warn!(
                        pk = %row.partition_key,
                        rk = %row.row_key,
                        "Row commit failed: {error}"
                    );
                    counts.failed += 1;
                    first_failure.get_or_insert(error);
                }
            }
        }

        Ok(ScrapeOutcome {
            target: target.clone(),
            status: aggregate(&counts, first_failure),
            rows: counts,
        })
    }
}

/// Folds row results into the single status of their target.
fn aggregate(rows: &RowCounts, first_failure: Option<ScrapeError>) -> OutcomeStatus {
    if let Some(error) = first_failure {
        OutcomeStatus::Failed(error)
    } else if rows.upserted > 0 {
        OutcomeStatus::Upserted
    } else if rows.created == 0 && rows.skipped > 0 {
        OutcomeStatus::SkippedExists
    } else {
        OutcomeStatus::Created
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{FetchError, StorageError, ValidationError};
    use crate::normalizer::NormalizedEntity;
    use crate::retry::Phase;
    use crate::storage::MemoryTableStore;
    use crate::testing_utils::{StubGameApi, TestDataBuilder};
    use std::time::Duration;

    fn snapshot() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 7).unwrap()
    }

    fn context(
        api: Arc<StubGameApi>,
        store: Arc<MemoryTableStore>,
        upsert_at_failed_push: bool,
        extraction_attempts: u32,
    ) -> PipelineContext {
        let catalogue = Arc::new(TestDataBuilder::catalogue());
        let fast = |phase, attempts| {
            RetryPolicy::new(phase, true, attempts)
                .with_delays(Duration::from_millis(1), Duration::from_millis(2))
        };
        PipelineContext::new(
            EntityFetcher::new(api, catalogue.clone()),
            Normalizer::new(snapshot(), "null", catalogue),
            UpsertHandler::new(store, upsert_at_failed_push, fast(Phase::Creation, 3)),
            fast(Phase::Extraction, extraction_attempts),
        )
    }

    #[tokio::test]
    async fn test_fetch_retry_budget_is_honored() {
        let api = Arc::new(StubGameApi::new().with_clan(TestDataBuilder::clan("#2PP")));
        api.fail_next("clan", 2, FetchError::transient("/clans/%232PP", "502"));
        let store = Arc::new(MemoryTableStore::new());

        let outcome = context(api.clone(), store.clone(), true, 3)
            .process(&ScrapeTarget::clan("#2PP"))
            .await;
        assert_eq!(outcome.status, OutcomeStatus::Created);
        assert_eq!(api.calls("clan"), 3);

        let api = Arc::new(StubGameApi::new().with_clan(TestDataBuilder::clan("#2PP")));
        api.fail_next("clan", 2, FetchError::transient("/clans/%232PP", "502"));
        let outcome = context(api.clone(), Arc::new(MemoryTableStore::new()), true, 2)
            .process(&ScrapeTarget::clan("#2PP"))
            .await;
        assert!(matches!(
            outcome.status,
            OutcomeStatus::Failed(ScrapeError::RetriesExhausted {
                phase: Phase::Extraction,
                attempts: 2,
                ..
            })
        ));
        assert_eq!(api.calls("clan"), 2);
    }

    #[tokio::test]
    async fn test_existing_hero_rows_are_skipped_without_writes() {
        let api = Arc::new(StubGameApi::new());
        let store = Arc::new(MemoryTableStore::new());
        store.seed(&NormalizedEntity::new("Troops", "28000000_1", "2024-03"));

        let context = context(api, store.clone(), true, 3).with_abandon(EntityKind::Troop, true);
        let outcome = context.process(&ScrapeTarget::troop_category("hero")).await;

        assert_eq!(outcome.status, OutcomeStatus::SkippedExists);
        assert_eq!(outcome.rows.skipped, 1);
        assert_eq!(store.write_calls(), 0);
    }

    #[tokio::test]
    async fn test_probe_skips_the_upstream_call() {
        let api = Arc::new(StubGameApi::new().with_player(TestDataBuilder::player("#2PP")));
        let store = Arc::new(MemoryTableStore::new());
        store.seed(&NormalizedEntity::new("Players", "2PP", "2024-03-07"));

        let context = context(api.clone(), store.clone(), true, 3).with_abandon(EntityKind::Player, true);
        let outcome = context.process(&ScrapeTarget::player("#2pp")).await;

        assert_eq!(outcome.status, OutcomeStatus::SkippedExists);
        assert_eq!(api.calls("player"), 0);
        assert_eq!(store.write_calls(), 0);
    }

    #[tokio::test]
    async fn test_probe_miss_fetches_and_creates_once() {
        let api = Arc::new(StubGameApi::new().with_player(TestDataBuilder::player("#2PP")));
        let store = Arc::new(MemoryTableStore::new());

        let context = context(api.clone(), store.clone(), true, 3).with_abandon(EntityKind::Player, true);
        let outcome = context.process(&ScrapeTarget::player("#2PP")).await;

        assert_eq!(outcome.status, OutcomeStatus::Created);
        assert_eq!(store.exists_calls(), 1);
        assert_eq!(store.create_calls(), 1);
    }

    #[tokio::test]
    async fn test_rerun_upserts_instead_of_duplicating() {
        let api = Arc::new(StubGameApi::new().with_clan(TestDataBuilder::clan("#2PP")));
        let store = Arc::new(MemoryTableStore::new());
        let context = context(api, store.clone(), true, 3);

        let first = context.process(&ScrapeTarget::clan("#2PP")).await;
        let second = context.process(&ScrapeTarget::clan("#2PP")).await;

        assert_eq!(first.status, OutcomeStatus::Created);
        assert_eq!(second.status, OutcomeStatus::Upserted);
        assert_eq!(store.row_count("Clans"), 1);
    }

    #[tokio::test]
    async fn test_null_id_is_a_terminal_failure() {
        let api = Arc::new(StubGameApi::new().with_clan(TestDataBuilder::clan("#NULL")));
        let store = Arc::new(MemoryTableStore::new());

        let outcome = context(api.clone(), store.clone(), true, 3)
            .process(&ScrapeTarget::clan("#NULL"))
            .await;

        assert_eq!(
            outcome.status,
            OutcomeStatus::Failed(ScrapeError::Validation(ValidationError::NullIdRejected {
                kind: EntityKind::Clan
            }))
        );
        assert_eq!(api.calls("clan"), 1);
        assert_eq!(store.write_calls(), 0);
    }

    #[tokio::test]
    async fn test_one_failed_row_fails_the_target_but_others_are_written() {
        let api = Arc::new(StubGameApi::new());
        let store = Arc::new(MemoryTableStore::new());
        store.fail_next_creates(
            1,
            StorageError::Rejected {
                table: "Troops".to_string(),
                status: 400,
                message: "PropertyValueTooLarge".to_string(),
            },
        );

        let outcome = context(api, store.clone(), true, 3)
            .process(&ScrapeTarget::troop_category("troop"))
            .await;

        assert!(outcome.status.is_failed());
        assert_eq!(outcome.rows.failed, 1);
        assert_eq!(outcome.rows.created, outcome.rows.total() - 1);
        assert_eq!(store.row_count("Troops"), outcome.rows.created);
    }

    #[test]
    fn test_aggregate_precedence() {
        let rows = |created, upserted, skipped| RowCounts {
            created,
            upserted,
            skipped,
            failed: 0,
        };
        assert_eq!(aggregate(&rows(2, 1, 0), None), OutcomeStatus::Upserted);
        assert_eq!(aggregate(&rows(0, 0, 3), None), OutcomeStatus::SkippedExists);
        assert_eq!(aggregate(&rows(1, 0, 2), None), OutcomeStatus::Created);
        assert!(
            aggregate(
                &rows(1, 1, 1),
                Some(FetchError::not_found("/players/%23X").into())
            )
            .is_failed()
        );
    }
}
