use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{error, info, instrument, warn};

use super::{PipelineContext, ScrapeOutcome, ScrapeTarget};
use crate::config::SchedulerSettings;
use crate::error::{ScrapeError, TimeoutError};

// About thirty years; stands in for budgets too large to add to an instant.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Runs target pipelines with at most `worker_count` in flight.
///
/// Outcomes travel over one channel to a single collector, which is the only
/// place results are accumulated. When the run budget expires, unfinished
/// work is aborted and reported as timed out.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    worker_count: usize,
    run_budget: Duration,
}

impl WorkerPool {
    pub fn new(worker_count: usize, run_budget: Duration) -> Self {
        WorkerPool {
            worker_count: worker_count.max(1),
            run_budget,
        }
    }

    pub fn from_settings(settings: &SchedulerSettings) -> Self {
        Self::new(
            settings.worker_count,
            Duration::from_secs(settings.run_timeout_minutes.saturating_mul(60)),
        )
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Instant at which a run started at `start` runs out of budget.
    pub fn deadline_from(&self, start: Instant) -> Instant {
        start
            .checked_add(self.run_budget)
            .unwrap_or_else(|| start + FAR_FUTURE)
    }

    /// Runs every target with the full run budget starting now.
    ///
    /// # Arguments
    /// * `context` - Shared fetch, normalize and upsert stages
    /// * `targets` - Targets to process; their order is kept in the result
    ///
    /// # Returns
    /// * `Vec<ScrapeOutcome>` - One outcome per target, in target order
    pub async fn run(
        &self,
        context: Arc<PipelineContext>,
        targets: Vec<ScrapeTarget>,
    ) -> Vec<ScrapeOutcome> {
        self.run_until(context, targets, self.deadline_from(Instant::now()))
            .await
    }

    /// Runs target pipelines until they all finish or `deadline` passes.
    ///
    /// This function:
    /// - Keeps at most `worker_count` targets in flight
    /// - Collects outcomes on a single channel, keyed by target position
    /// - Aborts unfinished work at the deadline and reports it as
    ///   [`TimeoutError::RunBudgetExceeded`]
    /// - Spawns nothing when the deadline has already passed
    ///
    /// # Arguments
    /// * `context` - Shared fetch, normalize and upsert stages
    /// * `targets` - Targets to process; their order is kept in the result
    /// * `deadline` - Instant after which no more outcomes are accepted
    ///
    /// # Returns
    /// * `Vec<ScrapeOutcome>` - One outcome per target, in target order
    #[instrument(skip_all, fields(targets = targets.len(), workers = self.worker_count))]
    pub async fn run_until(
        &self,
        context: Arc<PipelineContext>,
        targets: Vec<ScrapeTarget>,
        deadline: Instant,
    ) -> Vec<ScrapeOutcome> {
        if Instant::now() >= deadline {
            warn!(
                "Run budget of {:?} spent before the worker pool started",
                self.run_budget
            );
            return self.timed_out(targets);
        }

        let semaphore = Arc::new(Semaphore::new(self.worker_count));
        let (tx, mut rx) = mpsc::unbounded_channel::<(usize, ScrapeOutcome)>();
        let mut join_set = JoinSet::new();

        for (index, target) in targets.iter().cloned().enumerate() {
            let semaphore = semaphore.clone();
            let context = context.clone();
            let tx = tx.clone();
            join_set.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return;
                };
                let outcome = context.process(&target).await;
                // The collector only goes away after the budget expired.
                let _ = tx.send((index, outcome));
            });
        }
        drop(tx);

        let mut slots: Vec<Option<ScrapeOutcome>> = vec![None; targets.len()];
        let collect = async {
            while let Some((index, outcome)) = rx.recv().await {
                slots[index] = Some(outcome);
            }
        };
        let timed_out = tokio::time::timeout_at(deadline, collect).await.is_err();

        if timed_out {
            warn!(
                "Run budget of {:?} exhausted, aborting unfinished targets",
                self.run_budget
            );
            join_set.abort_all();
        }
        while let Some(joined) = join_set.join_next().await {
            if let Err(join_error) = joined
                && join_error.is_panic()
            {
                error!("Worker task panicked: {join_error}");
            }
        }
        // Outcomes sent between the deadline and the abort still count.
        while let Ok((index, outcome)) = rx.try_recv() {
            slots[index] = Some(outcome);
        }

        let budget = self.run_budget;
        let outcomes: Vec<ScrapeOutcome> = slots
            .into_iter()
            .zip(targets)
            .map(|(slot, target)| {
                slot.unwrap_or_else(|| {
                    let reason = if timed_out {
                        ScrapeError::from(TimeoutError::RunBudgetExceeded { budget })
                    } else {
                        ScrapeError::Aborted {
                            reason: "worker task ended without an outcome".to_string(),
                        }
                    };
                    ScrapeOutcome::failed(target, reason)
                })
            })
            .collect();

        info!(
            outcomes = outcomes.len(),
            failed = outcomes.iter().filter(|o| o.status.is_failed()).count(),
            "Worker pool drained"
        );
        outcomes
    }

    /// Reports every target as timed out without running it.
    pub fn timed_out(&self, targets: Vec<ScrapeTarget>) -> Vec<ScrapeOutcome> {
        let budget = self.run_budget;
        targets
            .into_iter()
            .map(|target| {
                ScrapeOutcome::failed(target, TimeoutError::RunBudgetExceeded { budget }.into())
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_fetcher::EntityFetcher;
    use crate::error::FetchError;
    use crate::normalizer::Normalizer;
    use crate::pipeline::OutcomeStatus;
    use crate::retry::{Phase, RetryPolicy};
    use crate::storage::{MemoryTableStore, UpsertHandler};
    use crate::testing_utils::{StubGameApi, TestDataBuilder};
    use chrono::NaiveDate;

    fn context(api: Arc<StubGameApi>, store: Arc<MemoryTableStore>) -> Arc<PipelineContext> {
        let catalogue = Arc::new(TestDataBuilder::catalogue());
        let policy = |phase| {
            RetryPolicy::new(phase, true, 2)
                .with_delays(Duration::from_millis(1), Duration::from_millis(2))
        };
        Arc::new(PipelineContext::new(
            EntityFetcher::new(api, catalogue.clone()),
            Normalizer::new(
                NaiveDate::from_ymd_opt(2024, 3, 7).unwrap(),
                "null",
                catalogue,
            ),
            UpsertHandler::new(store, true, policy(Phase::Creation)),
            policy(Phase::Extraction),
        ))
    }

    fn player_targets(api: StubGameApi, count: usize) -> (StubGameApi, Vec<ScrapeTarget>) {
        let mut api = api;
        let mut targets = Vec::new();
        for i in 0..count {
            let tag = format!("#P{i}");
            api = api.with_player(TestDataBuilder::player(&tag));
            targets.push(ScrapeTarget::player(tag));
        }
        (api, targets)
    }

    #[tokio::test]
    async fn test_concurrency_never_exceeds_worker_count() {
        let (api, targets) =
            player_targets(StubGameApi::new().with_latency(Duration::from_millis(5)), 50);
        let api = Arc::new(api);
        let store = Arc::new(MemoryTableStore::new().with_latency(Duration::from_millis(2)));

        let outcomes = WorkerPool::new(9, Duration::from_secs(60))
            .run(context(api.clone(), store.clone()), targets)
            .await;

        assert_eq!(outcomes.len(), 50);
        assert!(api.max_in_flight() <= 9);
        assert!(api.max_in_flight() >= 2);
        assert_eq!(store.row_count("Players"), 50);
    }

    #[tokio::test]
    async fn test_every_target_yields_exactly_one_outcome() {
        let (api, mut targets) = player_targets(StubGameApi::new(), 10);
        targets.push(ScrapeTarget::clan("#MISSING"));
        targets.push(ScrapeTarget::troop_category("hero"));
        let api = Arc::new(api);
        api.fail_next("player", 5, FetchError::transient("/players", "503"));

        let outcomes = WorkerPool::new(3, Duration::from_secs(60))
            .run(context(api, Arc::new(MemoryTableStore::new())), targets.clone())
            .await;

        assert_eq!(outcomes.len(), targets.len());
        for (outcome, target) in outcomes.iter().zip(&targets) {
            assert_eq!(&outcome.target, target);
        }
        assert!(matches!(
            outcomes[10].status,
            OutcomeStatus::Failed(ScrapeError::Fetch(FetchError::NotFound { .. }))
        ));
        assert_eq!(outcomes[11].status, OutcomeStatus::Created);
    }

    #[tokio::test]
    async fn test_run_budget_marks_unfinished_targets_as_timed_out() {
        let (api, targets) =
            player_targets(StubGameApi::new().with_latency(Duration::from_millis(500)), 4);

        let outcomes = WorkerPool::new(1, Duration::from_millis(50))
            .run(
                context(Arc::new(api), Arc::new(MemoryTableStore::new())),
                targets,
            )
            .await;

        assert_eq!(outcomes.len(), 4);
        for outcome in outcomes {
            match outcome.status {
                OutcomeStatus::Failed(error) => assert!(error.is_timeout()),
                other => panic!("expected timeout, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_player_and_troops_in_flight_share_one_fetch() {
        let api = Arc::new(
            StubGameApi::new()
                .with_latency(Duration::from_millis(50))
                .with_player(TestDataBuilder::player("#2PP")),
        );
        let store = Arc::new(MemoryTableStore::new());
        let targets = vec![
            ScrapeTarget::player("#2PP"),
            ScrapeTarget::player_troops("#2PP"),
        ];

        let outcomes = WorkerPool::new(9, Duration::from_secs(60))
            .run(context(api.clone(), store.clone()), targets)
            .await;

        assert_eq!(outcomes[0].status, OutcomeStatus::Created);
        assert_eq!(outcomes[1].status, OutcomeStatus::Created);
        assert_eq!(api.calls("player"), 1);
    }

    #[tokio::test]
    async fn test_passed_deadline_times_out_without_fetching() {
        let (api, targets) = player_targets(StubGameApi::new(), 3);
        let api = Arc::new(api);

        let outcomes = WorkerPool::new(2, Duration::from_secs(60))
            .run_until(
                context(api.clone(), Arc::new(MemoryTableStore::new())),
                targets,
                Instant::now(),
            )
            .await;

        assert_eq!(outcomes.len(), 3);
        assert!(outcomes.iter().all(|o| matches!(
            &o.status,
            OutcomeStatus::Failed(error) if error.category() == "timeout"
        )));
        assert_eq!(api.calls("player"), 0);
    }

    #[test]
    fn test_from_settings_converts_minutes() {
        let pool = WorkerPool::from_settings(&SchedulerSettings {
            worker_count: 0,
            run_timeout_minutes: 900,
            failure_tolerance: 0,
        });
        assert_eq!(pool.worker_count(), 1);
        assert_eq!(pool.run_budget, Duration::from_secs(900 * 60));

        let unbounded = WorkerPool::new(1, Duration::MAX);
        let now = Instant::now();
        assert!(unbounded.deadline_from(now) > now);
    }
}
