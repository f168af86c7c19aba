//! Run-level aggregation of target outcomes.

use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::AppError;
use crate::pipeline::{EntityKind, OutcomeStatus, RowCounts, ScrapeOutcome};

/// Outcome counts for one group of targets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub created: usize,
    pub upserted: usize,
    pub skipped_exists: usize,
    pub failed: usize,
}

impl StatusCounts {
    fn record(&mut self, status: &OutcomeStatus) {
        match status {
            OutcomeStatus::Created => self.created += 1,
            OutcomeStatus::Upserted => self.upserted += 1,
            OutcomeStatus::SkippedExists => self.skipped_exists += 1,
            OutcomeStatus::Failed(_) => self.failed += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.created + self.upserted + self.skipped_exists + self.failed
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureRecord {
    pub target: String,
    pub kind: EntityKind,
    pub category: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub snapshot_date: NaiveDate,
    pub elapsed_seconds: f64,
    pub targets: usize,
    pub outcomes: StatusCounts,
    pub rows: RowCounts,
    pub by_kind: BTreeMap<EntityKind, StatusCounts>,
    pub failures: Vec<FailureRecord>,
}

impl RunReport {
    pub fn from_outcomes(
        snapshot_date: NaiveDate,
        outcomes: &[ScrapeOutcome],
        elapsed: Duration,
    ) -> Self {
        let mut totals = StatusCounts::default();
        let mut rows = RowCounts::default();
        let mut by_kind: BTreeMap<EntityKind, StatusCounts> = BTreeMap::new();
        let mut failures = Vec::new();

        for outcome in outcomes {
            totals.record(&outcome.status);
            rows.add(&outcome.rows);
            by_kind
                .entry(outcome.target.kind)
                .or_default()
                .record(&outcome.status);

            if let OutcomeStatus::Failed(error) = &outcome.status {
                failures.push(FailureRecord {
                    target: outcome.target.to_string(),
                    kind: outcome.target.kind,
                    category: error.category().to_string(),
                    message: error.to_string(),
                });
            }
        }

        RunReport {
            snapshot_date,
            elapsed_seconds: elapsed.as_secs_f64(),
            targets: outcomes.len(),
            outcomes: totals,
            rows,
            by_kind,
            failures,
        }
    }

    pub fn failed(&self) -> usize {
        self.outcomes.failed
    }

    /// True when more targets failed than the configured tolerance allows.
    pub fn exceeds_tolerance(&self, tolerance: usize) -> bool {
        self.failed() > tolerance
    }

    pub fn log_summary(&self) {
        info!(
            snapshot = %self.snapshot_date,
            targets = self.targets,
            created = self.outcomes.created,
            upserted = self.outcomes.upserted,
            skipped = self.outcomes.skipped_exists,
            failed = self.outcomes.failed,
            rows_written = self.rows.created + self.rows.upserted,
            elapsed_seconds = self.elapsed_seconds,
            "Run finished"
        );
        for failure in &self.failures {
            warn!(
                target = %failure.target,
                category = %failure.category,
                "{}",
                failure.message
            );
        }
    }

    /// Plain-text summary table.
    pub fn render_table(&self) -> String {
        let mut lines = vec![
            format!(
                "Harvest {} finished in {:.1}s: {} targets",
                self.snapshot_date, self.elapsed_seconds, self.targets
            ),
            format!(
                "{:<12} {:>8} {:>8} {:>8} {:>8}",
                "Kind", "Created", "Upserted", "Skipped", "Failed"
            ),
        ];
        for (kind, counts) in &self.by_kind {
            lines.push(format!(
                "{:<12} {:>8} {:>8} {:>8} {:>8}",
                kind.as_str(),
                counts.created,
                counts.upserted,
                counts.skipped_exists,
                counts.failed
            ));
        }
        lines.push(format!(
            "{:<12} {:>8} {:>8} {:>8} {:>8}",
            "Total",
            self.outcomes.created,
            self.outcomes.upserted,
            self.outcomes.skipped_exists,
            self.outcomes.failed
        ));
        lines.push(format!(
            "Rows: {} created, {} upserted, {} skipped, {} failed",
            self.rows.created, self.rows.upserted, self.rows.skipped, self.rows.failed
        ));
        for failure in &self.failures {
            lines.push(format!("  FAILED {} [{}]: {}", failure.target, failure.category, failure.message));
        }
        lines.join("\n")
    }

    pub fn print_summary(&self) {
        println!("{}", self.render_table());
    }

    pub fn to_json(&self) -> Result<String, AppError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub async fn write_json(&self, path: &str) -> Result<(), AppError> {
        if let Some(parent) = std::path::Path::new(path).parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, self.to_json()?).await?;
        info!("Run report written to {path}");
        Ok(())
    }
}
