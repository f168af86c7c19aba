//! Per-target pipeline and the bounded worker pool that drives it.
//!
//! A [`ScrapeTarget`] enters the pool once and leaves as exactly one
//! [`ScrapeOutcome`]. Everything in between (probe, fetch, normalize, commit)
//! lives in [`worker`]; scheduling, the run budget and outcome collection live
//! in [`pool`].

pub mod pool;
pub mod worker;

pub use pool::WorkerPool;
pub use worker::PipelineContext;

use crate::error::ScrapeError;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityKind {
    Troop,
    GoldPass,
    PlayerTroop,
    Player,
    Clan,
    Location,
}

impl EntityKind {
    pub const ALL: [EntityKind; 6] = [
        EntityKind::Troop,
        EntityKind::GoldPass,
        EntityKind::PlayerTroop,
        EntityKind::Player,
        EntityKind::Clan,
        EntityKind::Location,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Troop => "Troop",
            EntityKind::GoldPass => "GoldPass",
            EntityKind::PlayerTroop => "PlayerTroop",
            EntityKind::Player => "Player",
            EntityKind::Clan => "Clan",
            EntityKind::Location => "Location",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of work for the pool. Immutable once enqueued.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ScrapeTarget {
    pub kind: EntityKind,
    /// Tag or id; `None` means "everything of this kind" (troop categories, gold pass).
    pub identifier: Option<String>,
    pub category: Option<String>,
}

impl ScrapeTarget {
    pub fn troop_category(category: impl Into<String>) -> Self {
        ScrapeTarget {
            kind: EntityKind::Troop,
            identifier: None,
            category: Some(category.into()),
        }
    }

    pub fn gold_pass() -> Self {
        ScrapeTarget {
            kind: EntityKind::GoldPass,
            identifier: None,
            category: None,
        }
    }

    pub fn player(tag: impl Into<String>) -> Self {
        Self::identified(EntityKind::Player, tag)
    }

    pub fn player_troops(tag: impl Into<String>) -> Self {
        Self::identified(EntityKind::PlayerTroop, tag)
    }

    pub fn clan(tag: impl Into<String>) -> Self {
        Self::identified(EntityKind::Clan, tag)
    }

    pub fn location(id: impl Into<String>) -> Self {
        Self::identified(EntityKind::Location, id)
    }

    fn identified(kind: EntityKind, identifier: impl Into<String>) -> Self {
        ScrapeTarget {
            kind,
            identifier: Some(identifier.into()),
            category: None,
        }
    }
}

impl fmt::Display for ScrapeTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.identifier, &self.category) {
            (Some(id), _) => write!(f, "{}({id})", self.kind),
            (None, Some(category)) => write!(f, "{}[{category}]", self.kind),
            (None, None) => write!(f, "{}", self.kind),
        }
    }
}

/// Terminal state of a single target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutcomeStatus {
    Created,
    Upserted,
    SkippedExists,
    Failed(ScrapeError),
}

impl OutcomeStatus {
    pub fn label(&self) -> &'static str {
        match self {
            OutcomeStatus::Created => "Created",
            OutcomeStatus::Upserted => "Upserted",
            OutcomeStatus::SkippedExists => "SkippedExists",
            OutcomeStatus::Failed(_) => "Failed",
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, OutcomeStatus::Failed(_))
    }
}

/// Rows written (or not) while processing one target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RowCounts {
    pub created: usize,
    pub upserted: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl RowCounts {
    pub fn total(&self) -> usize {
        self.created + self.upserted + self.skipped + self.failed
    }

    pub fn add(&mut self, other: &RowCounts) {
        self.created += other.created;
        self.upserted += other.upserted;
        self.skipped += other.skipped;
        self.failed += other.failed;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrapeOutcome {
    pub target: ScrapeTarget,
    pub status: OutcomeStatus,
    pub rows: RowCounts,
}

impl ScrapeOutcome {
    pub fn failed(target: ScrapeTarget, reason: ScrapeError) -> Self {
        ScrapeOutcome {
            target,
            status: OutcomeStatus::Failed(reason),
            rows: RowCounts::default(),
        }
    }

    pub fn skipped_before_fetch(target: ScrapeTarget) -> Self {
        ScrapeOutcome {
            target,
            status: OutcomeStatus::SkippedExists,
            rows: RowCounts {
                skipped: 1,
                ..RowCounts::default()
            },
        }
    }
}
