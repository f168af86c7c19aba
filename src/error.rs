use std::time::Duration;
use thiserror::Error;

use crate::pipeline::EntityKind;
use crate::retry::Phase;

/// Process-level errors: anything that prevents a run from starting or
/// that decides the exit status once it has finished.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("TOML deserialization error: {0}")]
    TomlDeserialize(#[from] toml::de::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Credentials error: {0}")]
    Credentials(String),

    #[error("Game data error: {0}")]
    GameData(String),

    #[error("Log setup error: {0}")]
    LogSetup(String),

    #[error("Storage setup failed: {0}")]
    Storage(#[from] StorageError),

    #[error("Upstream session failed: {0}")]
    Upstream(#[from] FetchError),

    #[error("Run failed: {failed} failed targets exceed the tolerance of {tolerance}")]
    RunFailed { failed: usize, tolerance: usize },
}

impl AppError {
    /// Create a configuration error with context
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a credentials error with context
    pub fn credentials_error(msg: impl Into<String>) -> Self {
        Self::Credentials(msg.into())
    }

    /// Create a game data error with context
    pub fn game_data_error(msg: impl Into<String>) -> Self {
        Self::GameData(msg.into())
    }

    /// Create a log setup error with context
    pub fn log_setup_error(msg: impl Into<String>) -> Self {
        Self::LogSetup(msg.into())
    }

    /// Create a run failure for the exit status
    pub fn run_failed(failed: usize, tolerance: usize) -> Self {
        Self::RunFailed { failed, tolerance }
    }
}

/// Failures of a single upstream call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("Upstream resource not found: {resource}")]
    NotFound { resource: String },

    #[error("Upstream rate limit exceeded (429): {resource}")]
    RateLimited {
        resource: String,
        retry_after: Option<Duration>,
    },

    #[error("Transient upstream failure: {message} ({resource})")]
    Transient { resource: String, message: String },

    #[error("Upstream credentials rejected or expired: {resource}")]
    AuthExpired { resource: String },

    #[error("Upstream returned an undecodable body: {message} ({resource})")]
    Malformed { resource: String, message: String },
}

impl FetchError {
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    pub fn rate_limited(resource: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Self::RateLimited {
            resource: resource.into(),
            retry_after,
        }
    }

    pub fn transient(resource: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transient {
            resource: resource.into(),
            message: message.into(),
        }
    }

    pub fn auth_expired(resource: impl Into<String>) -> Self {
        Self::AuthExpired {
            resource: resource.into(),
        }
    }

    pub fn malformed(resource: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Malformed {
            resource: resource.into(),
            message: message.into(),
        }
    }
}

/// Records that cannot be turned into table rows.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{kind} record carries the null identifier and null-id scraping is disabled")]
    NullIdRejected { kind: EntityKind },

    #[error("{kind} record does not fit the table schema: {message}")]
    SchemaMismatch { kind: EntityKind, message: String },
}

impl ValidationError {
    pub fn schema_mismatch(kind: EntityKind, message: impl Into<String>) -> Self {
        Self::SchemaMismatch {
            kind,
            message: message.into(),
        }
    }
}

/// Failures of a single table storage call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    #[error("Entity {partition_key}/{row_key} already exists in table {table}")]
    Conflict {
        table: String,
        partition_key: String,
        row_key: String,
    },

    #[error("Transient storage failure on table {table}: {message}")]
    Transient { table: String, message: String },

    #[error("Storage rejected credentials for table {table} ({status})")]
    Unauthorized { table: String, status: u16 },

    #[error("Storage rejected request on table {table} ({status}): {message}")]
    Rejected {
        table: String,
        status: u16,
        message: String,
    },
}

impl StorageError {
    pub fn transient(table: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transient {
            table: table.into(),
            message: message.into(),
        }
    }
}

/// Run-global timeouts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimeoutError {
    #[error("Run budget of {budget:?} exceeded before the target finished")]
    RunBudgetExceeded { budget: Duration },
}

/// Everything that can end a single target's pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScrapeError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Timeout(#[from] TimeoutError),

    #[error("Worker aborted: {reason}")]
    Aborted { reason: String },

    #[error("{phase} retries exhausted after {attempts} attempt(s): {last}")]
    RetriesExhausted {
        phase: Phase,
        attempts: u32,
        last: Box<ScrapeError>,
    },
}

impl ScrapeError {
    /// Check if the error is worth another attempt (network issues, 5xx, rate limits)
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ScrapeError::Fetch(FetchError::Transient { .. })
                | ScrapeError::Fetch(FetchError::RateLimited { .. })
                | ScrapeError::Storage(StorageError::Transient { .. })
        )
    }

    /// Upstream hint for how long to wait before the next attempt
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ScrapeError::Fetch(FetchError::RateLimited { retry_after, .. }) => *retry_after,
            _ => None,
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, ScrapeError::Storage(StorageError::Conflict { .. }))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ScrapeError::Timeout(_))
    }

    /// Short machine-friendly category used in reports
    pub fn category(&self) -> &'static str {
        match self {
            ScrapeError::Fetch(FetchError::NotFound { .. }) => "not_found",
            ScrapeError::Fetch(FetchError::RateLimited { .. }) => "rate_limited",
            ScrapeError::Fetch(FetchError::Transient { .. }) => "fetch_transient",
            ScrapeError::Fetch(FetchError::AuthExpired { .. }) => "auth_expired",
            ScrapeError::Fetch(FetchError::Malformed { .. }) => "malformed",
            ScrapeError::Validation(ValidationError::NullIdRejected { .. }) => "null_id_rejected",
            ScrapeError::Validation(ValidationError::SchemaMismatch { .. }) => "schema_mismatch",
            ScrapeError::Storage(StorageError::Conflict { .. }) => "conflict",
            ScrapeError::Storage(StorageError::Transient { .. }) => "storage_transient",
            ScrapeError::Storage(StorageError::Unauthorized { .. }) => "unauthorized",
            ScrapeError::Storage(StorageError::Rejected { .. }) => "storage_rejected",
            ScrapeError::Timeout(_) => "timeout",
            ScrapeError::Aborted { .. } => "aborted",
            ScrapeError::RetriesExhausted { .. } => "retries_exhausted",
        }
    }
}
