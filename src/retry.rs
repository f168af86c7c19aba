//! Bounded retry with exponential backoff, configured per operation phase.

use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::StorageHandlerSettings;
use crate::constants::retry::{BASE_DELAY_MS, MAX_DELAY_MS};
use crate::error::ScrapeError;

/// Operation class a retry budget belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Phase {
    /// Writing rows to the table store.
    Creation,
    /// Reading from the game API (and existence probes).
    Extraction,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Creation => f.write_str("creation"),
            Phase::Extraction => f.write_str("extraction"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub phase: Phase,
    pub enabled: bool,
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(phase: Phase, enabled: bool, max_attempts: u32) -> Self {
        RetryPolicy {
            phase,
            enabled,
            max_attempts,
            base_delay: Duration::from_millis(BASE_DELAY_MS),
            max_delay: Duration::from_millis(MAX_DELAY_MS),
        }
    }

    pub fn with_delays(mut self, base_delay: Duration, max_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self.max_delay = max_delay.max(base_delay);
        self
    }

    /// Builds the creation and extraction policies from the handler settings.
    pub fn from_settings(settings: &StorageHandlerSettings) -> (RetryPolicy, RetryPolicy) {
        let base = Duration::from_millis(settings.retry_base_delay_ms);
        let max = Duration::from_millis(settings.retry_max_delay_ms);
        let creation = RetryPolicy::new(
            Phase::Creation,
            settings.retry_entity_creation_enabled,
            settings.retry_entity_creation_count,
        )
        .with_delays(base, max);
        let extraction = RetryPolicy::new(
            Phase::Extraction,
            settings.retry_entity_extraction_enabled,
            settings.retry_entity_extraction_count,
        )
        .with_delays(base, max);
        (creation, extraction)
    }

    /// Total number of calls the policy allows. A disabled policy allows one.
    pub fn effective_attempts(&self) -> u32 {
        if self.enabled {
            self.max_attempts.max(1)
        } else {
            1
        }
    }

    /// Delay before attempt `failed_attempt + 1`: base * 2^(failed_attempt - 1), capped.
    pub fn backoff_delay(&self, failed_attempt: u32) -> Duration {
        let exponent = failed_attempt.saturating_sub(1).min(31);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }
}

/// Runs `operation` under `policy`.
///
/// This function:
/// - Returns non-retryable errors unchanged after the first failure
/// - Retries transient and rate-limited failures until the budget is spent
/// - Waits at least the upstream `Retry-After` hint between attempts, even
///   when the hint is longer than the policy's backoff cap
///
/// # Arguments
/// * `policy` - Attempt budget and backoff delays for the operation's phase
/// * `operation` - Closure receiving the 1-based attempt number
///
/// # Returns
/// * `Ok(T)` - Result of the first successful attempt
/// * `Err(ScrapeError::RetriesExhausted)` - Every allowed attempt failed with a retryable error
/// * `Err(ScrapeError)` - The first non-retryable error
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, mut operation: F) -> Result<T, ScrapeError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, ScrapeError>>,
{
    let attempts = policy.effective_attempts();
    let mut attempt = 1u32;

    loop {
        let error = match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };

        if !error.is_retryable() {
            debug!(phase = %policy.phase, attempt, "Non-retryable failure: {error}");
            return Err(error);
        }

        if attempt >= attempts {
            warn!(phase = %policy.phase, attempt, "Retries exhausted: {error}");
            return Err(ScrapeError::RetriesExhausted {
                phase: policy.phase,
                attempts,
                last: Box::new(error),
            });
        }

        let backoff = policy.backoff_delay(attempt);
        let wait = error.retry_after().map_or(backoff, |hint| hint.max(backoff));
        warn!(
            phase = %policy.phase,
            attempt,
            "Transient failure, retrying in {:?} ({}/{}): {error}",
            wait,
            attempt + 1,
            attempts
        );
        tokio::time::sleep(wait).await;
        attempt += 1;
    }
}
