//! Client-side request spacing shared by every worker.

use rand::Rng;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Hands out request slots at least `spacing` (+/- jitter) apart.
///
/// Callers reserve the next slot under a short lock and sleep outside it, so
/// a slow sleeper never blocks others from reserving later slots.
#[derive(Debug)]
pub struct Throttle {
    spacing: Duration,
    jitter_fraction: f64,
    next_slot: Mutex<Option<Instant>>,
}

impl Throttle {
    pub fn new(spacing: Duration, jitter_fraction: f64) -> Self {
        Throttle {
            spacing,
            jitter_fraction: jitter_fraction.clamp(0.0, 1.0),
            next_slot: Mutex::new(None),
        }
    }

    pub fn disabled() -> Self {
        Self::new(Duration::ZERO, 0.0)
    }

    /// Waits until the caller may issue its request.
    pub async fn acquire(&self) {
        if self.spacing.is_zero() {
            return;
        }

        let slot = {
            let mut next = self.next_slot.lock().await;
            let now = Instant::now();
            let slot = match *next {
                Some(reserved) if reserved > now => reserved,
                _ => now,
            };
            *next = Some(slot + self.jittered_spacing());
            slot
        };

        tokio::time::sleep_until(slot).await;
    }

    fn jittered_spacing(&self) -> Duration {
        if self.jitter_fraction <= 0.0 {
            return self.spacing;
        }
        let factor = rand::rng().random_range(1.0 - self.jitter_fraction..=1.0 + self.jitter_fraction);
        self.spacing.mul_f64(factor)
    }
}
