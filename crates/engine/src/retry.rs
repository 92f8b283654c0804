//! Retry policy: classifies failed attempts and computes backoff delays.

use std::time::Duration;

use crate::error::ErrorClass;

/// Outcome of consulting the policy after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryDecision {
    pub retry: bool,
    pub delay: Duration,
}

impl RetryDecision {
    fn give_up() -> Self {
        Self {
            retry: false,
            delay: Duration::ZERO,
        }
    }
}

/// Per-chunk retry configuration.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum retries per chunk after the first attempt.
    pub max_retries: u32,
    /// Base delay for the exponential schedule.
    pub base_delay: Duration,
    /// Multiplier per subsequent attempt.
    pub backoff_factor: f64,
    /// Backoff cap.
    pub max_delay: Duration,
    /// Delay range for ordering conflicts. These stem from benign
    /// parallel-write races at the remote and resolve quickly, so they get
    /// a short uniform delay instead of the exponential schedule.
    pub conflict_delay_min: Duration,
    pub conflict_delay_max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            backoff_factor: 1.5,
            max_delay: Duration::from_secs(10),
            conflict_delay_min: Duration::from_millis(100),
            conflict_delay_max: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Decides whether the chunk should be retried after `attempt`
    /// (1-based, the attempt that just failed) and with what delay.
    ///
    /// Interruptions for pause or cancel never reach this policy: they
    /// re-queue the chunk without consuming an attempt.
    pub fn decide(&self, class: ErrorClass, attempt: u32) -> RetryDecision {
        if !class.is_retryable() {
            return RetryDecision::give_up();
        }
        // `attempt - 1` retries are already spent.
        if attempt > self.max_retries {
            return RetryDecision::give_up();
        }
        RetryDecision {
            retry: true,
            delay: self.delay_for(class, attempt),
        }
    }

    fn delay_for(&self, class: ErrorClass, attempt: u32) -> Duration {
        if class == ErrorClass::OrderingConflict {
            let lo = self.conflict_delay_min.as_secs_f64();
            let hi = self.conflict_delay_max.as_secs_f64();
            let mid = (lo + hi) / 2.0;
            let span = (hi - lo) / 2.0;
            return Duration::from_secs_f64(mid + span * unit_jitter());
        }

        let exp = attempt.saturating_sub(1).min(63) as i32;
        let mut secs = self.base_delay.as_secs_f64() * self.backoff_factor.powi(exp);
        if class == ErrorClass::RateLimited {
            // The remote asked us to slow down; back off harder.
            secs *= 2.0;
        }
        let capped = secs.min(self.max_delay.as_secs_f64());
        // ±25% jitter to avoid lockstep retries.
        let with_jitter = (capped + capped * 0.25 * unit_jitter()).max(0.05);
        Duration::from_secs_f64(with_jitter.min(self.max_delay.as_secs_f64()))
    }
}

/// Cheap jitter source in `[-1.0, 1.0)`, derived from the clock's
/// sub-second nanos.
fn unit_jitter() -> f64 {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    (nanos as f64 / u32::MAX as f64) * 2.0 - 1.0
}
