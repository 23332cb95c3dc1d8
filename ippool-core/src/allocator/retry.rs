use std::time::Duration;

use backoff::{backoff::Backoff, ExponentialBackoff};
use derive_builder::Builder;

/// How often and how far apart conflicting status writes are repeated.
#[derive(Debug, Clone, PartialEq, Builder)]
#[builder(default)]
pub struct RetryPolicy {
    /// total number of read-modify-write attempts, the first one included
    pub attempts: u32,
    pub initial_backoff: Duration,
    /// multiplier applied to the delay after every attempt, `1.0` keeps it constant
    pub factor: f64,
    /// fraction of the delay added or subtracted at random
    pub jitter: f64,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            initial_backoff: Duration::from_millis(10),
            factor: 1.0,
            jitter: 0.1,
            max_backoff: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Delay sequence for one operation. The attempt count and the operation deadline bound
    /// the retries, so the sequence itself never runs out.
    pub fn backoff(&self) -> RetryDelays {
        let initial = self.initial_backoff.min(self.max_backoff);
        let multiplier = if self.factor.is_nan() {
            1.0
        } else {
            self.factor.max(1.0)
        };
        let randomization_factor = if self.jitter.is_finite() {
            self.jitter.clamp(0.0, 1.0)
        } else {
            0.0
        };

        RetryDelays {
            inner: ExponentialBackoff {
                current_interval: initial,
                initial_interval: initial,
                randomization_factor,
                multiplier,
                max_interval: self.max_backoff,
                max_elapsed_time: None,
                ..ExponentialBackoff::default()
            },
        }
    }
}

/// Delays between consecutive attempts of a single operation.
#[derive(Debug)]
pub struct RetryDelays {
    inner: ExponentialBackoff,
}

impl RetryDelays {
    /// Returns the next delay and advances the sequence.
    pub fn next_delay(&mut self) -> Duration {
        self.inner
            .next_backoff()
            .unwrap_or(self.inner.max_interval)
    }
}
