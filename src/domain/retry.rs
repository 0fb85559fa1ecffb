//! Retry policy shared by every remote storage client

use std::time::Duration;

use rand::Rng;

/// Maximum number of retries for storage client requests
pub const STORAGE_CLIENT_MAX_RETRIES: u32 = 10;

/// Base backoff unit for storage client requests
pub const STORAGE_CLIENT_MIN_BACKOFF: Duration = Duration::from_millis(500);

/// Upper bound for a single backoff
pub const STORAGE_CLIENT_MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Relative jitter applied to each backoff
pub const STORAGE_CLIENT_JITTER: f64 = 0.2;

/// Exponential backoff policy with bounded retries and randomized jitter
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_retries: u32,
    min_backoff: Duration,
    max_backoff: Duration,
    jitter: f64,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, min_backoff: Duration, max_backoff: Duration, jitter: f64) -> Self {
        Self {
            max_retries,
            min_backoff,
            max_backoff: max_backoff.max(min_backoff),
            jitter: jitter.clamp(0.0, 1.0),
        }
    }

    /// The fixed policy every remote blob, table and queue client is built with
    pub fn for_storage_client() -> Self {
        Self::new(
            STORAGE_CLIENT_MAX_RETRIES,
            STORAGE_CLIENT_MIN_BACKOFF,
            STORAGE_CLIENT_MAX_BACKOFF,
            STORAGE_CLIENT_JITTER,
        )
    }

    /// A policy that never retries
    pub fn no_retry() -> Self {
        Self::new(0, Duration::ZERO, Duration::ZERO, 0.0)
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn min_backoff(&self) -> Duration {
        self.min_backoff
    }

    pub fn max_backoff(&self) -> Duration {
        self.max_backoff
    }

    pub fn jitter(&self) -> f64 {
        self.jitter
    }

    /// Whether a request that already failed `attempt + 1` times may be retried
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }

    /// Backoff before retry `attempt` (0-indexed) without jitter
    pub fn nominal_delay(&self, attempt: u32) -> Duration {
        let factor = 2f64.powi(attempt.min(62) as i32);
        let delay = self.min_backoff.as_secs_f64() * factor;
        Duration::from_secs_f64(delay.min(self.max_backoff.as_secs_f64()))
    }

    /// Backoff before retry `attempt` (0-indexed) with jitter applied
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let nominal = self.nominal_delay(attempt).as_secs_f64();

        if self.jitter == 0.0 || nominal == 0.0 {
            return Duration::from_secs_f64(nominal);
        }

        let factor = rand::thread_rng().gen_range((1.0 - self.jitter)..=(1.0 + self.jitter));
        let delay = (nominal * factor).min(self.max_backoff.as_secs_f64());
        Duration::from_secs_f64(delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::for_storage_client()
    }
}
