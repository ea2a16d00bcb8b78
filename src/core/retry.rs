/*!
 * Per-part retry decisions and backoff
 */

use hauler_core_interface::StoreError;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;

/// Decides whether a failed part request should be tried again
///
/// Closures `Fn(&StoreError) -> bool` implement this trait.
pub trait ShouldRetry: Send + Sync {
    fn should_retry(&self, error: &StoreError) -> bool;
}

impl<F> ShouldRetry for F
where
    F: Fn(&StoreError) -> bool + Send + Sync,
{
    fn should_retry(&self, error: &StoreError) -> bool {
        self(error)
    }
}

/// Retries network, timeout, body-read and throttling errors
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultRetryDecider;

impl ShouldRetry for DefaultRetryDecider {
    fn should_retry(&self, error: &StoreError) -> bool {
        error.is_retryable()
    }
}

/// Never retries
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRetry;

impl ShouldRetry for NoRetry {
    fn should_retry(&self, _error: &StoreError) -> bool {
        false
    }
}

pub fn default_decider() -> Arc<dyn ShouldRetry> {
    Arc::new(DefaultRetryDecider)
}

/// Exponential backoff with jitter
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Random extra delay as a fraction of the computed delay (0.0-1.0)
    pub jitter_factor: f64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(20),
            jitter_factor: 0.3,
        }
    }
}

impl Backoff {
    pub fn new(initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            initial_delay,
            max_delay,
            ..Default::default()
        }
    }

    /// Delay before retry number `attempt` (1-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        let multiplier = 2_u32.saturating_pow(attempt.saturating_sub(1));
        let capped = self
            .initial_delay
            .saturating_mul(multiplier)
            .min(self.max_delay);

        if self.jitter_factor <= 0.0 || capped.is_zero() {
            return capped;
        }
        let jitter = rand::rng().random_range(0.0..self.jitter_factor);
        capped + Duration::from_secs_f64(capped.as_secs_f64() * jitter)
    }
}
