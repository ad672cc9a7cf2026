//! Retry logic for device requests.
//!
//! The controller's embedded web server occasionally drops a request while it
//! is busy updating its display or handling another client. Reads are wrapped
//! in a short retry loop so a single dropped request does not null out a
//! channel for the whole cycle.
//!
//! # Example
//!
//! ```
//! use atmolog_core::{Error, RetryConfig, with_retry};
//!
//! # async fn example() -> Result<(), Error> {
//! let config = RetryConfig::for_read();
//! let value = with_retry(&config, "query TempSet", || async { Ok::<_, Error>(37.0) }).await?;
//! assert_eq!(value, 37.0);
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (0 means no retries).
    pub max_retries: u32,
    /// Initial delay between retries.
    pub initial_delay: Duration,
    /// Maximum delay between retries (for exponential backoff).
    pub max_delay: Duration,
    /// Backoff multiplier (1.0 = constant delay, 2.0 = double each time).
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(2),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Create a new retry config with custom settings.
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Default::default()
        }
    }

    /// No retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Retry configuration for key queries.
    ///
    /// A whole cycle issues a dozen or so queries, each bounded by the request
    /// timeout, so retries stay few and short to keep the cycle well inside the
    /// external timer's cadence.
    pub fn for_read() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }

    /// Retry configuration for setpoint writes.
    ///
    /// Writes are idempotent on the controller, so retrying a write whose
    /// response was lost is harmless.
    pub fn for_write() -> Self {
        Self {
            max_retries: 1,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(2),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }

    /// Minimal retries with very short delays and no jitter.
    pub fn quick() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_millis(20),
            max_delay: Duration::from_millis(100),
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }

    /// Set maximum number of retries.
    #[must_use]
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Set initial delay.
    #[must_use]
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set maximum delay.
    #[must_use]
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Enable or disable jitter.
    #[must_use]
    pub fn jitter(mut self, enabled: bool) -> Self {
        self.jitter = enabled;
        self
    }

    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32);
        let capped = base.min(self.max_delay.as_secs_f64());

        let delay = if self.jitter {
            // up to 25% extra
            capped * (1.0 + rand::rng().random::<f64>() * 0.25)
        } else {
            capped
        };

        Duration::from_secs_f64(delay)
    }
}

/// Execute an async operation, retrying transient failures.
///
/// Non-transient errors (see [`Error::is_transient`]) are returned
/// immediately. When all attempts fail, the last error is returned.
pub async fn with_retry<F, Fut, T>(
    config: &RetryConfig,
    operation_name: &str,
    operation: F,
) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    debug!("{} succeeded after {} retries", operation_name, attempt);
                }
                return Ok(result);
            }
            Err(e) if !e.is_transient() || attempt >= config.max_retries => return Err(e),
            Err(e) => {
                let delay = config.delay_for_attempt(attempt);
                warn!(
                    "{} failed (attempt {}/{}): {}; retrying in {:?}",
                    operation_name,
                    attempt + 1,
                    config.max_retries + 1,
                    e,
                    delay
                );
                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_retry_config_none() {
        assert_eq!(RetryConfig::none().max_retries, 0);
    }

    #[test]
    fn test_delay_calculation() {
        let config = RetryConfig::new(5)
            .initial_delay(Duration::from_millis(100))
            .max_delay(Duration::from_secs(1))
            .jitter(false);

        assert_eq!(config.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(400));
        // capped
        assert_eq!(config.delay_for_attempt(5), Duration::from_secs(1));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let config = RetryConfig::new(1).initial_delay(Duration::from_millis(100));
        for _ in 0..50 {
            let d = config.delay_for_attempt(0);
            assert!(d >= Duration::from_millis(100));
            assert!(d <= Duration::from_millis(125));
        }
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_transient_failures() {
        let counter = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&counter);

        let result = with_retry(&RetryConfig::quick(), "query", || {
            let c = Arc::clone(&c);
            async move {
                if c.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(Error::unreachable("http://device/atmoweb", "refused"))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_exhausted_returns_last_error() {
        let counter = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&counter);

        let result: Result<()> = with_retry(&RetryConfig::quick(), "query", || {
            let c = Arc::clone(&c);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(Error::timeout("query", Duration::from_millis(1)))
            }
        })
        .await;

        assert!(matches!(result, Err(Error::Timeout { .. })));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_transient_error_not_retried() {
        let counter = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&counter);

        let result: Result<()> = with_retry(&RetryConfig::quick(), "query", || {
            let c = Arc::clone(&c);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(Error::InvalidResponse("not json".to_string()))
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
