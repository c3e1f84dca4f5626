//! Transport-level retry for Jira API calls
//!
//! Every request the [`JiraAdapter`](super::JiraAdapter) issues goes through
//! [`with_retry`]. Connection failures, timeouts and 5xx answers are retried
//! with exponential backoff; 429 answers wait for the advertised delay. Once
//! the budget is spent the last error is returned and the job runner treats it
//! as permanent.

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (not including the initial attempt)
    pub max_retries: u32,

    /// Initial backoff duration
    pub initial_backoff: Duration,

    /// Maximum backoff duration
    pub max_backoff: Duration,

    /// Backoff multiplier
    pub multiplier: f64,

    /// Add up to 25% random jitter
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Backoff before retry number `attempt` (0-based)
    pub fn backoff_duration(&self, attempt: u32) -> Duration {
        let base = self.initial_backoff.as_secs_f64() * self.multiplier.powi(attempt as i32);
        let capped = base.min(self.max_backoff.as_secs_f64());

        let secs = if self.jitter {
            capped * (1.0 + jitter_fraction() * 0.25)
        } else {
            capped
        };

        Duration::from_secs_f64(secs)
    }
}

/// Pseudo-random fraction in [0, 1) taken from the clock's sub-second nanos
fn jitter_fraction() -> f64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    f64::from(nanos % 1000) / 1000.0
}

/// Retry classification for errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the configured backoff
    Retry,
    /// Retry after a specific duration (Retry-After header)
    RetryAfter(Duration),
    /// Permanent error
    NoRetry,
}

/// Errors that know whether the transport call should be attempted again
pub trait RetryableError {
    fn retry_decision(&self) -> RetryDecision;
}

/// Execute an async operation, retrying transient failures
pub async fn with_retry<F, Fut, T, E>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: RetryableError + std::fmt::Display,
{
    let mut attempt = 0;

    loop {
        let err = match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => e,
        };

        let backoff = match err.retry_decision() {
            RetryDecision::NoRetry => {
                debug!(operation = operation_name, attempt, error = %err, "Non-retryable failure");
                return Err(err);
            }
            RetryDecision::Retry => config.backoff_duration(attempt),
            RetryDecision::RetryAfter(d) => d.min(config.max_backoff),
        };

        if attempt >= config.max_retries {
            warn!(
                operation = operation_name,
                attempts = attempt + 1,
                error = %err,
                "Giving up after retries"
            );
            return Err(err);
        }

        warn!(
            operation = operation_name,
            attempt = attempt + 1,
            max_attempts = config.max_retries + 1,
            backoff_ms = backoff.as_millis() as u64,
            error = %err,
            "Retrying Jira call"
        );
        sleep(backoff).await;
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_backoff_is_capped() {
        let config = RetryConfig {
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(10),
            multiplier: 2.0,
            jitter: false,
            ..Default::default()
        };

        assert_eq!(config.backoff_duration(0), Duration::from_secs(1));
        assert_eq!(config.backoff_duration(2), Duration::from_secs(4));
        assert_eq!(config.backoff_duration(5), Duration::from_secs(10));
    }

    #[test]
    fn test_jitter_stays_within_a_quarter() {
        let config = RetryConfig {
            initial_backoff: Duration::from_secs(2),
            jitter: true,
            ..Default::default()
        };
        let backoff = config.backoff_duration(0);
        assert!(backoff >= Duration::from_secs(2));
        assert!(backoff <= Duration::from_millis(2500));
    }

    #[derive(Debug)]
    struct Flaky(bool);

    impl std::fmt::Display for Flaky {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "flaky(transient={})", self.0)
        }
    }

    impl RetryableError for Flaky {
        fn retry_decision(&self) -> RetryDecision {
            if self.0 {
                RetryDecision::Retry
            } else {
                RetryDecision::NoRetry
            }
        }
    }

    fn fast() -> RetryConfig {
        RetryConfig {
            max_retries: 2,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
            jitter: false,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let calls = Cell::new(0);
        let result: Result<u32, Flaky> = with_retry(&fast(), "read_issue", || {
            calls.set(calls.get() + 1);
            let n = calls.get();
            async move {
                if n < 3 {
                    Err(Flaky(true))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.ok(), Some(3));
    }

    #[tokio::test]
    async fn test_budget_exhaustion_returns_last_error() {
        let calls = Cell::new(0);
        let result: Result<(), Flaky> = with_retry(&fast(), "search", || {
            calls.set(calls.get() + 1);
            async { Err(Flaky(true)) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.get(), 3);
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let calls = Cell::new(0);
        let result: Result<(), Flaky> = with_retry(&fast(), "read_issue", || {
            calls.set(calls.get() + 1);
            async { Err(Flaky(false)) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.get(), 1);
    }
}
