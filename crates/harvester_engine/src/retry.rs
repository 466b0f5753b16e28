use std::future::Future;
use std::time::Duration;

use harvest_logging::harvest_warn;

use crate::{Attempt, FailureKind, FetchError};

/// Bounded exponential backoff: attempt `n` waits `base_delay * 2^n` before the next one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Runs `op` until it succeeds, fails terminally, or the policy is exhausted.
///
/// The closure receives the zero-based attempt number. The last retryable
/// error is returned when every attempt failed.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut op: F,
) -> Result<T, FetchError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Attempt<T>>,
{
    let attempts = policy.attempts.max(1);
    let mut last = FetchError::new(FailureKind::Network, "no attempt made");
    for attempt in 0..attempts {
        match op(attempt).await {
            Attempt::Success(value) => return Ok(value),
            Attempt::Terminal(err) => return Err(err),
            Attempt::Retryable(err) => {
                harvest_warn!(
                    "{label}: attempt {}/{attempts} failed: {err}",
                    attempt + 1
                );
                last = err;
                if attempt + 1 < attempts {
                    tokio::time::sleep(policy.delay_for(attempt)).await;
                }
            }
        }
    }
    Err(last)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn quick(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        }
    }

    #[test]
    fn delay_doubles_and_is_capped() {
        let policy = RetryPolicy {
            attempts: 5,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(10),
        };
        assert_eq!(policy.delay_for(0), Duration::from_secs(2));
        assert_eq!(policy.delay_for(1), Duration::from_secs(4));
        assert_eq!(policy.delay_for(2), Duration::from_secs(8));
        assert_eq!(policy.delay_for(3), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn retries_until_success() {
        let calls = AtomicU32::new(0);
        let value = retry_with_backoff(&quick(3), "test", |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 2 {
                    Attempt::Retryable(FetchError::new(FailureKind::Timeout, "slow"))
                } else {
                    Attempt::Success(attempt)
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(value, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn terminal_failure_stops_immediately() {
        let calls = AtomicU32::new(0);
        let err = retry_with_backoff::<(), _, _>(&quick(5), "test", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Attempt::Terminal(FetchError::new(FailureKind::HttpStatus(404), "gone")) }
        })
        .await
        .unwrap_err();
        assert_eq!(err.kind, FailureKind::HttpStatus(404));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhaustion_returns_last_error() {
        let err = retry_with_backoff::<(), _, _>(&quick(2), "test", |attempt| async move {
            Attempt::Retryable(FetchError::new(
                FailureKind::HttpStatus(500 + attempt as u16),
                "busy",
            ))
        })
        .await
        .unwrap_err();
        assert_eq!(err.kind, FailureKind::HttpStatus(501));
    }
}
