//! Bounded fixed-interval retry for network calls.
//!
//! No exponential backoff, no jitter: attempt, sleep a fixed interval on a
//! retryable outcome, re-attempt, up to a deterministic maximum, then fail
//! the run. The loop is not cancellable mid-flight.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::config::RunConfig;
use crate::error::DistributionError;

/// One attempt's verdict: finished with a value, or retry with a reason.
#[derive(Debug)]
pub enum Attempt<T> {
    Done(T),
    Retry(String),
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub sleep: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, sleep_seconds: u64) -> Self {
        Self {
            max_attempts,
            sleep: Duration::from_secs(sleep_seconds),
        }
    }

    pub fn from_config(config: &RunConfig) -> Self {
        Self::new(config.max_attempts, config.sleep_seconds)
    }
}

/// Run `attempt_fn` until it returns [`Attempt::Done`], a hard error, or
/// the attempt budget is spent. Exhaustion is fatal for the run.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    mut attempt_fn: F,
) -> anyhow::Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<Attempt<T>>>,
{
    let mut last_outcome = String::new();
    for attempt in 1..=policy.max_attempts {
        match attempt_fn().await? {
            Attempt::Done(value) => return Ok(value),
            Attempt::Retry(reason) => {
                warn!(
                    operation,
                    attempt,
                    max_attempts = policy.max_attempts,
                    %reason,
                    "attempt failed"
                );
                last_outcome = reason;
            }
        }
        if attempt < policy.max_attempts {
            tokio::time::sleep(policy.sleep).await;
        }
    }

    Err(DistributionError::RetryExhausted {
        operation: operation.to_string(),
        attempts: policy.max_attempts,
        last_outcome,
    }
    .into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            sleep: Duration::from_millis(0),
        }
    }

    #[tokio::test]
    async fn test_succeeds_first_attempt() {
        let calls = AtomicU32::new(0);
        let result = with_retry(&fast_policy(5), "grant", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(Attempt::Done(7)) }
        })
        .await
        .unwrap();
        assert_eq!(result, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exactly_max_attempts_then_fatal() {
        let calls = AtomicU32::new(0);
        let result: anyhow::Result<()> = with_retry(&fast_policy(5), "grant", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(Attempt::Retry("status 502".into())) }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 5);
        let err = result.unwrap_err();
        match err.downcast_ref::<DistributionError>() {
            Some(DistributionError::RetryExhausted {
                operation,
                attempts,
                ..
            }) => {
                assert_eq!(operation, "grant");
                assert_eq!(*attempts, 5);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_recovers_mid_budget() {
        let calls = AtomicU32::new(0);
        let result = with_retry(&fast_policy(5), "metadata", || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n < 3 {
                    Ok(Attempt::Retry(format!("status 500 on try {n}")))
                } else {
                    Ok(Attempt::Done("created"))
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(result, "created");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_hard_error_is_not_retried() {
        let calls = AtomicU32::new(0);
        let result: anyhow::Result<()> = with_retry(&fast_policy(5), "upload", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(anyhow::anyhow!("artifact vanished")) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
