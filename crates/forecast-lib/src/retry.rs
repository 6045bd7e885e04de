//! Bounded timeout and retry-with-backoff for external I/O

use crate::config::RetryPolicy;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Why a single attempt failed
#[derive(Debug)]
pub enum AttemptError<E> {
    Failed(E),
    TimedOut(Duration),
}

impl<E: fmt::Display> fmt::Display for AttemptError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptError::Failed(e) => write!(f, "{}", e),
            AttemptError::TimedOut(t) => write!(f, "timed out after {}ms", t.as_millis()),
        }
    }
}

/// All attempts were exhausted
#[derive(Debug)]
pub struct RetryExhausted<E> {
    pub operation: String,
    pub attempts: u32,
    pub last_error: AttemptError<E>,
}

impl<E: fmt::Display> fmt::Display for RetryExhausted<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} failed after {} attempt(s): {}",
            self.operation, self.attempts, self.last_error
        )
    }
}

/// Run `op` until it succeeds, applying a per-attempt timeout and
/// exponential backoff between attempts.
pub async fn retry_with_backoff<T, E, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    mut op: F,
) -> std::result::Result<T, RetryExhausted<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: fmt::Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut backoff = policy.initial_backoff();
    let mut attempt = 0;

    loop {
        attempt += 1;
        let last_error = match tokio::time::timeout(policy.attempt_timeout(), op()).await {
            Ok(Ok(value)) => {
                if attempt > 1 {
                    debug!(operation = %operation, attempt, "Operation succeeded after retry");
                }
                return Ok(value);
            }
            Ok(Err(e)) => AttemptError::Failed(e),
            Err(_) => AttemptError::TimedOut(policy.attempt_timeout()),
        };

        if attempt >= max_attempts {
            return Err(RetryExhausted {
                operation: operation.to_string(),
                attempts: attempt,
                last_error,
            });
        }

        warn!(
            operation = %operation,
            attempt,
            max_attempts,
            backoff_ms = backoff.as_millis() as u64,
            error = %last_error,
            "Operation failed, retrying"
        );
        tokio::time::sleep(backoff).await;
        backoff = std::cmp::min(backoff * 2, policy.max_backoff());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_backoff_ms: 1,
            max_backoff_ms: 4,
            attempt_timeout_secs: 5,
        }
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result = retry_with_backoff(&fast_policy(), "flaky", || {
            let counter = counter.clone();
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err("connection refused")
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: std::result::Result<(), _> =
            retry_with_backoff(&fast_policy(), "always_down", || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err("unreachable")
                }
            })
            .await;

        let err = result.unwrap_err();
        assert_eq!(err.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(err.to_string().contains("always_down"));
    }

    #[tokio::test]
    async fn test_attempt_timeout_counts_as_failure() {
        let policy = RetryPolicy {
            max_attempts: 1,
            initial_backoff_ms: 1,
            max_backoff_ms: 1,
            attempt_timeout_secs: 0,
        };
        let result: std::result::Result<(), RetryExhausted<String>> =
            retry_with_backoff(&policy, "slow", || async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(())
            })
            .await;

        assert!(matches!(
            result.unwrap_err().last_error,
            AttemptError::TimedOut(_)
        ));
    }
}
