//! Bounded exponential backoff over the exchange error's outcome ladder
//! (spec §4.1: 3 retry attempts, 1s/2s/4s), rather than catching generic
//! failures (Design Note: exception-based control flow on retry).

use std::future::Future;
use std::time::Duration;

use crate::error::{ExchangeError, Result};

const RETRY_DELAYS_SECS: [u64; 3] = [1, 2, 4];

/// Runs `attempt` until it succeeds, returns a non-retryable error, or the
/// retry budget is exhausted. `attempt` is invoked with the zero-based try
/// number so callers can log which attempt they're on.
pub async fn with_retry<T, F, Fut>(mut attempt: F) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last_err: Option<ExchangeError> = None;

    for try_number in 0..=RETRY_DELAYS_SECS.len() {
        match attempt(try_number as u32).await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() => {
                tracing::warn!(try_number, error = %err, "transient exchange error");
                let delay = err
                    .retry_delay_secs()
                    .unwrap_or_else(|| RETRY_DELAYS_SECS[try_number.min(RETRY_DELAYS_SECS.len() - 1)]);
                last_err = Some(err);
                if try_number < RETRY_DELAYS_SECS.len() {
                    tokio::time::sleep(Duration::from_secs(delay)).await;
                }
            }
            Err(err) => return Err(err),
        }
    }

    Err(last_err.expect("loop only exits without returning after a transient error was recorded"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn succeeds_without_retry_on_first_try() {
        let calls = AtomicU32::new(0);
        let result: Result<u32> = with_retry(|_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(7) }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_transient_errors_then_succeeds() {
        let calls = AtomicU32::new(0);
        let result: Result<u32> = with_retry(|try_number| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if try_number < 2 {
                    Err(ExchangeError::Network("flaky".into()))
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
    async fn does_not_retry_non_transient_errors() {
        let calls = AtomicU32::new(0);
        let result: Result<u32> = with_retry(|_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ExchangeError::Authentication("bad creds".into())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausts_retry_budget_on_persistent_transient_error() {
        let calls = AtomicU32::new(0);
        let result: Result<u32> = with_retry(|_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ExchangeError::Network("down".into())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }
}
