//! Exponential backoff for transient cluster errors (spec §4.D, §5).
//!
//! User-input errors (400, 403) are never retried; only `TransientCluster`
//! is, up to `MAX_ATTEMPTS` total tries (the first attempt plus up to four
//! retries, matching spec §5's "up to five attempts").

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::{CoreError, Result};

const BASE_DELAY: Duration = Duration::from_millis(200);
const MAX_DELAY: Duration = Duration::from_secs(10);

pub async fn retry_transient<F, Fut, T>(max_attempts: u32, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(err) if err.is_retryable() && attempt < max_attempts => {
                let delay = backoff_delay(attempt);
                warn!(attempt, ?delay, error = %err, "retrying transient cluster error");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

fn backoff_delay(attempt: u32) -> Duration {
    let scaled = BASE_DELAY.saturating_mul(1 << attempt.min(8));
    scaled.min(MAX_DELAY)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn succeeds_without_retry_on_first_try() {
        let calls = AtomicU32::new(0);
        let result: Result<u32> = retry_transient(5, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(42)
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_then_succeeds() {
        let calls = AtomicU32::new(0);
        let result: Result<u32> = retry_transient(5, || async {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err(CoreError::TransientCluster("503".into()))
            } else {
                Ok(7)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn never_retries_user_input_errors() {
        let calls = AtomicU32::new(0);
        let result: Result<u32> = retry_transient(5, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(CoreError::UserInput("bad manifest".into()))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_attempts_and_surfaces_error() {
        let calls = AtomicU32::new(0);
        let result: Result<u32> = retry_transient(3, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(CoreError::TransientCluster("always busy".into()))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
