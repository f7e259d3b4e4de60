//! Retry policy for upstream calls.
//!
//! Transient failures (transport errors and 5xx responses) are retried with
//! bounded exponential backoff and jitter. Client errors and cancellations
//! surface immediately.

use std::future::Future;
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};

use crate::error::{Error, Result};

const INITIAL_BACKOFF: Duration = Duration::from_millis(500);
const MAX_BACKOFF: Duration = Duration::from_secs(15);
const MAX_RETRIES: usize = 3;

/// The standard backoff strategy for fleet API calls.
#[must_use]
pub fn default_backoff() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(INITIAL_BACKOFF)
        .with_max_delay(MAX_BACKOFF)
        .with_max_times(MAX_RETRIES)
        .with_jitter()
}

/// Run `operation`, retrying transient failures.
pub async fn with_retry<T, F, Fut>(operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    operation
        .retry(default_backoff())
        .when(Error::is_transient)
        .notify(|err: &Error, dur: Duration| {
            tracing::debug!(error = %err, delay_ms = dur.as_millis() as u64, "retrying");
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn retries_transient_errors_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_capture = Arc::clone(&calls);

        let result = with_retry(move || {
            let calls = Arc::clone(&calls_capture);
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(Error::Transport("connection reset".into()))
                } else {
                    Ok(7u32)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn does_not_retry_client_errors() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_capture = Arc::clone(&calls);

        let result: Result<()> = with_retry(move || {
            let calls = Arc::clone(&calls_capture);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(Error::Api {
                    status: 404,
                    message: "not found".into(),
                })
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn gives_up_after_bounded_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_capture = Arc::clone(&calls);

        let result: Result<()> = with_retry(move || {
            let calls = Arc::clone(&calls_capture);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(Error::Api {
                    status: 502,
                    message: "bad gateway".into(),
                })
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), (MAX_RETRIES + 1) as u32);
    }
}
