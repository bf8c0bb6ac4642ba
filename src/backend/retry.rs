use std::future::Future;
use std::time::Duration;

use super::client::BackendError;

/// Fixed delay before the single automatic retry of a failed send.
pub const RETRY_DELAY: Duration = Duration::from_secs(2);

/// Automatic retries after the first failed attempt.
pub const AUTO_RETRIES: u32 = 1;

/// Run a bounded operation with the send retry policy: retry only on
/// connectivity failures, at most [`AUTO_RETRIES`] times, [`RETRY_DELAY`]
/// apart. `on_retryable_failure` fires before each scheduled retry so the
/// caller can surface the transient state.
pub async fn with_retry<T, F, Fut, N>(
    mut op: F,
    mut on_retryable_failure: N,
) -> Result<T, BackendError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, BackendError>>,
    N: FnMut(&BackendError),
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < AUTO_RETRIES => {
                on_retryable_failure(&err);
                attempt += 1;
                tokio::time::sleep(RETRY_DELAY).await;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn connectivity() -> BackendError {
        BackendError::Connectivity("timed out".to_string())
    }

    #[tokio::test(start_paused = true)]
    async fn retries_once_on_connectivity_failure() {
        let calls = Cell::new(0u32);
        let notices = Cell::new(0u32);
        let result = with_retry(
            || {
                let n = calls.get();
                calls.set(n + 1);
                async move {
                    if n == 0 {
                        Err(connectivity())
                    } else {
                        Ok(42)
                    }
                }
            },
            |_| notices.set(notices.get() + 1),
        )
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.get(), 2);
        assert_eq!(notices.get(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_the_single_retry() {
        let calls = Cell::new(0u32);
        let result: Result<(), _> = with_retry(
            || {
                calls.set(calls.get() + 1);
                async { Err(connectivity()) }
            },
            |_| {},
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls.get(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn authorization_failures_are_not_retried() {
        let calls = Cell::new(0u32);
        let notices = Cell::new(0u32);
        let result: Result<(), _> = with_retry(
            || {
                calls.set(calls.get() + 1);
                async { Err(BackendError::Authorization("not a participant".to_string())) }
            },
            |_| notices.set(notices.get() + 1),
        )
        .await;
        assert!(matches!(result, Err(BackendError::Authorization(_))));
        assert_eq!(calls.get(), 1);
        assert_eq!(notices.get(), 0);
    }
}
