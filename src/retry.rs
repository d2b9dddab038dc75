//! Bounded-retry execution for fallible dispatch.

use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::error::Result;

/// Extra attempts after the first failure.
pub const DEFAULT_EXTRA_ATTEMPTS: u32 = 2;
/// Fixed delay between attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(250);

/// Run `op` up to `1 + extra_attempts` times with a fixed delay between
/// attempts. Each failure is logged with `label`; the last error is returned
/// once attempts are exhausted.
pub async fn with_retry<T, F, Fut>(
    label: &str,
    extra_attempts: u32,
    delay: Duration,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let total = extra_attempts + 1;
    let mut last_err = None;
    for attempt in 1..=total {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                warn!("{} failed (attempt {}/{}): {}", label, attempt, total, e);
                last_err = Some(e);
                if attempt < total {
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
    // total >= 1, so at least one error was recorded
    Err(last_err.unwrap())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn succeeds_on_first_attempt() {
        let calls = AtomicU32::new(0);
        let result = with_retry("op", 2, Duration::from_millis(1), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(42) }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_then_succeeds() {
        let calls = AtomicU32::new(0);
        let result = with_retry("op", 2, Duration::from_millis(1), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(Error::Input("transient".into()))
                } else {
                    Ok("done")
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn returns_last_error_when_exhausted() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = with_retry("op", 2, Duration::from_millis(1), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::Input("still down".into())) }
        })
        .await;
        assert!(matches!(result, Err(Error::Input(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
