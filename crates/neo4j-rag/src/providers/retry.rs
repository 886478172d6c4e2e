//! Exponential backoff for remote calls

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

use crate::error::Result;

/// Run `operation` up to `max_retries + 1` times, backing off 1s, 2s, 4s, ...
///
/// Only transient failures (timeouts, connection errors, 5xx, 429) are retried.
pub async fn retry_request<F, Fut, T>(what: &str, max_retries: u32, operation: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) if attempt < max_retries && e.is_transient() => {
                let delay = Duration::from_secs(2u64.pow(attempt));
                tracing::warn!(
                    "{} failed (attempt {}/{}): {}; retrying in {:?}",
                    what,
                    attempt + 1,
                    max_retries + 1,
                    e,
                    delay
                );
                sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_errors() {
        let calls = AtomicU32::new(0);
        let result = retry_request("test", 2, || async {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err(Error::http_status("tgi", 503, "loading"))
            } else {
                Ok(n)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_does_not_retry_client_errors() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = retry_request("test", 3, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::http_status("tgi", 401, "unauthorized"))
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_retries() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = retry_request("test", 1, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::http_status("neo4j", 500, "boom"))
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
