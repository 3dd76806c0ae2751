//! Fixed-delay bounded retry helpers
//!
//! Both helpers wait the same fixed delay between attempts. There is no
//! backoff and no wall-clock deadline: the worst case is `attempts * delay`.

use std::future::Future;
use std::time::Duration;

use simfleet_core::prelude::*;

/// Evaluate `probe` until it reports `true`, at most `attempts` times.
///
/// At least one evaluation always happens. A probe error is logged and counts
/// as a failed attempt. Returns `false` when every attempt failed.
pub async fn poll_until<F, Fut>(attempts: u32, delay: Duration, mut probe: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    let attempts = attempts.max(1);

    for attempt in 1..=attempts {
        match probe().await {
            Ok(true) => {
                debug!("Probe succeeded on attempt {}/{}", attempt, attempts);
                return true;
            }
            Ok(false) => trace!("Probe not satisfied ({}/{})", attempt, attempts),
            Err(e) => debug!("Probe attempt {}/{} failed: {}", attempt, attempts, e),
        }

        if attempt < attempts {
            tokio::time::sleep(delay).await;
        }
    }

    false
}

/// Run `op` once, then retry it up to `retries` more times on failure.
///
/// Returns the first success or the last error.
pub async fn retry<T, F, Fut>(retries: u32, delay: Duration, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < retries => {
                attempt += 1;
                debug!("Retrying ({}/{}) after error: {}", attempt, retries, e);
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_poll_until_succeeds_after_failures() {
        let calls = AtomicU32::new(0);
        let start = tokio::time::Instant::now();

        let ready = poll_until(10, Duration::from_millis(500), || async {
            Ok(calls.fetch_add(1, Ordering::SeqCst) >= 2)
        })
        .await;

        assert!(ready);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // Fixed delay, two waits
        assert_eq!(start.elapsed(), Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_until_exhausts() {
        let calls = AtomicU32::new(0);
        let ready = poll_until(4, Duration::from_secs(1), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(false)
        })
        .await;

        assert!(!ready);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_poll_until_counts_errors_as_failed_attempts() {
        let calls = AtomicU32::new(0);
        let ready = poll_until(3, Duration::ZERO, || async {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n == 0 {
                Err(Error::protocol("device offline"))
            } else {
                Ok(true)
            }
        })
        .await;

        assert!(ready);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_poll_until_zero_attempts_still_probes_once() {
        let calls = AtomicU32::new(0);
        poll_until(0, Duration::ZERO, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(false)
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_returns_last_error() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = retry(2, Duration::ZERO, || async {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::process_execution("adb", format!("attempt {}", n)))
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(result.unwrap_err().process_output(), Some("attempt 2"));
    }

    #[tokio::test]
    async fn test_retry_stops_on_success() {
        let calls = AtomicU32::new(0);
        let value = retry(5, Duration::ZERO, || async {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(Error::process_execution("adb", "busy"))
            } else {
                Ok("done")
            }
        })
        .await
        .unwrap();

        assert_eq!(value, "done");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
