//! Retry helpers shared by the outbound sends and the extraction strategies.
//!
//! Delays come from `tokio-retry` strategies; the runner adds cancellation and
//! stops early on errors that cannot improve on a second attempt.

use std::future::Future;
use std::time::Duration;

use tokio_retry::strategy::ExponentialBackoff;
use tokio_retry::RetryIf;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::MediaError;

/// `attempts` tries in total, back to back.
pub fn immediate(attempts: usize) -> impl Iterator<Item = Duration> {
    std::iter::repeat(Duration::ZERO).take(attempts.saturating_sub(1))
}

/// Delays that double from `initial`: 1s, 2s, 4s, ... for `retries` retries.
pub fn doubling(initial: Duration, retries: usize) -> impl Iterator<Item = Duration> {
    let factor = (initial.as_millis() as u64 / 2).max(1);
    ExponentialBackoff::from_millis(2).factor(factor).take(retries)
}

/// Runs `action` until it succeeds, the strategy runs dry, the error is not
/// retryable, or `cancel` fires. Exhaustion surfaces the last error.
pub async fn run<S, A, Fut, T>(
    strategy: S,
    cancel: &CancellationToken,
    what: &str,
    mut action: A,
) -> Result<T, MediaError>
where
    S: IntoIterator<Item = Duration>,
    A: FnMut() -> Fut,
    Fut: Future<Output = Result<T, MediaError>>,
{
    let mut attempt = 0usize;
    let retrying = RetryIf::start(
        strategy,
        || {
            attempt += 1;
            let n = attempt;
            let fut = action();
            async move {
                let result = fut.await;
                if let Err(e) = &result {
                    debug!("{} attempt {} failed: {}", what, n, e);
                }
                result
            }
        },
        |e: &MediaError| e.is_retryable(),
    );

    let result = tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(MediaError::Cancelled),
        result = retrying => result,
    };

    if let Err(e) = &result {
        if e.is_retryable() {
            warn!("{} gave up: {}", what, e);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_immediate_yields_attempts_minus_one_zero_delays() {
        let delays: Vec<_> = immediate(10).collect();
        assert_eq!(delays.len(), 9);
        assert!(delays.iter().all(|d| d.is_zero()));
        assert_eq!(immediate(0).count(), 0);
    }

    #[test]
    fn test_doubling_starts_at_initial() {
        let delays: Vec<_> = doubling(Duration::from_secs(1), 3).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4)
            ]
        );
    }

    #[tokio::test]
    async fn test_run_retries_until_success() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();
        let counter = calls.clone();
        let result = run(immediate(10), &cancel, "flaky", || {
            let counter = counter.clone();
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 {
                    Err(MediaError::ExtractionFailed(format!("boom {n}")))
                } else {
                    Ok(n)
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(result, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_run_surfaces_last_error_after_budget() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();
        let counter = calls.clone();
        let err = run(immediate(4), &cancel, "broken", || {
            let counter = counter.clone();
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                Err::<(), _>(MediaError::ExtractionFailed(format!("boom {n}")))
            }
        })
        .await
        .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(err.to_string(), "extraction failed: boom 4");
    }

    #[tokio::test]
    async fn test_run_does_not_retry_oversized() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();
        let counter = calls.clone();
        let err = run(immediate(10), &cancel, "big", || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(MediaError::OversizedPayload { size: 10, limit: 1 })
            }
        })
        .await
        .unwrap_err();
        assert!(matches!(err, MediaError::OversizedPayload { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_run_returns_cancelled_when_token_fired() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = run(immediate(10), &cancel, "never", || async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok::<_, MediaError>(())
        })
        .await
        .unwrap_err();
        assert!(matches!(err, MediaError::Cancelled));
    }
}
