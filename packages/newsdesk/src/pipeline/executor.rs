//! Stage execution primitives: bounded fan-out and bounded retry.

use std::future::Future;

use futures::stream::{self, StreamExt};
use tracing::debug;

use crate::error::{StageError, StageFailure};
use crate::types::config::RetryPolicy;

/// Run `op` until it succeeds, fails permanently, or exhausts `policy`.
///
/// Only transient errors are retried; the backoff grows per the policy.
pub async fn retry_stage<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T, StageFailure>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StageError>>,
{
    let max = policy.attempts();
    let mut attempt = 0;

    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(error) if error.is_transient() && attempt < max => {
                let delay = policy.backoff(attempt);
                debug!(
                    stage = %error.stage(),
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %error.message(),
                    "transient stage failure, backing off"
                );
                tokio::time::sleep(delay).await;
            }
            Err(error) => {
                return Err(StageFailure {
                    error,
                    attempts: attempt,
                })
            }
        }
    }
}

/// Run `f` over keyed items with at most `width` calls in flight.
///
/// All calls run on the current task and interleave at their await points.
/// Results come back sorted by key regardless of completion order. A width
/// of zero is treated as one.
pub async fn run_bounded<K, I, O, F, Fut>(items: Vec<(K, I)>, width: usize, f: F) -> Vec<(K, O)>
where
    K: Ord + Clone,
    F: Fn(K, I) -> Fut,
    Fut: Future<Output = O>,
{
    let mut results: Vec<(K, O)> = stream::iter(items)
        .map(|(key, item)| {
            let fut = f(key.clone(), item);
            async move { (key, fut.await) }
        })
        .buffer_unordered(width.max(1))
        .collect()
        .await;

    results.sort_by(|a, b| a.0.cmp(&b.0));
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Stage;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_retry_recovers_from_transient_failure() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(3, Duration::ZERO);

        let value = retry_stage(&policy, || async {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(StageError::transient(Stage::Analyze, "503"))
            } else {
                Ok(42)
            }
        })
        .await
        .unwrap();

        assert_eq!(value, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_budget() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(3, Duration::ZERO);

        let failure = retry_stage(&policy, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(StageError::transient(Stage::Analyze, "timeout"))
        })
        .await
        .unwrap_err();

        assert_eq!(failure.attempts, 3);
        assert_eq!(failure.stage(), Stage::Analyze);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(5, Duration::ZERO);

        let failure = retry_stage(&policy, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(StageError::permanent(Stage::Segment, "corrupt image"))
        })
        .await
        .unwrap_err();

        assert_eq!(failure.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_bounded_results_are_sorted_by_key() {
        let items: Vec<(u32, u64)> = vec![(1, 30), (2, 10), (3, 20), (4, 0)];

        let results = run_bounded(items, 4, |key, delay_ms| async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            key * 10
        })
        .await;

        assert_eq!(results, vec![(1, 10), (2, 20), (3, 30), (4, 40)]);
    }

    #[tokio::test]
    async fn test_bounded_width_caps_in_flight_calls() {
        let in_flight = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);
        let items: Vec<(usize, ())> = (0..12).map(|i| (i, ())).collect();

        run_bounded(items, 3, |_, _| async {
            let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            in_flight.fetch_sub(1, Ordering::SeqCst);
        })
        .await;

        assert_eq!(peak.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_zero_width_still_makes_progress() {
        let results = run_bounded(vec![(1, 'a'), (0, 'b')], 0, |_, c| async move { c }).await;
        assert_eq!(results, vec![(0, 'b'), (1, 'a')]);
    }
}
