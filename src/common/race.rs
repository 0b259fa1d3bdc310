//! Concurrency combinators over an ordered set of candidates
//!
//! - [`fastest`]: run every candidate at once, keep the first success
//! - [`failover`]: run candidates one after another, stop at the first success
//!
//! Both return exactly once. Individual failures are logged and dropped;
//! only exhaustion without any success shows up, as `None`.

use futures_util::stream::{FuturesUnordered, StreamExt};
use std::fmt::Display;
use std::future::Future;

/// Dispatch all items concurrently and resolve with the first `Ok`.
///
/// Futures still pending when a winner arrives are dropped.
pub async fn fastest<I, F, Fut, T, E>(items: I, worker: F) -> Option<T>
where
    I: IntoIterator,
    F: FnMut(I::Item) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let mut pending: FuturesUnordered<Fut> = items.into_iter().map(worker).collect();

    while let Some(outcome) = pending.next().await {
        match outcome {
            Ok(value) => return Some(value),
            Err(e) => tracing::debug!("race attempt failed: {}", e),
        }
    }

    None
}

/// Try items strictly in order, advancing immediately on failure.
pub async fn failover<I, F, Fut, T, E>(items: I, mut worker: F) -> Option<T>
where
    I: IntoIterator,
    F: FnMut(I::Item) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    for (attempt, item) in items.into_iter().enumerate() {
        match worker(item).await {
            Ok(value) => return Some(value),
            Err(e) => tracing::debug!(attempt, "failover attempt failed: {}", e),
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_failover_stops_at_first_success() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let result = failover(vec![1, 2, 3, 4], |n| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                if n == 3 {
                    Ok(n * 10)
                } else {
                    Err(format!("item {} failed", n))
                }
            }
        })
        .await;

        assert_eq!(result, Some(30));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_failover_exhausted() {
        let result: Option<u32> = failover(vec!["a", "b"], |s| async move {
            Err::<u32, _>(format!("{} down", s))
        })
        .await;
        assert_eq!(result, None);
    }

    #[tokio::test]
    async fn test_failover_empty() {
        let result: Option<u32> =
            failover(Vec::<u32>::new(), |n| async move { Ok::<_, String>(n) }).await;
        assert_eq!(result, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fastest_picks_quickest_success() {
        let result = fastest(vec![(30u64, true), (10, false), (20, true)], |(ms, ok)| {
            async move {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                if ok {
                    Ok(ms)
                } else {
                    Err("failed")
                }
            }
        })
        .await;

        // The 10ms attempt fails, so the 20ms one wins
        assert_eq!(result, Some(20));
    }

    #[tokio::test]
    async fn test_fastest_all_fail() {
        let result: Option<()> =
            fastest(0..5, |n| async move { Err::<(), _>(format!("{}", n)) }).await;
        assert_eq!(result, None);
    }
}
