//! Bounded concurrent execution of independent remote calls.

use std::future::Future;

use futures::stream::{self, StreamExt};

/// Run `task` over every item with at most `limit` in flight.
///
/// Every task runs to completion even when some fail; the first failure
/// (in completion order) is returned.
pub async fn run_bounded<I, F, Fut, E>(limit: usize, items: I, task: F) -> Result<(), E>
where
    I: IntoIterator,
    F: FnMut(I::Item) -> Fut,
    Fut: Future<Output = Result<(), E>>,
{
    let mut first = None;
    let mut results = stream::iter(items).map(task).buffer_unordered(limit.max(1));
    while let Some(result) = results.next().await {
        if let Err(e) = result {
            first.get_or_insert(e);
        }
    }
    first.map_or(Ok(()), Err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_all_tasks_run_despite_failure() {
        let ran = AtomicUsize::new(0);
        let res = run_bounded(2, 0..5, |n| {
            let ran = &ran;
            async move {
                ran.fetch_add(1, Ordering::SeqCst);
                if n == 1 {
                    Err(format!("task {n} failed"))
                } else {
                    Ok(())
                }
            }
        })
        .await;
        assert_eq!(res, Err("task 1 failed".to_string()));
        assert_eq!(ran.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let in_flight = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);
        let res: Result<(), ()> = run_bounded(3, 0..10, |_| {
            let (in_flight, peak) = (&in_flight, &peak);
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .await;
        assert!(res.is_ok());
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }
}
