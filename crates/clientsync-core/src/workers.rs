// crates/clientsync-core/src/workers.rs

use futures::stream::StreamExt;
use std::future::Future;

/// A task that failed inside the pool, kept alongside its input position so
/// callers can report which item broke.
#[derive(Debug)]
pub struct TaskFailure {
    pub index: usize,
    pub error: anyhow::Error,
}

/// Collected results of a bounded batch run. `results` is input-ordered with
/// `None` in the slots whose tasks failed.
#[derive(Debug)]
pub struct PoolOutcome<T> {
    pub results: Vec<Option<T>>,
    pub failures: Vec<TaskFailure>,
}

impl<T> PoolOutcome<T> {
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn all_ok(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Runs `task` over every item with at most `concurrency` in flight.
/// Failures are collected rather than aborting the batch.
pub async fn run_bounded<I, T, F, Fut>(items: Vec<I>, concurrency: usize, task: F) -> PoolOutcome<T>
where
    F: Fn(I) -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let total = items.len();
    let task = &task;
    let mut stream = futures::stream::iter(
        items
            .into_iter()
            .enumerate()
            .map(|(index, item)| async move { (index, task(item).await) }),
    )
    .buffer_unordered(concurrency.max(1));

    let mut results: Vec<Option<T>> = (0..total).map(|_| None).collect();
    let mut failures = Vec::new();
    while let Some((index, outcome)) = stream.next().await {
        match outcome {
            Ok(value) => results[index] = Some(value),
            Err(error) => failures.push(TaskFailure { index, error }),
        }
    }
    failures.sort_by_key(|failure| failure.index);
    PoolOutcome { results, failures }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn results_come_back_in_input_order() {
        let items: Vec<u64> = (0..20).collect();
        let outcome = run_bounded(items, 4, |n| async move {
            // Later items finish first, exercising the reordering.
            tokio::time::sleep(Duration::from_millis(20 - n)).await;
            Ok(n * 2)
        })
        .await;
        assert!(outcome.all_ok());
        let values: Vec<u64> = outcome.results.into_iter().map(|v| v.unwrap()).collect();
        assert_eq!(values, (0..20).map(|n| n * 2).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn failures_are_collected_not_fatal() {
        let outcome = run_bounded(vec![1, 2, 3, 4], 2, |n| async move {
            if n % 2 == 0 {
                Err(anyhow!("item {n} broke"))
            } else {
                Ok(n)
            }
        })
        .await;
        assert_eq!(outcome.succeeded(), 2);
        assert_eq!(outcome.failures.len(), 2);
        assert_eq!(outcome.failures[0].index, 1);
        assert_eq!(outcome.failures[1].index, 3);
        assert_eq!(outcome.results[0], Some(1));
        assert_eq!(outcome.results[1], None);
    }

    #[tokio::test]
    async fn concurrency_stays_within_bound() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let items: Vec<usize> = (0..32).collect();
        let (in_flight_ref, peak_ref) = (in_flight.clone(), peak.clone());
        let outcome = run_bounded(items, 4, move |_| {
            let in_flight = in_flight_ref.clone();
            let peak = peak_ref.clone();
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .await;
        assert!(outcome.all_ok());
        assert!(peak.load(Ordering::SeqCst) <= 4);
    }
}
