//! Bounded worker orchestration.
//!
//! Fans a list of work items out across concurrency-limited async tasks,
//! the in-process equivalent of a worker pool: the semaphore cap is the
//! resource-exhaustion guard (decode memory, S3 sockets), the per-item
//! timeout keeps one stuck object from wedging the run, and the
//! cancellation flag stops dispatching queued work promptly while letting
//! in-flight items finish.
//!
//! Results come back aligned to input order regardless of completion order
//! — callers never see scheduling effects. Failure isolation lives in the
//! item closure: it returns a domain result, and nothing it does can cancel
//! sibling work.

use futures::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::warn;

/// Per-object outcome classification reported in the run summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultType {
    /// First time this key was processed.
    New,
    /// Existing key reprocessed (changed or forced).
    Processed,
    /// Nothing to do (unchanged, or source vanished mid-run).
    Skipped,
    /// Decode/metadata/upload failure or timeout; run continues.
    Failed,
}

impl fmt::Display for ResultType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResultType::New => "new",
            ResultType::Processed => "processed",
            ResultType::Skipped => "skipped",
            ResultType::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Best-effort cancellation handle shared between the run and its caller.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop dispatching queued work. In-flight items are left to finish.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// How one slot of the pool resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome<R> {
    Finished(R),
    /// Exceeded the per-item timeout; the underlying work is abandoned.
    TimedOut,
    /// Cancelled before the item was dispatched.
    NotDispatched,
}

/// Pool sizing and timeout, resolved from worker config.
#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    /// Maximum concurrently running items (slots × per-slot concurrency).
    pub parallelism: usize,
    /// Per-item wall-clock budget.
    pub timeout: Duration,
}

/// Run `work` over every item with bounded concurrency.
///
/// The returned vector is aligned to the input: `results[i]` is item `i`'s
/// outcome, whatever order the pool finished in.
pub async fn run_bounded<T, R, F, Fut>(
    items: Vec<T>,
    config: PoolConfig,
    cancel: CancelFlag,
    work: F,
) -> Vec<TaskOutcome<R>>
where
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(usize, T) -> Fut + Clone + Send + 'static,
    Fut: Future<Output = R> + Send,
{
    let semaphore = Arc::new(Semaphore::new(config.parallelism.max(1)));
    let mut results: Vec<TaskOutcome<R>> = Vec::with_capacity(items.len());
    for _ in 0..items.len() {
        results.push(TaskOutcome::NotDispatched);
    }

    let mut in_flight = FuturesUnordered::new();
    for (i, item) in items.into_iter().enumerate() {
        let semaphore = semaphore.clone();
        let cancel = cancel.clone();
        let work = work.clone();
        in_flight.push(async move {
            let permit = match semaphore.acquire_owned().await {
                Ok(p) => p,
                Err(_) => return (i, TaskOutcome::NotDispatched),
            };
            // The dispatch decision happens at permit time, not enqueue
            // time, so a cancel mid-run stops everything still queued.
            if cancel.is_cancelled() {
                return (i, TaskOutcome::NotDispatched);
            }
            let outcome = match tokio::time::timeout(config.timeout, work(i, item)).await {
                Ok(result) => TaskOutcome::Finished(result),
                Err(_) => {
                    warn!(target: "worker", slot = i, timeout_secs = config.timeout.as_secs(), "item timed out");
                    TaskOutcome::TimedOut
                }
            };
            drop(permit);
            (i, outcome)
        });
    }

    while let Some((i, outcome)) = in_flight.next().await {
        results[i] = outcome;
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn pool(parallelism: usize) -> PoolConfig {
        PoolConfig {
            parallelism,
            timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn respects_concurrency_bound() {
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let c = current.clone();
        let p = peak.clone();
        let results = run_bounded(
            (0..12).collect::<Vec<_>>(),
            pool(3),
            CancelFlag::new(),
            move |_, n: i32| {
                let c = c.clone();
                let p = p.clone();
                async move {
                    let depth = c.fetch_add(1, Ordering::SeqCst) + 1;
                    p.fetch_max(depth, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    c.fetch_sub(1, Ordering::SeqCst);
                    n * 2
                }
            },
        )
        .await;

        assert_eq!(results.len(), 12);
        assert!(peak.load(Ordering::SeqCst) <= 3, "bound exceeded");
        assert!(results
            .iter()
            .all(|r| matches!(r, TaskOutcome::Finished(_))));
    }

    #[tokio::test]
    async fn results_align_to_input_order() {
        let results = run_bounded(
            vec![30u64, 1, 20, 2],
            pool(4),
            CancelFlag::new(),
            |i, delay_ms| async move {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                (i, delay_ms)
            },
        )
        .await;

        for (i, outcome) in results.iter().enumerate() {
            match outcome {
                TaskOutcome::Finished((idx, _)) => assert_eq!(*idx, i),
                other => panic!("unexpected outcome {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn timeout_fails_only_the_stuck_item() {
        let config = PoolConfig {
            parallelism: 4,
            timeout: Duration::from_millis(50),
        };
        let results = run_bounded(
            vec![1u64, 10_000, 1],
            config,
            CancelFlag::new(),
            |_, delay_ms| async move {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                delay_ms
            },
        )
        .await;

        assert!(matches!(results[0], TaskOutcome::Finished(1)));
        assert!(matches!(results[1], TaskOutcome::TimedOut));
        assert!(matches!(results[2], TaskOutcome::Finished(1)));
    }

    #[tokio::test]
    async fn cancel_stops_dispatch_of_queued_items() {
        let cancel = CancelFlag::new();
        let dispatched = Arc::new(AtomicUsize::new(0));

        let c = cancel.clone();
        let d = dispatched.clone();
        // Single slot: item 0 runs and cancels; the rest must not dispatch.
        let results = run_bounded(
            (0..5).collect::<Vec<_>>(),
            pool(1),
            cancel.clone(),
            move |_, _n: i32| {
                let c = c.clone();
                let d = d.clone();
                async move {
                    d.fetch_add(1, Ordering::SeqCst);
                    c.cancel();
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            },
        )
        .await;

        assert_eq!(dispatched.load(Ordering::SeqCst), 1);
        assert!(matches!(results[0], TaskOutcome::Finished(())));
        assert!(results[1..]
            .iter()
            .all(|r| matches!(r, TaskOutcome::NotDispatched)));
    }

    #[tokio::test]
    async fn empty_input_is_fine() {
        let results: Vec<TaskOutcome<()>> = run_bounded(
            Vec::<u8>::new(),
            pool(2),
            CancelFlag::new(),
            |_, _| async {},
        )
        .await;
        assert!(results.is_empty());
    }

    #[test]
    fn result_type_display() {
        assert_eq!(ResultType::New.to_string(), "new");
        assert_eq!(ResultType::Failed.to_string(), "failed");
    }
}
