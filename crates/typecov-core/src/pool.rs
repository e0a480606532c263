//! Bounded task pool.
//!
//! [`TaskPool`] runs one task per work item while at most `limit` tasks
//! hold a permit at any instant. Every item yields its own
//! [`TaskOutcome`], returned in input order. A task that fails, panics or
//! overruns the pool deadline only affects its own slot; the batch always
//! waits for every task before returning.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::error::{CensusError, Result};

/// Outcome of one pooled task.
pub type TaskOutcome<T> = Result<T>;

/// Instrumentation for permits currently held.
#[derive(Debug, Default)]
struct InFlight {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl InFlight {
    fn enter(self: &Arc<Self>) -> InFlightGuard {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        InFlightGuard(Arc::clone(self))
    }
}

struct InFlightGuard(Arc<InFlight>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.current.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A semaphore-gated fan-out over a list of work items.
#[derive(Debug, Clone)]
pub struct TaskPool {
    limit: usize,
    deadline: Option<Duration>,
    semaphore: Arc<Semaphore>,
    in_flight: Arc<InFlight>,
}

impl TaskPool {
    /// Create a pool admitting `limit` concurrent tasks (at least one).
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            limit,
            deadline: None,
            semaphore: Arc::new(Semaphore::new(limit)),
            in_flight: Arc::new(InFlight::default()),
        }
    }

    /// Fail any task still running `deadline` after it acquired its permit.
    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Tasks currently holding a permit.
    pub fn in_flight(&self) -> usize {
        self.in_flight.current.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneous permit holders seen by this pool.
    pub fn peak_in_flight(&self) -> usize {
        self.in_flight.peak.load(Ordering::SeqCst)
    }

    /// Run `task` once per item and collect every outcome in input order.
    ///
    /// The permit is acquired before `task` is called and released when the
    /// task returns, errors, panics or times out.
    pub async fn run<I, F, Fut, T>(&self, items: Vec<I>, task: F) -> Vec<TaskOutcome<T>>
    where
        I: Send + 'static,
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let task = Arc::new(task);
        let total = items.len();
        let mut join_set = JoinSet::new();

        for (idx, item) in items.into_iter().enumerate() {
            let semaphore = Arc::clone(&self.semaphore);
            let in_flight = Arc::clone(&self.in_flight);
            let task = Arc::clone(&task);
            let deadline = self.deadline;

            join_set.spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return (idx, Err(CensusError::Task("task pool closed".to_string()))),
                };
                let _guard = in_flight.enter();

                let work = AssertUnwindSafe(task(item)).catch_unwind();
                let outcome = match deadline {
                    Some(after) => match tokio::time::timeout(after, work).await {
                        Ok(result) => result,
                        Err(_) => return (idx, Err(CensusError::Timeout { after })),
                    },
                    None => work.await,
                };

                let outcome = outcome.unwrap_or_else(|panic| {
                    Err(CensusError::Task(format!("task panicked: {}", panic_message(&*panic))))
                });
                (idx, outcome)
            });
        }

        let mut slots: Vec<Option<TaskOutcome<T>>> = (0..total).map(|_| None).collect();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((idx, outcome)) => slots[idx] = Some(outcome),
                Err(e) => tracing::warn!(error = %e, "pooled task did not report"),
            }
        }

        slots
            .into_iter()
            .map(|slot| {
                slot.unwrap_or_else(|| Err(CensusError::Task("task did not complete".to_string())))
            })
            .collect()
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
