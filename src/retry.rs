//! Bounded, blocking retry helper (spec.md §4.2, §9 "coroutine-free retry").
//!
//! Unlike the teacher's `journal-client::read::uncommitted::retry` module
//! (an exponential backoff keyed off an `io::Error`), spec.md §4.2 specifies
//! a plain fixed-interval retry with a total time budget: "all transient
//! errors retried with 100 ms fixed sleep up to a configurable budget."
//! `RetryBudget` is that simplified sibling: a closure and a deadline, no
//! async primitive involved.

use crate::error::Error;
use std::time::{Duration, Instant};

const DEFAULT_INTERVAL: Duration = Duration::from_millis(100);

/// Tracks how much retry budget remains for one logical operation.
#[derive(Debug, Clone, Copy)]
pub struct RetryBudget {
    interval: Duration,
    deadline: Instant,
}

impl RetryBudget {
    pub fn new(budget: Duration) -> Self {
        RetryBudget {
            interval: DEFAULT_INTERVAL,
            deadline: Instant::now() + budget,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    fn has_budget(&self) -> bool {
        Instant::now() < self.deadline
    }

    /// Run `op` until it succeeds, returns a non-transient error, or the
    /// budget is exhausted. Sleeps `interval` between attempts via the
    /// async executor (this crate is async throughout, so "blocking loop"
    /// means "no cooperative cancellation mid-attempt," not "no await").
    pub async fn retry<T, F, Fut>(&self, op_name: &'static str, mut op: F) -> Result<T, Error>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, Error>>,
    {
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && self.has_budget() => {
                    tracing::warn!(op = op_name, error = %err, "retrying after transient error");
                    tokio::time::sleep(self.interval).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Same as `retry`, but bumps `retry_counter` once per attempt that
    /// actually gets retried (SPEC_FULL.md §B.4's `object_store_retries`
    /// counter).
    pub async fn retry_instrumented<T, F, Fut>(
        &self,
        op_name: &'static str,
        retry_counter: &prometheus::CounterVec,
        mut op: F,
    ) -> Result<T, Error>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, Error>>,
    {
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && self.has_budget() => {
                    retry_counter.with_label_values(&[op_name]).inc();
                    tracing::warn!(op = op_name, error = %err, "retrying after transient error");
                    tokio::time::sleep(self.interval).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn succeeds_without_retry() {
        let budget = RetryBudget::new(Duration::from_secs(1));
        let result = budget
            .retry("test", || async { Ok::<_, Error>(42) })
            .await
            .unwrap();
        assert_eq!(result, 42);
    }

    #[tokio::test]
    async fn retries_transient_then_succeeds() {
        let budget = RetryBudget::new(Duration::from_secs(1)).with_interval(Duration::from_millis(1));
        let attempts = AtomicUsize::new(0);
        let result = budget
            .retry("test", || async {
                if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(Error::transient("test", anyhow::anyhow!("boom")))
                } else {
                    Ok(7)
                }
            })
            .await
            .unwrap();
        assert_eq!(result, 7);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn surfaces_permanent_errors_immediately() {
        let budget = RetryBudget::new(Duration::from_secs(1));
        let attempts = AtomicUsize::new(0);
        let result = budget
            .retry("test", || async {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(Error::permanent("test", anyhow::anyhow!("bad arg")))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausts_budget_and_surfaces_transient() {
        let budget = RetryBudget::new(Duration::from_millis(5)).with_interval(Duration::from_millis(3));
        let result = budget
            .retry("test", || async {
                Err::<(), _>(Error::transient("test", anyhow::anyhow!("still failing")))
            })
            .await;
        assert!(matches!(result, Err(Error::Transient { .. })));
    }
}
