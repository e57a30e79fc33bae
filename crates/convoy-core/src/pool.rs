use crate::{ConvoyError, ConvoyResult};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::error;

/// Bounded pool for independent async units of work.
///
/// `submit` is fire-and-forget: work starts immediately but at most
/// `max_concurrency` units run at once. `join_all` waits for everything and
/// returns results in submission order.
pub struct WorkerPool<T> {
    permits: Arc<Semaphore>,
    set: JoinSet<(usize, T)>,
    submitted: usize,
    max_concurrency: usize,
}

impl<T: Send + 'static> WorkerPool<T> {
    /// Create a pool running at most `max_concurrency` units at once (minimum 1).
    pub fn new(max_concurrency: usize) -> Self {
        let max_concurrency = max_concurrency.max(1);
        Self {
            permits: Arc::new(Semaphore::new(max_concurrency)),
            set: JoinSet::new(),
            submitted: 0,
            max_concurrency,
        }
    }

    /// Configured concurrency ceiling.
    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Number of units submitted so far.
    pub fn len(&self) -> usize {
        self.submitted
    }

    /// Whether nothing has been submitted.
    pub fn is_empty(&self) -> bool {
        self.submitted == 0
    }

    /// Start a unit of work. It waits for a permit before running.
    pub fn submit<F>(&mut self, work: F)
    where
        F: Future<Output = T> + Send + 'static,
    {
        let permits = self.permits.clone();
        let index = self.submitted;
        self.submitted += 1;
        self.set.spawn(async move {
            // The semaphore is never closed, so acquisition only waits.
            let _permit = permits.acquire_owned().await;
            (index, work.await)
        });
    }

    /// Wait for every submitted unit. A unit that panicked yields an error in its slot.
    pub async fn join_all(mut self) -> Vec<ConvoyResult<T>> {
        let mut slots: Vec<Option<T>> = (0..self.submitted).map(|_| None).collect();
        while let Some(joined) = self.set.join_next().await {
            match joined {
                Ok((index, value)) => slots[index] = Some(value),
                Err(e) => error!(error = %e, "Worker pool: unit did not complete"),
            }
        }
        slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                slot.ok_or_else(|| {
                    ConvoyError::Capability(format!("worker unit {index} did not complete"))
                })
            })
            .collect()
    }
}
