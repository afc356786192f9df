use anyhow::Result;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{info, warn};

use crate::models::errors::is_retryable;
use crate::utils::work_pool::{BoundedWorkPool, FailFastSupervisor};

const QUEUE_BOUND: usize = 1;

/// Splits work into batches of a shrinking size and runs them on a bounded pool.
///
/// A batch that fails with a transient error halves the batch size for later batches and is
/// replayed one item at a time. The size never grows back; a new executor starts from the
/// configured size again.
pub struct BatchWorkExecutor {
    name: &'static str,
    batch_size: Arc<AtomicUsize>,
    pool: Arc<BoundedWorkPool>,
}

impl BatchWorkExecutor {
    pub fn new(name: &'static str, batch_size: usize, max_workers: usize) -> Self {
        Self {
            name,
            batch_size: Arc::new(AtomicUsize::new(batch_size.max(1))),
            pool: Arc::new(BoundedWorkPool::new(max_workers, QUEUE_BOUND)),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size.load(Ordering::SeqCst)
    }

    /// Runs `handler` over `items` in batches and gathers every batch's output.
    /// Output order follows batch completion, not input order.
    pub async fn execute<I, T, O, F, Fut>(&self, items: I, handler: F) -> Result<Vec<O>>
    where
        I: IntoIterator<Item = T>,
        T: Clone + Send + Sync + 'static,
        O: Send + 'static,
        F: Fn(Vec<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<O>>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        let mut supervisor = FailFastSupervisor::new(self.pool.clone());
        let mut items = items.into_iter();

        loop {
            let batch: Vec<T> = items.by_ref().take(self.batch_size()).collect();
            if batch.is_empty() {
                break;
            }
            supervisor
                .submit(fail_safe_execute(
                    self.name,
                    batch,
                    handler.clone(),
                    self.batch_size.clone(),
                ))
                .await?;
        }

        let outputs = supervisor.shutdown().await?;
        Ok(outputs.into_iter().flatten().collect())
    }
}

async fn fail_safe_execute<T, O, F, Fut>(
    name: &'static str,
    batch: Vec<T>,
    handler: Arc<F>,
    batch_size: Arc<AtomicUsize>,
) -> Result<Vec<O>>
where
    T: Clone,
    F: Fn(Vec<T>) -> Fut,
    Fut: Future<Output = Result<Vec<O>>>,
{
    let error = match handler(batch.clone()).await {
        Ok(output) => return Ok(output),
        Err(e) if !is_retryable(&e) => return Err(e),
        Err(e) => e,
    };

    let current = batch_size.load(Ordering::SeqCst);
    if current == 1 {
        return Err(error.context(format!("{name}: batch size is already 1")));
    }

    // Only a full-size batch is evidence that the current size is too large
    if batch.len() == current {
        let reduced = (current / 2).max(1);
        if batch_size
            .compare_exchange(current, reduced, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            warn!(
                "{}: batch of {} failed ({}). Reducing batch size to {}",
                name, current, error, reduced
            );
        }
    }

    info!(
        "{}: retrying the failed batch of {} one item at a time",
        name,
        batch.len()
    );
    let mut output = Vec::new();
    for item in batch {
        output.extend(handler(vec![item]).await?);
    }
    Ok(output)
}
