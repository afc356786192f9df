use anyhow::{Result, anyhow};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinHandle};

/// Worker pool whose admission is gated so that at most `bound + max_workers` tasks are in
/// flight. `submit` waits for an admission permit, which gives producers backpressure.
pub struct BoundedWorkPool {
    // Permits for queued + running tasks
    admission: Arc<Semaphore>,
    // Permits for running tasks
    workers: Arc<Semaphore>,
    max_outstanding: usize,
}

impl BoundedWorkPool {
    pub fn new(max_workers: usize, bound: usize) -> Self {
        let max_workers = max_workers.max(1);
        let max_outstanding = max_workers + bound;
        Self {
            admission: Arc::new(Semaphore::new(max_outstanding)),
            workers: Arc::new(Semaphore::new(max_workers)),
            max_outstanding,
        }
    }

    /// Waits until the task can be admitted, then spawns it. The admission permit is released
    /// when the task finishes.
    pub async fn submit<F, T>(&self, task: F) -> Result<JoinHandle<T>>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let admission = self
            .admission
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| anyhow!("work pool closed: {e}"))?;
        let workers = self.workers.clone();

        Ok(tokio::spawn(async move {
            let _admission = admission;
            let _worker = workers
                .acquire_owned()
                .await
                .map_err(|e| anyhow!("work pool closed: {e}"));
            task.await
        }))
    }

    /// Tasks admitted and not yet finished.
    pub fn outstanding(&self) -> usize {
        self.max_outstanding - self.admission.available_permits()
    }

    pub fn max_outstanding(&self) -> usize {
        self.max_outstanding
    }
}

/// Tracks the handles returned by a [`BoundedWorkPool`] and surfaces the first task failure
/// to the producer on its next `submit` instead of deferring it to `shutdown`.
pub struct FailFastSupervisor<T> {
    pool: Arc<BoundedWorkPool>,
    pending: Vec<JoinHandle<Result<T>>>,
    completed: Vec<T>,
    in_flight: Arc<AtomicUsize>,
}

impl<T: Send + 'static> FailFastSupervisor<T> {
    pub fn new(pool: Arc<BoundedWorkPool>) -> Self {
        Self {
            pool,
            pending: Vec::new(),
            completed: Vec::new(),
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub async fn submit<F>(&mut self, task: F) -> Result<()>
    where
        F: Future<Output = Result<T>> + Send + 'static,
    {
        self.collect_finished().await?;

        let guard = InFlightGuard::new(self.in_flight.clone());
        let handle = self
            .pool
            .submit(async move {
                let _guard = guard;
                task.await
            })
            .await?;
        self.pending.push(handle);
        Ok(())
    }

    /// Waits for every submitted task and returns their outputs, or the first failure.
    pub async fn shutdown(mut self) -> Result<Vec<T>> {
        let mut first_error = None;
        for handle in std::mem::take(&mut self.pending) {
            match flatten(handle.await) {
                Ok(output) => self.completed.push(output),
                Err(e) => {
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        let remaining = self.in_flight.load(Ordering::SeqCst);
        assert_eq!(
            remaining, 0,
            "{remaining} tasks still outstanding after the pool was drained"
        );

        match first_error {
            Some(e) => Err(e),
            None => Ok(std::mem::take(&mut self.completed)),
        }
    }

    async fn collect_finished(&mut self) -> Result<()> {
        let mut index = 0;
        while index < self.pending.len() {
            if self.pending[index].is_finished() {
                let handle = self.pending.swap_remove(index);
                self.completed.push(flatten(handle.await)?);
            } else {
                index += 1;
            }
        }
        Ok(())
    }
}

impl<T> Drop for FailFastSupervisor<T> {
    fn drop(&mut self) {
        // Early return on failure leaves siblings running
        for handle in &self.pending {
            handle.abort();
        }
    }
}

struct InFlightGuard(Arc<AtomicUsize>);

impl InFlightGuard {
    fn new(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn flatten<T>(joined: Result<Result<T>, JoinError>) -> Result<T> {
    match joined {
        Ok(result) => result,
        Err(e) if e.is_panic() => Err(anyhow!("worker task panicked: {e}")),
        Err(e) => Err(anyhow!("worker task cancelled: {e}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::Notify;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_pool_blocks_producer_beyond_bound() {
        let pool = Arc::new(BoundedWorkPool::new(2, 1));
        let gate = Arc::new(Notify::new());
        let mut handles = Vec::new();

        // Fill all bound + workers slots with tasks that wait on the gate
        for _ in 0..pool.max_outstanding() {
            let gate = gate.clone();
            handles.push(pool.submit(async move { gate.notified().await }).await.unwrap());
        }
        assert_eq!(pool.outstanding(), 3);

        // The next submission must wait for a slot
        let blocked = timeout(Duration::from_millis(50), pool.submit(async {})).await;
        assert!(blocked.is_err(), "producer should be blocked while the pool is full");

        // Release one task; the producer gets through
        gate.notify_one();
        let admitted = timeout(Duration::from_secs(5), pool.submit(async {})).await;
        assert!(admitted.is_ok());

        gate.notify_waiters();
        for handle in handles {
            handle.abort();
        }
    }

    #[tokio::test]
    async fn test_pool_caps_running_workers() {
        let pool = Arc::new(BoundedWorkPool::new(2, 10));
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();

        for _ in 0..8 {
            let running = running.clone();
            let peak = peak.clone();
            handles.push(
                pool.submit(async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                })
                .await
                .unwrap(),
            );
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(pool.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_supervisor_surfaces_failure_on_next_submit() {
        let pool = Arc::new(BoundedWorkPool::new(1, 1));
        let mut supervisor = FailFastSupervisor::<u32>::new(pool);

        supervisor
            .submit(async { Err(anyhow!("boom")) })
            .await
            .unwrap();
        // Give the failing task a chance to finish
        tokio::time::sleep(Duration::from_millis(20)).await;

        let err = supervisor.submit(async { Ok(1) }).await.unwrap_err();
        assert!(err.to_string().contains("boom"));
    }

    #[tokio::test]
    async fn test_supervisor_shutdown_collects_outputs() {
        let pool = Arc::new(BoundedWorkPool::new(3, 1));
        let mut supervisor = FailFastSupervisor::new(pool.clone());
        for value in 0..10u32 {
            supervisor.submit(async move { Ok(value) }).await.unwrap();
        }

        let mut outputs = supervisor.shutdown().await.unwrap();
        outputs.sort();
        assert_eq!(outputs, (0..10).collect::<Vec<_>>());
        assert_eq!(pool.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_supervisor_shutdown_reports_failure() {
        let pool = Arc::new(BoundedWorkPool::new(2, 0));
        let mut supervisor = FailFastSupervisor::<u32>::new(pool);
        supervisor.submit(async { Ok(1) }).await.unwrap();
        supervisor
            .submit(async {
                tokio::time::sleep(Duration::from_millis(5)).await;
                Err(anyhow!("late failure"))
            })
            .await
            .unwrap();

        let err = supervisor.shutdown().await.unwrap_err();
        assert!(err.to_string().contains("late failure"));
    }
}
