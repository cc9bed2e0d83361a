use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::debug;

use super::error::TaskQueueError;

/// Bounded pool for synchronous, possibly CPU-bound work.
///
/// Each job holds a permit while it runs on tokio's blocking threads, so at
/// most `size` jobs execute at once. The pool is owned by whoever created it
/// and closed with [`WorkerPool::shutdown`].
#[derive(Debug, Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    size: usize,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    /// Run `job` on a blocking thread once a slot is free.
    pub async fn run<F, R>(&self, job: F) -> Result<R, TaskQueueError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| TaskQueueError::PoolClosed)?;

        let result = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            job()
        })
        .await;

        result.map_err(|e| {
            if e.is_panic() {
                TaskQueueError::WorkerPanicked(panic_message(e.into_panic()))
            } else {
                TaskQueueError::PoolClosed
            }
        })
    }

    /// Refuse new jobs. Jobs already running finish normally.
    pub fn shutdown(&self) {
        if !self.permits.is_closed() {
            debug!(size = self.size, "Shutting down worker pool");
            self.permits.close();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.permits.is_closed()
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Free slots right now
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_run_returns_value() {
        let pool = WorkerPool::new(2);
        let value = pool.run(|| 21 * 2).await.unwrap();
        assert_eq!(value, 42);
        assert_eq!(pool.available(), 2);
    }

    #[tokio::test]
    async fn test_panic_is_reported() {
        let pool = WorkerPool::new(1);
        let result = pool.run(|| -> u32 { panic!("worker exploded") }).await;
        match result {
            Err(TaskQueueError::WorkerPanicked(msg)) => assert_eq!(msg, "worker exploded"),
            other => panic!("unexpected result: {other:?}"),
        }
        // The slot is released after a panic
        assert_eq!(pool.available(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrency_is_bounded() {
        let pool = WorkerPool::new(2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let jobs = (0..6).map(|_| {
            let pool = pool.clone();
            let running = running.clone();
            let peak = peak.clone();
            async move {
                pool.run(move || {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(20));
                    running.fetch_sub(1, Ordering::SeqCst);
                })
                .await
            }
        });

        for result in futures::future::join_all(jobs).await {
            result.unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_shutdown_rejects_new_jobs() {
        let pool = WorkerPool::new(1);
        pool.shutdown();
        assert!(pool.is_closed());
        assert!(matches!(
            pool.run(|| ()).await,
            Err(TaskQueueError::PoolClosed)
        ));
    }
}
