//! Elastic worker pool for deferred work.
//!
//! A bounded queue feeds a set of workers that grows toward `max_workers`
//! under queue pressure and shrinks back to the baseline after idling.
//! Submission blocks for at most five seconds before reporting back-pressure.

use crate::config::ThreadPoolConfig;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

const SUBMIT_TIMEOUT: Duration = Duration::from_secs(5);
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Worker pool errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("failed to submit job: queue full")]
    QueueFull,
    #[error("worker pool is shutting down")]
    ShuttingDown,
}

type Task = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'static>>;

/// A unit of deferred work.
pub struct Job {
    pub id: String,
    task: Task,
}

impl Job {
    pub fn new<F>(id: impl Into<String>, task: F) -> Self
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self {
            id: id.into(),
            task: Box::pin(task),
        }
    }
}

/// Live pool counters.
#[derive(Debug, Clone, Copy)]
pub struct PoolStats {
    pub active_workers: usize,
    pub baseline_workers: usize,
    pub max_workers: usize,
    pub queue_length: usize,
    pub queue_capacity: usize,
}

/// Bounded job dispatcher with an elastic worker count.
pub struct WorkerPool {
    baseline: usize,
    max_workers: usize,
    queue_capacity: usize,
    idle_timeout: Duration,
    tx: mpsc::Sender<Job>,
    rx: Arc<Mutex<mpsc::Receiver<Job>>>,
    queued: Arc<AtomicUsize>,
    active: Arc<AtomicUsize>,
    next_worker_id: AtomicUsize,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl WorkerPool {
    /// Create the pool and start the baseline workers.
    pub fn new(cfg: &ThreadPoolConfig) -> Self {
        let (tx, rx) = mpsc::channel(cfg.queue_size.max(1));
        let pool = Self {
            baseline: cfg.worker_count.max(1),
            max_workers: cfg.max_workers.max(cfg.worker_count.max(1)),
            queue_capacity: cfg.queue_size.max(1),
            idle_timeout: Duration::from_secs(cfg.worker_idle_timeout_secs.max(1)),
            tx,
            rx: Arc::new(Mutex::new(rx)),
            queued: Arc::new(AtomicUsize::new(0)),
            active: Arc::new(AtomicUsize::new(0)),
            next_worker_id: AtomicUsize::new(0),
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
        };

        info!(
            workers = pool.baseline,
            max = pool.max_workers,
            queue = pool.queue_capacity,
            "Starting worker pool"
        );
        for _ in 0..pool.baseline {
            pool.spawn_worker();
        }
        pool
    }

    /// Submit a job. Spawns an extra worker when the queue is more than half
    /// full, then blocks up to five seconds for queue space.
    pub async fn submit(&self, job: Job) -> Result<(), PoolError> {
        if self.shutdown.is_cancelled() {
            return Err(PoolError::ShuttingDown);
        }

        if self.queued.load(Ordering::SeqCst) > self.queue_capacity / 2
            && self.active.load(Ordering::SeqCst) < self.max_workers
        {
            debug!("Queue over half full, spawning additional worker");
            self.spawn_worker();
        }

        self.queued.fetch_add(1, Ordering::SeqCst);
        match tokio::time::timeout(SUBMIT_TIMEOUT, self.tx.send(job)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => {
                self.queued.fetch_sub(1, Ordering::SeqCst);
                Err(PoolError::ShuttingDown)
            }
            Err(_) => {
                self.queued.fetch_sub(1, Ordering::SeqCst);
                Err(PoolError::QueueFull)
            }
        }
    }

    /// Convenience wrapper building the [`Job`] inline.
    pub async fn submit_task<F>(&self, id: impl Into<String>, task: F) -> Result<(), PoolError>
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.submit(Job::new(id, task)).await
    }

    fn spawn_worker(&self) {
        let worker_id = self.next_worker_id.fetch_add(1, Ordering::SeqCst);
        let rx = Arc::clone(&self.rx);
        let queued = Arc::clone(&self.queued);
        let active = Arc::clone(&self.active);
        let shutdown = self.shutdown.clone();
        let baseline = self.baseline;
        let idle_timeout = self.idle_timeout;

        active.fetch_add(1, Ordering::SeqCst);
        self.tracker.spawn(async move {
            debug!(worker = worker_id, "Worker started");
            loop {
                let received = tokio::select! {
                    _ = shutdown.cancelled() => None,
                    res = tokio::time::timeout(idle_timeout, async {
                        let mut rx = rx.lock().await;
                        rx.recv().await
                    }) => match res {
                        Ok(job) => job.map(Some),
                        // Idle too long: exit unless that would drop below
                        // the baseline.
                        Err(_) => {
                            let prev = active.fetch_sub(1, Ordering::SeqCst);
                            if prev > baseline {
                                debug!(worker = worker_id, "Worker idle timeout, exiting");
                                return;
                            }
                            active.fetch_add(1, Ordering::SeqCst);
                            continue;
                        }
                    },
                };

                let Some(Some(job)) = received else {
                    break;
                };
                queued.fetch_sub(1, Ordering::SeqCst);

                match job.task.await {
                    Ok(()) => debug!(worker = worker_id, job = %job.id, "Job completed"),
                    Err(e) => warn!(worker = worker_id, job = %job.id, error = %e, "Job failed"),
                }
            }
            active.fetch_sub(1, Ordering::SeqCst);
            debug!(worker = worker_id, "Worker shutting down");
        });
    }

    /// Signal cancellation and wait up to ten seconds for workers to drain;
    /// stragglers are abandoned.
    pub async fn shutdown(&self) {
        info!("Shutting down worker pool");
        self.shutdown.cancel();
        self.tracker.close();
        match tokio::time::timeout(SHUTDOWN_TIMEOUT, self.tracker.wait()).await {
            Ok(()) => info!("All workers shut down"),
            Err(_) => warn!("Worker shutdown timeout reached"),
        }
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            active_workers: self.active.load(Ordering::SeqCst),
            baseline_workers: self.baseline,
            max_workers: self.max_workers,
            queue_length: self.queued.load(Ordering::SeqCst),
            queue_capacity: self.queue_capacity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn pool_config(workers: usize, queue: usize, max: usize, idle_secs: u64) -> ThreadPoolConfig {
        ThreadPoolConfig {
            worker_count: workers,
            queue_size: queue,
            max_workers: max,
            worker_idle_timeout_secs: idle_secs,
        }
    }

    #[tokio::test]
    async fn jobs_run_to_completion() {
        let pool = WorkerPool::new(&pool_config(2, 8, 4, 30));
        let counter = Arc::new(AtomicUsize::new(0));

        for i in 0..5 {
            let counter = Arc::clone(&counter);
            pool.submit_task(format!("job-{i}"), async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await
            .unwrap();
        }

        tokio::time::timeout(Duration::from_secs(2), async {
            while counter.load(Ordering::SeqCst) < 5 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("all jobs should complete");

        pool.shutdown().await;
    }

    #[tokio::test]
    async fn failing_job_does_not_poison_workers() {
        let pool = WorkerPool::new(&pool_config(1, 8, 2, 30));
        let done = Arc::new(AtomicUsize::new(0));

        pool.submit_task("bad", async { anyhow::bail!("boom") })
            .await
            .unwrap();

        let flag = Arc::clone(&done);
        pool.submit_task("good", async move {
            flag.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .await
        .unwrap();

        tokio::time::timeout(Duration::from_secs(2), async {
            while done.load(Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("worker should survive a failed job");

        pool.shutdown().await;
    }

    #[tokio::test]
    async fn pressure_spawns_extra_workers() {
        let pool = WorkerPool::new(&pool_config(1, 4, 4, 30));
        let gate = Arc::new(tokio::sync::Notify::new());

        // Occupy the lone baseline worker and stack the queue strictly past
        // half (the spawn check fires on queue length > capacity/2).
        for i in 0..5 {
            let gate = Arc::clone(&gate);
            pool.submit_task(format!("blocker-{i}"), async move {
                gate.notified().await;
                Ok(())
            })
            .await
            .unwrap();
        }

        assert!(pool.stats().active_workers > 1);

        gate.notify_waiters();
        // Wake any worker that started waiting after the first notify.
        for _ in 0..8 {
            gate.notify_waiters();
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn full_queue_reports_backpressure() {
        let pool = WorkerPool::new(&pool_config(1, 1, 1, 30));
        let gate = Arc::new(tokio::sync::Notify::new());

        // One job occupies the worker, one fills the queue.
        for i in 0..2 {
            let gate = Arc::clone(&gate);
            pool.submit_task(format!("blocker-{i}"), async move {
                gate.notified().await;
                Ok(())
            })
            .await
            .unwrap();
        }

        let err = pool
            .submit_task("overflow", async { Ok(()) })
            .await
            .unwrap_err();
        assert_eq!(err, PoolError::QueueFull);

        for _ in 0..8 {
            gate.notify_waiters();
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn submit_after_shutdown_is_rejected() {
        let pool = WorkerPool::new(&pool_config(1, 4, 2, 30));
        pool.shutdown().await;
        let err = pool.submit_task("late", async { Ok(()) }).await.unwrap_err();
        assert_eq!(err, PoolError::ShuttingDown);
    }

    #[tokio::test]
    async fn idle_workers_shrink_to_baseline() {
        let pool = WorkerPool::new(&pool_config(1, 4, 4, 1));
        let gate = Arc::new(tokio::sync::Notify::new());

        for i in 0..5 {
            let gate = Arc::clone(&gate);
            pool.submit_task(format!("blocker-{i}"), async move {
                gate.notified().await;
                Ok(())
            })
            .await
            .unwrap();
        }
        assert!(pool.stats().active_workers > 1);

        for _ in 0..8 {
            gate.notify_waiters();
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        // Idle timeout is one second; give the surplus workers time to reap.
        tokio::time::timeout(Duration::from_secs(5), async {
            while pool.stats().active_workers > 1 {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        })
        .await
        .expect("surplus workers should exit after idling");

        assert_eq!(pool.stats().active_workers, 1);
        pool.shutdown().await;
    }
}
