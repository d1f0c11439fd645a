//! Worker pool for background jobs
//!
//! A fixed set of tokio tasks drains one bounded queue. Submission never
//! blocks; shutdown waits for every worker to exit.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::future::join_all;
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::stats::{PoolStats, PoolStatsSnapshot};
use crate::config::{ConfigError, ShutdownMode, WorkerPoolConfig};
use crate::job::{Job, JobContext};

/// Receiving end of the job queue, shared by all workers
type SharedQueue = Arc<tokio::sync::Mutex<mpsc::Receiver<Job>>>;

/// Worker pool status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerPoolStatus {
    /// Constructed; jobs may be queued but nothing runs them yet
    Created,
    /// Workers are running and accepting jobs
    Running,
    /// `stop` is waiting for workers to exit; new jobs are rejected
    Stopping,
    /// All workers have exited
    Stopped,
}

/// Worker pool errors
#[derive(Debug, thiserror::Error)]
pub enum WorkerPoolError {
    /// Configuration rejected
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// `start` was called outside a tokio runtime
    #[error("worker pool must be started from within a tokio runtime")]
    NoRuntime,
}

/// Fixed-size pool of background workers fed by a bounded queue
///
/// # Example
///
/// ```ignore
/// use sidequeue::{Job, Payload, WorkerPool, WorkerPoolConfig};
///
/// let pool = WorkerPool::new(WorkerPoolConfig::new(4, 100))?;
/// pool.start()?;
///
/// pool.submit(Job::from_fn("send_welcome_email", Payload::new(), |ctx, job| async move {
///     // Send the email...
///     Ok(())
/// }));
///
/// // ... later, graceful shutdown
/// pool.stop().await;
/// ```
pub struct WorkerPool {
    config: WorkerPoolConfig,
    sender: RwLock<Option<mpsc::Sender<Job>>>,
    queue: SharedQueue,
    cancel: CancellationToken,
    stats: Arc<PoolStats>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    status_tx: Arc<watch::Sender<WorkerPoolStatus>>,
}

impl WorkerPool {
    /// Create a new worker pool
    ///
    /// No workers are spawned until [`WorkerPool::start`].
    pub fn new(config: WorkerPoolConfig) -> Result<Self, WorkerPoolError> {
        config.validate()?;

        let (sender, receiver) = mpsc::channel(config.queue_capacity);
        let (status_tx, _) = watch::channel(WorkerPoolStatus::Created);

        Ok(Self {
            config,
            sender: RwLock::new(Some(sender)),
            queue: Arc::new(tokio::sync::Mutex::new(receiver)),
            cancel: CancellationToken::new(),
            stats: Arc::new(PoolStats::new()),
            workers: Mutex::new(Vec::new()),
            status_tx: Arc::new(status_tx),
        })
    }

    /// Create a pool with default settings apart from its size
    pub fn with_capacity(workers: usize, queue_capacity: usize) -> Result<Self, WorkerPoolError> {
        Self::new(WorkerPoolConfig::new(workers, queue_capacity))
    }

    /// Spawn the workers
    ///
    /// Calling `start` on a pool that is already running, or that has been
    /// stopped, logs a warning and does nothing.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerPoolError::NoRuntime`] when called outside a tokio
    /// runtime.
    #[instrument(skip(self), fields(workers = self.config.workers))]
    pub fn start(&self) -> Result<(), WorkerPoolError> {
        let runtime = Handle::try_current().map_err(|_| WorkerPoolError::NoRuntime)?;

        let mut workers = self.workers.lock();
        let status = self.status();
        if status != WorkerPoolStatus::Created {
            warn!(?status, "Worker pool already started, ignoring start");
            return Ok(());
        }

        info!(
            workers = self.config.workers,
            queue_capacity = self.config.queue_capacity,
            shutdown_mode = ?self.config.shutdown_mode,
            "Starting worker pool"
        );

        for worker_id in 0..self.config.workers {
            workers.push(runtime.spawn(worker_loop(
                worker_id,
                Arc::clone(&self.queue),
                self.cancel.clone(),
                Arc::clone(&self.stats),
            )));
        }

        self.status_tx.send_replace(WorkerPoolStatus::Running);
        Ok(())
    }

    /// Hand a job to the pool without waiting
    ///
    /// The job is dropped with a warning when the pool is stopping or
    /// stopped, or when the queue is full. The caller never learns the
    /// outcome; see [`WorkerPool::stats`] for the totals.
    pub fn submit(&self, job: Job) {
        // Held across the send so `stop` cannot close the queue mid-submit.
        let sender = self.sender.read();

        let tx = match sender.as_ref() {
            Some(tx) if !self.cancel.is_cancelled() => tx,
            _ => {
                self.reject_stopped(&job);
                return;
            }
        };

        let job_id = job.id;
        let job_kind = job.kind.clone();

        match tx.try_send(job) {
            Ok(()) => {
                self.stats.job_submitted();
                debug!(%job_id, %job_kind, "Job submitted");
            }
            Err(TrySendError::Full(job)) => {
                self.stats.job_dropped_queue_full();
                warn!(
                    job_id = %job.id,
                    job_kind = %job.kind,
                    queue_capacity = self.config.queue_capacity,
                    "Job queue full, dropping job"
                );
            }
            Err(TrySendError::Closed(job)) => self.reject_stopped(&job),
        }
    }

    fn reject_stopped(&self, job: &Job) {
        self.stats.job_dropped_stopped();
        warn!(
            job_id = %job.id,
            job_kind = %job.kind,
            "Cannot submit job, pool is stopped"
        );
    }

    /// Stop the pool and wait for every worker to exit
    ///
    /// New submissions are rejected from the moment this is called. What
    /// happens to queued jobs depends on [`ShutdownMode`]; anything still
    /// queued once the workers are gone is abandoned.
    ///
    /// The teardown runs on its own task, so dropping this future (for
    /// example under a timeout) does not leave the pool half stopped; a later
    /// `stop` still returns once the pool reaches [`WorkerPoolStatus::Stopped`].
    /// Calling `stop` again (or concurrently) logs a warning and waits for
    /// that teardown. Must not be awaited from inside a job handler of the
    /// same pool.
    #[instrument(skip(self), fields(shutdown_mode = ?self.config.shutdown_mode))]
    pub async fn stop(&self) {
        let mut status_rx = self.status_tx.subscribe();

        let handles = {
            let mut workers = self.workers.lock();
            match self.status() {
                WorkerPoolStatus::Stopping | WorkerPoolStatus::Stopped => None,
                WorkerPoolStatus::Created | WorkerPoolStatus::Running => {
                    self.status_tx.send_replace(WorkerPoolStatus::Stopping);
                    Some(std::mem::take(&mut *workers))
                }
            }
        };

        match handles {
            Some(handles) => {
                info!(workers = handles.len(), "Stopping worker pool...");

                // Close the submission path; dropping the only sender closes the queue.
                self.sender.write().take();

                let teardown = Teardown {
                    config: self.config.clone(),
                    queue: Arc::clone(&self.queue),
                    cancel: self.cancel.clone(),
                    stats: Arc::clone(&self.stats),
                    status_tx: Arc::clone(&self.status_tx),
                }
                .run(handles);

                match Handle::try_current() {
                    Ok(runtime) => {
                        runtime.spawn(teardown);
                    }
                    // Outside tokio the teardown is driven by this caller.
                    Err(_) => teardown.await,
                }
            }
            None => warn!("Worker pool is already stopping, waiting for it to finish"),
        }

        // The sender lives in `self`, so this only fails if the pool is gone.
        let _ = status_rx
            .wait_for(|status| *status == WorkerPoolStatus::Stopped)
            .await;
    }

    /// Get current status
    pub fn status(&self) -> WorkerPoolStatus {
        *self.status_tx.borrow()
    }

    /// Check if submissions can currently be queued
    pub fn is_accepting(&self) -> bool {
        self.sender.read().is_some() && !self.cancel.is_cancelled()
    }

    /// Get a snapshot of the pool's counters
    pub fn stats(&self) -> PoolStatsSnapshot {
        self.stats.snapshot()
    }

    /// Get the pool configuration
    pub fn config(&self) -> &WorkerPoolConfig {
        &self.config
    }

    /// Number of workers spawned by `start`
    pub fn worker_count(&self) -> usize {
        self.config.workers
    }

    /// Capacity of the job queue
    pub fn queue_capacity(&self) -> usize {
        self.config.queue_capacity
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Workers of a pool dropped without `stop` exit after their current job.
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("config", &self.config)
            .field("status", &self.status())
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

/// Everything the shutdown barrier needs, detached from the pool handle
struct Teardown {
    config: WorkerPoolConfig,
    queue: SharedQueue,
    cancel: CancellationToken,
    stats: Arc<PoolStats>,
    status_tx: Arc<watch::Sender<WorkerPoolStatus>>,
}

impl Teardown {
    /// Cancel or drain the workers, wait for all of them, then abandon the
    /// rest of the queue and publish `Stopped`
    async fn run(self, handles: Vec<JoinHandle<()>>) {
        match self.config.shutdown_mode {
            ShutdownMode::Abandon => {
                self.cancel.cancel();
                log_join_results(join_all(handles).await);
            }
            ShutdownMode::Drain => {
                let mut joined = Box::pin(join_all(handles));
                match tokio::time::timeout(self.config.shutdown_timeout, &mut joined).await {
                    Ok(results) => log_join_results(results),
                    Err(_) => {
                        warn!(
                            timeout_ms = self.config.shutdown_timeout.as_millis() as u64,
                            in_flight = self.stats.in_flight(),
                            queued = self.stats.queued(),
                            "Drain timed out, cancelling running jobs"
                        );
                        self.cancel.cancel();
                        log_join_results(joined.await);
                    }
                }
                self.cancel.cancel();
            }
        }

        self.abandon_queued().await;

        self.status_tx.send_replace(WorkerPoolStatus::Stopped);

        let stats = self.stats.snapshot();
        info!(
            completed = stats.completed,
            failed = stats.failed,
            dropped = stats.dropped(),
            "Worker pool stopped"
        );
    }

    /// Discard whatever is left in the queue once no worker can take it
    async fn abandon_queued(&self) {
        let mut queue = self.queue.lock().await;
        queue.close();

        let mut abandoned = 0u64;
        while let Ok(job) = queue.try_recv() {
            debug!(job_id = %job.id, job_kind = %job.kind, "Abandoning queued job");
            abandoned += 1;
        }

        if abandoned > 0 {
            self.stats.jobs_abandoned(abandoned);
            warn!(count = abandoned, "Abandoned queued jobs at shutdown");
        }
    }
}

/// Body of one worker task
///
/// Runs until the pool is cancelled or the queue is closed and empty.
/// Cancellation is checked first, so a cancelled worker never takes
/// another job.
async fn worker_loop(
    worker_id: usize,
    queue: SharedQueue,
    cancel: CancellationToken,
    stats: Arc<PoolStats>,
) {
    info!(worker_id, "Worker started");

    loop {
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                info!(worker_id, "Worker stopped");
                break;
            }
            job = next_job(&queue) => job,
        };

        let Some(job) = next else {
            info!(worker_id, "Job queue closed, worker exiting");
            break;
        };

        execute(worker_id, job, &cancel, &stats).await;
    }
}

/// Wait for the next job; `recv` is cancel-safe so losing the race
/// against cancellation never loses a job
async fn next_job(queue: &tokio::sync::Mutex<mpsc::Receiver<Job>>) -> Option<Job> {
    queue.lock().await.recv().await
}

async fn execute(worker_id: usize, job: Job, cancel: &CancellationToken, stats: &PoolStats) {
    let job_id = job.id;
    let job_kind = job.kind.clone();
    let queued_ms = (Utc::now() - job.created_at).num_milliseconds();

    stats.job_started();
    debug!(worker_id, %job_id, %job_kind, queued_ms, "Worker processing job");

    let started = Instant::now();
    let ctx = JobContext::new(worker_id, job_id, cancel.clone());
    let result = AssertUnwindSafe(job.run(ctx)).catch_unwind().await;
    let elapsed_ms = started.elapsed().as_millis() as u64;

    match result {
        Ok(Ok(())) => {
            stats.job_completed();
            debug!(worker_id, %job_id, %job_kind, elapsed_ms, "Job completed");
        }
        Ok(Err(e)) => {
            stats.job_failed();
            error!(
                worker_id,
                %job_id,
                %job_kind,
                elapsed_ms,
                cancelled = e.is_cancelled(),
                error = %e,
                "Job failed"
            );
        }
        Err(panic) => {
            stats.job_failed();
            error!(
                worker_id,
                %job_id,
                %job_kind,
                elapsed_ms,
                panic = %panic_message(panic.as_ref()),
                "Job panicked"
            );
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}

fn log_join_results(results: Vec<Result<(), JoinError>>) {
    for (worker_id, result) in results.into_iter().enumerate() {
        if let Err(e) = result {
            error!(worker_id, "Worker task ended abnormally: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{JobError, Payload};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn counting_job(counter: Arc<AtomicUsize>) -> Job {
        Job::from_fn("count", Payload::new(), move |_ctx, _job| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
    }

    async fn wait_for_finished(pool: &WorkerPool, n: u64) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while pool.stats().finished() < n {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("jobs did not finish in time");
    }

    #[test]
    fn test_new_rejects_invalid_sizes() {
        assert!(matches!(
            WorkerPool::with_capacity(0, 10),
            Err(WorkerPoolError::Config(_))
        ));
        assert!(matches!(
            WorkerPool::with_capacity(2, 0),
            Err(WorkerPoolError::Config(_))
        ));
        assert!(matches!(
            WorkerPool::with_capacity(1, usize::MAX),
            Err(WorkerPoolError::Config(ConfigError::Invalid(_)))
        ));
    }

    #[test]
    fn test_new_does_not_start() {
        let pool = WorkerPool::with_capacity(3, 5).unwrap();
        assert_eq!(pool.status(), WorkerPoolStatus::Created);
        assert_eq!(pool.worker_count(), 3);
        assert_eq!(pool.queue_capacity(), 5);
        assert!(pool.is_accepting());
    }

    #[test]
    fn test_start_outside_runtime() {
        let pool = WorkerPool::with_capacity(1, 1).unwrap();
        assert!(matches!(pool.start(), Err(WorkerPoolError::NoRuntime)));
        assert_eq!(pool.status(), WorkerPoolStatus::Created);
    }

    #[tokio::test]
    async fn test_lifecycle_transitions() {
        let pool = WorkerPool::with_capacity(2, 4).unwrap();

        pool.start().unwrap();
        assert_eq!(pool.status(), WorkerPoolStatus::Running);

        pool.stop().await;
        assert_eq!(pool.status(), WorkerPoolStatus::Stopped);
        assert!(!pool.is_accepting());

        // No way back
        pool.start().unwrap();
        assert_eq!(pool.status(), WorkerPoolStatus::Stopped);
    }

    #[tokio::test]
    async fn test_double_start_spawns_once() {
        let pool = WorkerPool::with_capacity(2, 4).unwrap();
        pool.start().unwrap();
        pool.start().unwrap();

        assert_eq!(pool.workers.lock().len(), 2);
        pool.stop().await;
    }

    #[tokio::test]
    async fn test_stop_survives_dropped_caller() {
        let pool = WorkerPool::with_capacity(1, 1).unwrap();
        pool.start().unwrap();

        pool.submit(Job::from_fn("slow", Payload::new(), |_, _| async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(())
        }));
        tokio::time::sleep(Duration::from_millis(20)).await;

        let first = tokio::time::timeout(Duration::from_millis(10), pool.stop()).await;
        assert!(first.is_err(), "first stop should still be waiting");

        tokio::time::timeout(Duration::from_secs(2), pool.stop())
            .await
            .expect("a later stop should finish the teardown");
        assert_eq!(pool.status(), WorkerPoolStatus::Stopped);
        assert_eq!(pool.workers.lock().len(), 0);
    }

    #[tokio::test]
    async fn test_submit_before_start_waits_for_workers() {
        let counter = Arc::new(AtomicUsize::new(0));
        let pool = WorkerPool::with_capacity(1, 4).unwrap();

        pool.submit(counting_job(counter.clone()));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert_eq!(pool.stats().queued, 1);

        pool.start().unwrap();
        wait_for_finished(&pool, 1).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        pool.stop().await;
    }

    #[tokio::test]
    async fn test_stop_without_start_abandons_queue() {
        let counter = Arc::new(AtomicUsize::new(0));
        let pool = WorkerPool::with_capacity(3, 4).unwrap();
        pool.submit(counting_job(counter.clone()));
        pool.submit(counting_job(counter.clone()));

        tokio::time::timeout(Duration::from_secs(1), pool.stop())
            .await
            .expect("stop should return promptly");

        assert_eq!(pool.status(), WorkerPoolStatus::Stopped);
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        let stats = pool.stats();
        assert_eq!(stats.abandoned, 2);
        assert_eq!(stats.queued, 0);
    }

    #[tokio::test]
    async fn test_panicking_job_does_not_kill_worker() {
        let counter = Arc::new(AtomicUsize::new(0));
        let pool = WorkerPool::with_capacity(1, 4).unwrap();
        pool.start().unwrap();

        pool.submit(Job::from_fn("explode", Payload::new(), |_, job| async move {
            if job.kind == "explode" {
                panic!("handler blew up");
            }
            Ok(())
        }));
        pool.submit(counting_job(counter.clone()));

        wait_for_finished(&pool, 2).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        let stats = pool.stats();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.in_flight, 0);

        pool.stop().await;
    }

    #[tokio::test]
    async fn test_handler_sees_worker_and_job_ids() {
        let pool = WorkerPool::with_capacity(1, 1).unwrap();
        pool.start().unwrap();

        let job = Job::from_fn("ids", Payload::new(), |ctx, job| async move {
            if ctx.job_id == job.id && ctx.worker_id == 0 && !ctx.is_cancelled() {
                Ok(())
            } else {
                Err(JobError::new("context does not match job"))
            }
        });
        pool.submit(job);

        wait_for_finished(&pool, 1).await;
        assert_eq!(pool.stats().completed, 1);
        pool.stop().await;
    }

    #[test]
    fn test_panic_message() {
        let boxed: Box<dyn Any + Send> = Box::new("static message");
        assert_eq!(panic_message(boxed.as_ref()), "static message");

        let boxed: Box<dyn Any + Send> = Box::new(String::from("owned message"));
        assert_eq!(panic_message(boxed.as_ref()), "owned message");

        let boxed: Box<dyn Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(boxed.as_ref()), "non-string panic payload");
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&WorkerPoolStatus::Stopping).unwrap();
        assert_eq!(json, "\"stopping\"");
    }
}
