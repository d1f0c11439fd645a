//! Job execution context

use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use uuid::Uuid;

/// Context provided to a job handler during execution
///
/// The context carries the pool's cancellation token. Cancellation is
/// cooperative: the pool never interrupts a running handler, so long-running
/// handlers should check it between steps.
///
/// # Example
///
/// ```ignore
/// async fn handle(&self, ctx: JobContext, job: Job) -> Result<(), JobError> {
///     for chunk in chunks(&job.payload) {
///         tokio::select! {
///             result = upload(chunk) => result?,
///             _ = ctx.cancelled() => return Err(JobError::cancelled()),
///         }
///     }
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct JobContext {
    /// Index of the worker executing the job
    pub worker_id: usize,

    /// ID of the job being executed
    pub job_id: Uuid,

    cancel: CancellationToken,
}

impl JobContext {
    /// Create a new job context
    pub fn new(worker_id: usize, job_id: Uuid, cancel: CancellationToken) -> Self {
        Self {
            worker_id,
            job_id,
            cancel,
        }
    }

    /// Check if the pool has requested cancellation
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Get a future that resolves when cancellation is requested
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    /// A child token, cancelled together with the pool
    ///
    /// Useful for handing cancellation to helper tasks spawned by a handler.
    pub fn child_token(&self) -> CancellationToken {
        self.cancel.child_token()
    }
}
