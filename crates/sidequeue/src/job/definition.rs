//! Job and handler definitions

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::JobContext;

/// Job-specific data, opaque to the pool
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// Error type for job failures
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobError {
    /// Error message
    pub message: String,

    /// Error type/code for programmatic handling
    pub error_type: Option<String>,

    /// Additional error details (for debugging)
    pub details: Option<serde_json::Value>,
}

impl JobError {
    /// Error type attached by [`JobError::cancelled`]
    pub const CANCELLED: &'static str = "cancelled";

    /// Create a new error
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            error_type: None,
            details: None,
        }
    }

    /// The handler gave up because the pool is shutting down
    pub fn cancelled() -> Self {
        Self::new("job cancelled by pool shutdown").with_type(Self::CANCELLED)
    }

    /// Set the error type
    pub fn with_type(mut self, error_type: impl Into<String>) -> Self {
        self.error_type = Some(error_type.into());
        self
    }

    /// Add error details
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Whether this error reports a cooperative abort
    pub fn is_cancelled(&self) -> bool {
        self.error_type.as_deref() == Some(Self::CANCELLED)
    }
}

impl std::fmt::Display for JobError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.error_type {
            Some(error_type) => write!(f, "{} ({})", self.message, error_type),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for JobError {}

impl From<anyhow::Error> for JobError {
    fn from(err: anyhow::Error) -> Self {
        Self::new(format!("{err:#}"))
    }
}

/// The action a job performs
///
/// Any `Fn(JobContext, Job) -> impl Future<Output = Result<(), JobError>>`
/// closure is a handler, so most callers never implement this by hand.
///
/// # Example
///
/// ```ignore
/// struct SendWelcomeEmail {
///     mailer: Arc<dyn Mailer>,
/// }
///
/// #[async_trait]
/// impl JobHandler for SendWelcomeEmail {
///     async fn handle(&self, ctx: JobContext, job: Job) -> Result<(), JobError> {
///         if ctx.is_cancelled() {
///             return Err(JobError::cancelled());
///         }
///         let email = job.payload["email"].as_str().unwrap_or_default();
///         self.mailer.send_welcome(email).await?;
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    /// Execute the job
    ///
    /// The returned error is logged by the worker and otherwise discarded.
    async fn handle(&self, ctx: JobContext, job: Job) -> Result<(), JobError>;
}

#[async_trait]
impl<F, Fut> JobHandler for F
where
    F: Fn(JobContext, Job) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), JobError>> + Send + 'static,
{
    async fn handle(&self, ctx: JobContext, job: Job) -> Result<(), JobError> {
        (self)(ctx, job).await
    }
}

/// A unit of asynchronous work
///
/// Not `Clone`: each job is delivered to at most one worker under its own id.
///
/// ```compile_fail
/// fn assert_clone<T: Clone>() {}
/// assert_clone::<sidequeue::Job>();
/// ```
pub struct Job {
    /// Unique job ID (UUID v7, time-ordered)
    pub id: Uuid,

    /// What the job is for; used in logs only, never for dispatch
    pub kind: String,

    /// Job-specific data
    pub payload: Payload,

    /// When the job was built
    pub created_at: DateTime<Utc>,

    handler: Arc<dyn JobHandler>,
}

impl Job {
    /// Create a job from a handler value
    pub fn new(kind: impl Into<String>, payload: Payload, handler: impl JobHandler) -> Self {
        Self::with_shared_handler(kind, payload, Arc::new(handler))
    }

    /// Create a job from a closure
    pub fn from_fn<F, Fut>(kind: impl Into<String>, payload: Payload, f: F) -> Self
    where
        F: Fn(JobContext, Job) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), JobError>> + Send + 'static,
    {
        Self::new(kind, payload, f)
    }

    /// Create a job that shares a handler with other jobs
    pub fn with_shared_handler(
        kind: impl Into<String>,
        payload: Payload,
        handler: Arc<dyn JobHandler>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            kind: kind.into(),
            payload,
            created_at: Utc::now(),
            handler,
        }
    }

    /// Look up a payload value
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.payload.get(key)
    }

    /// Run the job's handler, consuming the job
    pub async fn run(self, ctx: JobContext) -> Result<(), JobError> {
        let handler = Arc::clone(&self.handler);
        handler.handle(ctx, self).await
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("payload", &self.payload)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}
