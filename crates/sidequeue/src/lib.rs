//! # sidequeue
//!
//! A bounded pool of background workers for fire-and-forget side effects.
//!
//! Request handlers hand off slow work (sending a welcome email, warming a
//! cache, notifying a webhook) to the pool and return immediately. The pool
//! runs each job exactly once on one of a fixed number of tokio tasks.
//!
//! ## Features
//!
//! - **Non-blocking submit**: `submit` never waits; a full queue sheds the job
//! - **FIFO dequeue**: jobs leave the queue in submission order
//! - **Cooperative cancellation**: handlers observe a shared cancellation token
//! - **Shutdown barrier**: `stop` returns only after every worker has exited
//! - **Structured logging**: every lifecycle step is a `tracing` event
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  submit (try_send)   ┌──────────────────────────┐
//! │ Job producer │ ───────────────────▶ │  bounded mpsc queue (Q)  │
//! └──────────────┘   full → drop+warn   └────────────┬─────────────┘
//!                                                    │ recv (shared)
//!                         ┌──────────────────────────┼──────────────────┐
//!                         ▼                          ▼                  ▼
//!                    [worker 0]                 [worker 1]   ...   [worker N-1]
//!                         │                          │                  │
//!                         └──── CancellationToken ───┴──────────────────┘
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use sidequeue::prelude::*;
//!
//! # async fn run() -> Result<(), WorkerPoolError> {
//! let pool = WorkerPool::with_capacity(4, 64)?;
//! pool.start()?;
//!
//! pool.submit(Job::from_fn(
//!     "send_welcome_email",
//!     serde_json::Map::new(),
//!     |_ctx, job| async move {
//!         tracing::info!(job_id = %job.id, "sending email");
//!         Ok(())
//!     },
//! ));
//!
//! pool.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod job;
pub mod users;
pub mod worker;

/// Prelude for common imports
pub mod prelude {
    pub use crate::config::{ConfigError, ShutdownMode, WorkerPoolConfig};
    pub use crate::job::{Job, JobContext, JobError, JobHandler, Payload};
    pub use crate::worker::{PoolStatsSnapshot, WorkerPool, WorkerPoolError, WorkerPoolStatus};
}

// Re-export key types at crate root
pub use config::{ConfigError, ShutdownMode, WorkerPoolConfig};
pub use job::{Job, JobContext, JobError, JobHandler, Payload};
pub use worker::{PoolStatsSnapshot, WorkerPool, WorkerPoolError, WorkerPoolStatus};
