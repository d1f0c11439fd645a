//! Worker pool for background jobs
//!
//! This module provides:
//! - [`WorkerPool`] - Fixed set of workers draining a bounded queue
//! - [`PoolStats`] - Lock-free counters for submitted, dropped and finished jobs
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       WorkerPool                             │
//! │                                                              │
//! │  submit ──try_send──▶ ┌───────────────────────────────┐     │
//! │   (never blocks)      │  bounded mpsc queue (FIFO)    │     │
//! │   full → drop + warn  └───────────────┬───────────────┘     │
//! │                                       │ shared receiver     │
//! │         ┌─────────────┬───────────────┴──┬─────────────┐    │
//! │         ▼             ▼                  ▼             ▼    │
//! │    [worker 0]    [worker 1]    ...   [worker N-1]           │
//! │         │             │                  │                  │
//! │         └──────── CancellationToken ─────┘                  │
//! │                                                              │
//! │  stop: close queue → cancel / drain → join all → abandon    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use sidequeue::worker::WorkerPool;
//! use sidequeue::{Job, Payload, WorkerPoolConfig};
//!
//! let pool = WorkerPool::new(WorkerPoolConfig::new(4, 100))?;
//! pool.start()?;
//!
//! pool.submit(Job::from_fn("warm_cache", Payload::new(), |ctx, job| async move {
//!     // Do the work...
//!     Ok(())
//! }));
//!
//! // Graceful shutdown
//! pool.stop().await;
//! ```

mod pool;
mod stats;

pub use pool::{WorkerPool, WorkerPoolError, WorkerPoolStatus};
pub use stats::{PoolStats, PoolStatsSnapshot};
