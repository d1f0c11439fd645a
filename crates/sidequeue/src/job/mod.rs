//! Job abstractions
//!
//! A job is a unit of fire-and-forget work handed to the pool. It:
//! - Carries a diagnostic kind and an opaque JSON payload
//! - Owns the handler that performs it
//! - Runs at most once, with no retry
//! - Observes pool cancellation through its context

mod context;
mod definition;

pub use context::JobContext;
pub use definition::{Job, JobError, JobHandler, Payload};
