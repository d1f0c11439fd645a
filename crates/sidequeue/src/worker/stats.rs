//! Load accounting for worker pools
//!
//! Counts what happened to every submitted job without taking locks.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};

/// Live counters shared between the pool handle and its workers
///
/// Uses atomic operations for thread-safe access without locks.
#[derive(Debug, Default)]
pub struct PoolStats {
    submitted: AtomicU64,
    dropped_queue_full: AtomicU64,
    dropped_stopped: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    abandoned: AtomicU64,
    started: AtomicU64,
    in_flight: AtomicUsize,
}

impl PoolStats {
    /// Create zeroed counters
    pub fn new() -> Self {
        Self::default()
    }

    /// A job entered the queue
    pub fn job_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    /// A job was shed because the queue was full
    pub fn job_dropped_queue_full(&self) {
        self.dropped_queue_full.fetch_add(1, Ordering::Relaxed);
    }

    /// A job was rejected because the pool is stopping or stopped
    pub fn job_dropped_stopped(&self) {
        self.dropped_stopped.fetch_add(1, Ordering::Relaxed);
    }

    /// A worker took a job off the queue
    pub fn job_started(&self) {
        self.started.fetch_add(1, Ordering::Relaxed);
        self.in_flight.fetch_add(1, Ordering::AcqRel);
    }

    /// A job handler returned `Ok`
    pub fn job_completed(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
    }

    /// A job handler returned an error or panicked
    pub fn job_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
    }

    /// Queued jobs discarded at shutdown
    pub fn jobs_abandoned(&self, count: u64) {
        self.abandoned.fetch_add(count, Ordering::Relaxed);
    }

    /// Jobs currently executing
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Jobs accepted but not yet taken by a worker or abandoned
    ///
    /// Derived from the monotonic counters, so a snapshot taken while jobs
    /// move may be off by the few jobs in transit, but never wraps.
    pub fn queued(&self) -> usize {
        let submitted = self.submitted.load(Ordering::Relaxed);
        let left = self.started.load(Ordering::Relaxed) + self.abandoned.load(Ordering::Relaxed);
        submitted.saturating_sub(left) as usize
    }

    /// Copy the counters into a serializable snapshot
    pub fn snapshot(&self) -> PoolStatsSnapshot {
        PoolStatsSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            dropped_queue_full: self.dropped_queue_full.load(Ordering::Relaxed),
            dropped_stopped: self.dropped_stopped.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
            in_flight: self.in_flight(),
            queued: self.queued(),
        }
    }
}

/// Point-in-time view of a pool's counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStatsSnapshot {
    /// Jobs accepted into the queue
    pub submitted: u64,
    /// Jobs shed because the queue was full
    pub dropped_queue_full: u64,
    /// Jobs rejected because the pool was stopping or stopped
    pub dropped_stopped: u64,
    /// Jobs whose handler returned `Ok`
    pub completed: u64,
    /// Jobs whose handler returned an error or panicked
    pub failed: u64,
    /// Queued jobs discarded by `stop`
    pub abandoned: u64,
    /// Jobs executing right now
    pub in_flight: usize,
    /// Jobs waiting in the queue right now
    pub queued: usize,
}

impl PoolStatsSnapshot {
    /// Jobs that never ran: shed, rejected or abandoned
    pub fn dropped(&self) -> u64 {
        self.dropped_queue_full + self.dropped_stopped + self.abandoned
    }

    /// Jobs whose handler has returned
    pub fn finished(&self) -> u64 {
        self.completed + self.failed
    }
}
