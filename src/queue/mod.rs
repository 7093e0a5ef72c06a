//! # Job queue collaborator.
//!
//! The coordinator does not own a queue. It drives one attempt handed out by an
//! external at-least-once queue through the [`QueueAttempt`] trait: renewing the
//! queue lock from the heartbeat, mirroring progress, and discarding attempts
//! that lost ownership so the queue never retries them.
//!
//! [`MemoryQueue`] is the in-process implementation used by tests and demos.

mod memory;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::QueueError;

pub use memory::{MemoryAttempt, MemoryQueue};

/// One delivery of a job by the queue.
#[async_trait]
pub trait QueueAttempt: Send + Sync + 'static {
    /// Job id (also the queue's idempotency key).
    fn job_id(&self) -> &str;

    /// Attempt number, starting from 1.
    fn attempt(&self) -> u32;

    /// Job payload as submitted.
    fn payload(&self) -> &Value;

    /// Extends this attempt's queue lock by `duration`.
    ///
    /// Fails with [`QueueError::LockLost`] once the queue handed the job to another attempt.
    async fn extend_lock(&self, duration: Duration) -> Result<(), QueueError>;

    /// Mirrors progress into the queue's own job record.
    async fn update_progress(&self, percent: u8) -> Result<(), QueueError>;

    /// Marks the attempt as permanently failed: the queue must not retry it.
    async fn discard(&self) -> Result<(), QueueError>;
}

/// Shared handle to a queue attempt.
pub type AttemptRef = Arc<dyn QueueAttempt>;

/// Producer side of the queue.
#[async_trait]
pub trait JobQueue: Send + Sync + 'static {
    /// Enqueues `job_id` with `payload`.
    ///
    /// Returns `false` if a job with the same id already exists.
    async fn enqueue(&self, job_id: &str, payload: Value) -> Result<bool, QueueError>;
}
