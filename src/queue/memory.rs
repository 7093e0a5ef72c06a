//! In-process queue with explicit delivery.
//!
//! Nothing is delivered on its own: callers invoke [`MemoryQueue::deliver`] to
//! hand the job to a new attempt. Each delivery takes the lock over, so an
//! earlier attempt's [`extend_lock`](QueueAttempt::extend_lock) starts failing,
//! which is exactly what a stall takeover looks like to the old worker.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use super::{JobQueue, QueueAttempt};
use crate::error::QueueError;

#[derive(Debug)]
struct Slot {
    payload: Value,
    attempts: u32,
    lock: u64,
    progress: u8,
    extensions: u32,
    discarded: bool,
}

#[derive(Debug, Default)]
struct Shared {
    jobs: Mutex<HashMap<String, Slot>>,
    offline: AtomicBool,
}

impl Shared {
    fn check_online(&self) -> Result<(), QueueError> {
        if self.offline.load(AtomicOrdering::Acquire) {
            return Err(QueueError::Unavailable {
                reason: "queue offline".into(),
            });
        }
        Ok(())
    }
}

/// In-memory [`JobQueue`] whose deliveries are driven by the caller.
#[derive(Clone, Debug, Default)]
pub struct MemoryQueue {
    shared: Arc<Shared>,
}

impl MemoryQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Hands `job_id` to a new attempt, taking the lock away from any previous one.
    pub fn deliver(&self, job_id: &str) -> Result<Arc<MemoryAttempt>, QueueError> {
        self.shared.check_online()?;
        let mut jobs = self.shared.jobs.lock();
        let slot = jobs.get_mut(job_id).ok_or_else(|| QueueError::NotFound {
            job_id: job_id.to_string(),
        })?;

        slot.attempts += 1;
        slot.lock += 1;
        Ok(Arc::new(MemoryAttempt {
            shared: Arc::clone(&self.shared),
            job_id: job_id.to_string(),
            attempt: slot.attempts,
            lock: slot.lock,
            payload: slot.payload.clone(),
        }))
    }

    /// Simulates a queue outage: every call fails with [`QueueError::Unavailable`].
    pub fn set_offline(&self, offline: bool) {
        self.shared.offline.store(offline, AtomicOrdering::Release);
    }

    /// Number of deliveries made for `job_id`.
    pub fn attempts(&self, job_id: &str) -> u32 {
        self.read(job_id, |s| s.attempts).unwrap_or(0)
    }

    /// Last progress mirrored for `job_id`.
    pub fn progress(&self, job_id: &str) -> Option<u8> {
        self.read(job_id, |s| s.progress)
    }

    /// Number of successful lock extensions for `job_id`, across attempts.
    pub fn extensions(&self, job_id: &str) -> u32 {
        self.read(job_id, |s| s.extensions).unwrap_or(0)
    }

    /// True if an attempt discarded `job_id`.
    pub fn is_discarded(&self, job_id: &str) -> bool {
        self.read(job_id, |s| s.discarded).unwrap_or(false)
    }

    fn read<T>(&self, job_id: &str, f: impl FnOnce(&Slot) -> T) -> Option<T> {
        self.shared.jobs.lock().get(job_id).map(f)
    }
}

#[async_trait]
impl JobQueue for MemoryQueue {
    async fn enqueue(&self, job_id: &str, payload: Value) -> Result<bool, QueueError> {
        self.shared.check_online()?;
        let mut jobs = self.shared.jobs.lock();
        if jobs.contains_key(job_id) {
            return Ok(false);
        }
        jobs.insert(
            job_id.to_string(),
            Slot {
                payload,
                attempts: 0,
                lock: 0,
                progress: 0,
                extensions: 0,
                discarded: false,
            },
        );
        Ok(true)
    }
}

/// Attempt handed out by [`MemoryQueue::deliver`].
#[derive(Debug)]
pub struct MemoryAttempt {
    shared: Arc<Shared>,
    job_id: String,
    attempt: u32,
    lock: u64,
    payload: Value,
}

impl MemoryAttempt {
    fn with_slot<T>(&self, f: impl FnOnce(&mut Slot) -> T) -> Result<T, QueueError> {
        self.shared.check_online()?;
        let mut jobs = self.shared.jobs.lock();
        let slot = jobs.get_mut(&self.job_id).ok_or_else(|| QueueError::NotFound {
            job_id: self.job_id.clone(),
        })?;
        Ok(f(slot))
    }
}

#[async_trait]
impl QueueAttempt for MemoryAttempt {
    fn job_id(&self) -> &str {
        &self.job_id
    }

    fn attempt(&self) -> u32 {
        self.attempt
    }

    fn payload(&self) -> &Value {
        &self.payload
    }

    async fn extend_lock(&self, _duration: Duration) -> Result<(), QueueError> {
        self.with_slot(|slot| {
            if slot.lock != self.lock {
                return Err(QueueError::LockLost {
                    job_id: self.job_id.clone(),
                });
            }
            slot.extensions += 1;
            Ok(())
        })?
    }

    async fn update_progress(&self, percent: u8) -> Result<(), QueueError> {
        self.with_slot(|slot| slot.progress = percent.min(100))
    }

    async fn discard(&self) -> Result<(), QueueError> {
        self.with_slot(|slot| slot.discarded = true)
    }
}
