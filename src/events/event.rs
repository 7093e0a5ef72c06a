//! # Runtime events emitted by the coordinator and heartbeats.
//!
//! These are process-local observability events, distinct from the per-job
//! [`EventRecord`](crate::EventRecord)s that clients read. The [`EventKind`]
//! enum classifies them in three groups:
//! - **Ownership events**: token acquired/released/invalidated, lock lost
//! - **Attempt events**: rejected, running, completed, failed, aborted
//! - **Subscriber events**: overflow, panic
//!
//! ## Ordering guarantees
//! Each event has a process-wide sequence number (`seq`) that increases monotonically.
//!
//! ## Example
//! ```rust
//! use jobfence::{Event, EventKind};
//!
//! let ev = Event::new(EventKind::TokenInvalidated)
//!     .with_job("research-1")
//!     .with_worker("worker-a")
//!     .with_attempt(2);
//!
//! assert_eq!(ev.kind, EventKind::TokenInvalidated);
//! assert_eq!(ev.job.as_deref(), Some("research-1"));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::SystemTime;

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of runtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Subscriber events ===
    /// Subscriber panicked during event processing.
    ///
    /// Sets:
    /// - `reason`: `subscriber=<name> panic=<info>`
    SubscriberPanicked,

    /// Subscriber dropped an event (queue full or worker closed).
    ///
    /// Sets:
    /// - `reason`: `subscriber=<name> reason=<full|closed>`
    SubscriberOverflow,

    // === Attempt lifecycle ===
    /// The process is already executing an attempt for this job.
    ///
    /// Sets: `job`, `worker`, `attempt`
    AttemptRejected,

    /// A fencing token was issued for the attempt (state `ACQUIRED`).
    ///
    /// Sets: `job`, `worker`, `token`, `attempt`, `reason` (`superseded=<short>` on takeover)
    TokenAcquired,

    /// The work unit started (state `RUNNING`).
    ///
    /// Sets: `job`, `worker`, `token`, `attempt`
    AttemptRunning,

    /// Heartbeat extended the queue lock and the token is still current.
    ///
    /// Sets: `job`, `worker`, `token`
    LeaseRenewed,

    /// Heartbeat could not extend the queue lock.
    ///
    /// Sets: `job`, `worker`, `token`, `reason`
    LockLost,

    /// Heartbeat found that a newer token replaced ours.
    ///
    /// Sets: `job`, `worker`, `token`
    TokenInvalidated,

    /// The work finished and `completed` was published (state `COMPLETED`).
    ///
    /// Sets: `job`, `worker`, `token`, `attempt`
    AttemptCompleted,

    /// The work failed while still owning the job (state `FAILED`).
    ///
    /// Sets: `job`, `worker`, `token`, `attempt`, `reason`
    AttemptFailed,

    /// The attempt lost ownership and stopped without a terminal entry (state `ABORTED`).
    ///
    /// Sets: `job`, `worker`, `token`, `attempt`, `reason`
    AttemptAborted,

    /// The token was released after completion.
    ///
    /// Sets: `job`, `worker`, `token`
    TokenReleased,

    // === Process events ===
    /// Shutdown requested; active attempts are being aborted.
    ShutdownRequested,
}

/// Runtime event with optional metadata.
///
/// - `seq`: monotonic global sequence for ordering
/// - `at`: wall-clock timestamp (for logs)
/// - other optional fields are set depending on the [`EventKind`]
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,
    /// Job id, if applicable.
    pub job: Option<Arc<str>>,
    /// Worker (holder) id, if applicable.
    pub worker: Option<Arc<str>>,
    /// Short form of the fencing token, if applicable.
    pub token: Option<Arc<str>>,
    /// Attempt number (starting from 1).
    pub attempt: Option<u32>,
    /// Human-readable reason (errors, overflow details, etc.).
    pub reason: Option<Arc<str>>,
}

impl Event {
    /// Creates a new event of the given kind with current timestamp and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            job: None,
            worker: None,
            token: None,
            attempt: None,
            reason: None,
        }
    }

    /// Attaches a job id.
    #[inline]
    pub fn with_job(mut self, job: impl Into<Arc<str>>) -> Self {
        self.job = Some(job.into());
        self
    }

    /// Attaches a worker id.
    #[inline]
    pub fn with_worker(mut self, worker: impl Into<Arc<str>>) -> Self {
        self.worker = Some(worker.into());
        self
    }

    /// Attaches a (short) token.
    #[inline]
    pub fn with_token(mut self, token: impl Into<Arc<str>>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Attaches an attempt number.
    #[inline]
    pub fn with_attempt(mut self, n: u32) -> Self {
        self.attempt = Some(n);
        self
    }

    /// Attaches a human-readable reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Creates a subscriber overflow event.
    #[inline]
    pub fn subscriber_overflow(subscriber: &'static str, reason: &'static str) -> Self {
        Event::new(EventKind::SubscriberOverflow)
            .with_reason(format!("subscriber={subscriber} reason={reason}"))
    }

    /// Creates a subscriber panic event.
    #[inline]
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        Event::new(EventKind::SubscriberPanicked)
            .with_reason(format!("subscriber={subscriber} panic={info}"))
    }
}
