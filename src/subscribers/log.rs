//! # LogWriter: runtime events rendered through `tracing`
//!
//! A minimal subscriber that turns incoming [`Event`]s into `tracing` records.
//! Use it for demos, or as a reference for a real exporter.
//!
//! ## Example output (with a `fmt` subscriber)
//! ```text
//! INFO  token acquired job=research-1 worker=worker-a token=k2x9q0ab attempt=1
//! INFO  attempt running job=research-1 worker=worker-a attempt=1
//! WARN  token invalidated job=research-1 worker=worker-a token=k2x9q0ab
//! WARN  attempt aborted job=research-1 worker=worker-a reason=superseded
//! ```

use async_trait::async_trait;

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Event writer subscriber.
#[derive(Default)]
pub struct LogWriter;

impl LogWriter {
    /// Construct a new [`LogWriter`].
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let job = e.job.as_deref().unwrap_or("-");
        let worker = e.worker.as_deref().unwrap_or("-");
        let token = e.token.as_deref().unwrap_or("-");
        let reason = e.reason.as_deref().unwrap_or("");

        match e.kind {
            EventKind::TokenAcquired => {
                tracing::info!(job, worker, token, attempt = e.attempt, reason, "token acquired");
            }
            EventKind::AttemptRunning => {
                tracing::info!(job, worker, attempt = e.attempt, "attempt running");
            }
            EventKind::LeaseRenewed => {
                tracing::debug!(job, worker, token, "lease renewed");
            }
            EventKind::AttemptCompleted => {
                tracing::info!(job, worker, attempt = e.attempt, "attempt completed");
            }
            EventKind::TokenReleased => {
                tracing::debug!(job, worker, token, "token released");
            }
            EventKind::AttemptRejected => {
                tracing::warn!(job, worker, attempt = e.attempt, "attempt rejected: already running");
            }
            EventKind::LockLost => {
                tracing::warn!(job, worker, token, reason, "queue lock lost");
            }
            EventKind::TokenInvalidated => {
                tracing::warn!(job, worker, token, "token invalidated");
            }
            EventKind::AttemptAborted => {
                tracing::warn!(job, worker, attempt = e.attempt, reason, "attempt aborted");
            }
            EventKind::AttemptFailed => {
                tracing::error!(job, worker, attempt = e.attempt, reason, "attempt failed");
            }
            EventKind::ShutdownRequested => {
                tracing::info!("shutdown requested");
            }
            EventKind::SubscriberOverflow | EventKind::SubscriberPanicked => {
                tracing::warn!(reason, "subscriber degraded");
            }
        }
    }

    fn name(&self) -> &'static str {
        "LogWriter"
    }
}
