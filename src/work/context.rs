//! # Per-attempt context handed to work units.
//!
//! Every suspending helper checks the attempt's [`AbortSignal`] first, so a
//! work unit written only in terms of these helpers cannot publish after it
//! lost ownership of the job.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::cancel::AbortSignal;
use crate::error::WorkError;
use crate::fencing::FencingToken;
use crate::queue::AttemptRef;
use crate::stream::{EventBody, EventLog, EventRecord};

/// Handle a [`Work`](crate::Work) unit uses to talk to the outside world.
///
/// Cheap to clone.
#[derive(Clone)]
pub struct WorkContext {
    worker_id: Arc<str>,
    token: FencingToken,
    attempt: AttemptRef,
    signal: AbortSignal,
    log: EventLog,
}

impl WorkContext {
    pub(crate) fn new(
        worker_id: Arc<str>,
        token: FencingToken,
        attempt: AttemptRef,
        signal: AbortSignal,
        log: EventLog,
    ) -> Self {
        Self {
            worker_id,
            token,
            attempt,
            signal,
            log,
        }
    }

    /// Job being worked on.
    pub fn job_id(&self) -> &str {
        self.attempt.job_id()
    }

    /// Queue attempt number, starting from 1.
    pub fn attempt(&self) -> u32 {
        self.attempt.attempt()
    }

    /// Id of this worker process.
    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Fencing token this attempt publishes under.
    pub fn token(&self) -> &FencingToken {
        &self.token
    }

    /// Job payload.
    pub fn payload(&self) -> &Value {
        self.attempt.payload()
    }

    /// The attempt's abort signal.
    pub fn signal(&self) -> &AbortSignal {
        &self.signal
    }

    /// Fails with [`WorkError::Aborted`] if ownership was lost.
    #[inline]
    pub fn checkpoint(&self) -> Result<(), WorkError> {
        Ok(self.signal.check()?)
    }

    /// Interruptible delay.
    pub async fn sleep(&self, duration: Duration) -> Result<(), WorkError> {
        Ok(self.signal.sleep(duration).await?)
    }

    /// Drives `fut` unless the signal fires first; on abort `fut` is dropped.
    pub async fn race<F: Future>(&self, fut: F) -> Result<F::Output, WorkError> {
        Ok(self.signal.race(fut).await?)
    }

    /// Appends an entry to the job's log under this attempt's token.
    pub fn publish(&self, body: EventBody) -> Result<EventRecord, WorkError> {
        self.checkpoint()?;
        Ok(self
            .log
            .publish(self.job_id(), &self.token, &self.worker_id, body))
    }

    /// Publishes a `progress` entry and mirrors `percent` into the queue.
    pub async fn report_progress(
        &self,
        percent: u8,
        message: impl Into<String>,
    ) -> Result<(), WorkError> {
        let percent = percent.min(100);
        self.publish(EventBody::progress(percent, message))?;
        self.race(self.attempt.update_progress(percent))
            .await?
            .map_err(WorkError::fail)
    }
}

impl std::fmt::Debug for WorkContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkContext")
            .field("job_id", &self.job_id())
            .field("attempt", &self.attempt())
            .field("worker_id", &self.worker_id)
            .field("token", &self.token.short())
            .field("aborted", &self.signal.is_aborted())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::cancel::AbortReason;
    use crate::queue::{JobQueue, MemoryQueue};
    use crate::stream::Status;

    pub(crate) async fn context_for(job_id: &str) -> (WorkContext, MemoryQueue, EventLog) {
        let queue = MemoryQueue::new();
        queue
            .enqueue(job_id, serde_json::json!({"query": "rust"}))
            .await
            .unwrap();
        let attempt = queue.deliver(job_id).unwrap();
        let log = EventLog::new();
        let ctx = WorkContext::new(
            Arc::from("worker-t"),
            FencingToken::issue(),
            attempt,
            AbortSignal::new(),
            log.clone(),
        );
        (ctx, queue, log)
    }

    #[tokio::test]
    async fn progress_goes_to_log_and_queue() {
        let (ctx, queue, log) = context_for("job-1").await;
        ctx.report_progress(40, "halfway-ish").await.unwrap();

        let history = log.history("job-1");
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, Status::Progress);
        assert_eq!(history[0].worker_id, "worker-t");
        assert_eq!(&history[0].token, ctx.token());
        assert_eq!(queue.progress("job-1"), Some(40));
    }

    #[tokio::test]
    async fn aborted_context_refuses_to_publish() {
        let (ctx, queue, log) = context_for("job-1").await;
        ctx.signal().abort(AbortReason::Superseded);

        let err = ctx.report_progress(10, "late").await.unwrap_err();
        assert_eq!(
            err,
            WorkError::Aborted {
                reason: AbortReason::Superseded
            }
        );
        assert!(log.history("job-1").is_empty());
        assert_eq!(queue.progress("job-1"), Some(0));
    }

    #[tokio::test]
    async fn queue_failure_while_mirroring_is_a_work_failure() {
        let (ctx, queue, _log) = context_for("job-1").await;
        queue.set_offline(true);
        let err = ctx.report_progress(10, "step").await.unwrap_err();
        assert!(matches!(err, WorkError::Fail { .. }));
    }
}
