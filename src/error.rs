//! Error types used by the fencing layer, its collaborators and work units.
//!
//! This module defines five enums:
//!
//! - [`StoreError`]: failures of the [`Keystore`](crate::Keystore) collaborator.
//! - [`QueueError`]: failures of the job queue collaborator (lock renewal, discard).
//! - [`UpstreamError`]: failures of the upstream work backend.
//! - [`WorkError`]: what a work unit returns when it does not produce an outcome.
//! - [`AttemptError`]: the terminal classification of one job attempt, as
//!   returned by [`Coordinator::execute`](crate::Coordinator::execute).
//!
//! All of them provide an `as_label` helper for logs and metrics.
//! [`AttemptError::is_unrecoverable`] is the one the queue adapter must honor.

use std::time::Duration;

use thiserror::Error;

use crate::cancel::{AbortReason, Aborted};

/// # Errors produced by a keystore backend.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The backend could not be reached or refused the operation.
    #[error("keystore unavailable: {reason}")]
    Unavailable {
        /// Backend-provided detail.
        reason: String,
    },
}

impl StoreError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            StoreError::Unavailable { .. } => "store_unavailable",
        }
    }
}

/// # Errors produced by the job queue collaborator.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// The attempt no longer holds the queue lock (reassigned to another attempt).
    #[error("lock for job {job_id} is held by another attempt")]
    LockLost {
        /// Job whose lock was lost.
        job_id: String,
    },

    /// The job is unknown to the queue.
    #[error("job {job_id} not found")]
    NotFound {
        /// Requested job id.
        job_id: String,
    },

    /// Transport or backend failure.
    #[error("queue unavailable: {reason}")]
    Unavailable {
        /// Backend-provided detail.
        reason: String,
    },
}

impl QueueError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            QueueError::LockLost { .. } => "queue_lock_lost",
            QueueError::NotFound { .. } => "queue_not_found",
            QueueError::Unavailable { .. } => "queue_unavailable",
        }
    }
}

/// # Errors produced by the upstream work backend.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UpstreamError {
    /// Backend answered with a non-success status.
    #[error("upstream responded with status {status}")]
    Status {
        /// HTTP-like status code.
        status: u16,
    },

    /// Connection or read failure.
    #[error("upstream transport failed: {reason}")]
    Transport {
        /// Transport detail.
        reason: String,
    },

    /// A chunk could not be decoded into a progress update.
    #[error("malformed upstream payload: {reason}")]
    Malformed {
        /// Decoder detail.
        reason: String,
    },

    /// The backend did not answer within the configured duration.
    #[error("upstream timed out after {timeout:?}")]
    Timeout {
        /// Elapsed budget.
        timeout: Duration,
    },
}

/// # Errors returned by a work unit.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkError {
    /// The work observed the abort signal at a suspension point.
    #[error("work aborted ({reason})")]
    Aborted {
        /// Why the signal was raised.
        reason: AbortReason,
    },

    /// Upstream backend failure.
    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    /// Any other genuine failure of the work itself.
    #[error("work failed: {error}")]
    Fail {
        /// Failure detail.
        error: String,
    },
}

impl WorkError {
    /// Builds a [`WorkError::Fail`] from any displayable error.
    pub fn fail(error: impl std::fmt::Display) -> Self {
        WorkError::Fail {
            error: error.to_string(),
        }
    }

    /// True if the error came from cooperative cancellation.
    pub fn is_aborted(&self) -> bool {
        matches!(self, WorkError::Aborted { .. })
    }
}

impl From<Aborted> for WorkError {
    fn from(a: Aborted) -> Self {
        WorkError::Aborted { reason: a.reason }
    }
}

/// # Terminal classification of one job attempt.
///
/// `FencingSuperseded`, `LockExtendFailure` and `AbortedByCancellation` all mean
/// "this attempt lost ownership": they are never retried and never reported to
/// clients. `Upstream` is an ordinary failure of a still-valid owner and follows
/// the queue's retry policy. `DuplicateAttempt` fails fast. `ShuttingDown` means
/// the worker refused the delivery before touching it, so another worker may
/// pick it up.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AttemptError {
    /// This process is already executing an attempt for the job.
    #[error("job {job_id} is already running in this worker")]
    DuplicateAttempt {
        /// Job id that was re-entered.
        job_id: String,
    },

    /// A newer fencing token replaced ours.
    #[error("fencing token for job {job_id} was superseded")]
    FencingSuperseded {
        /// Job id.
        job_id: String,
    },

    /// The queue lock could not be renewed.
    #[error("failed to extend queue lock for job {job_id}")]
    LockExtendFailure {
        /// Job id.
        job_id: String,
    },

    /// The attempt was cancelled for another reason (e.g. worker shutdown).
    #[error("job {job_id} was aborted")]
    AbortedByCancellation {
        /// Job id.
        job_id: String,
    },

    /// The worker is shutting down and refused the attempt before acquiring a token.
    #[error("worker is shutting down, job {job_id} not started")]
    ShuttingDown {
        /// Job id.
        job_id: String,
    },

    /// The work unit failed while the attempt still owned the job.
    #[error("job {job_id} failed: {error}")]
    Upstream {
        /// Job id.
        job_id: String,
        /// Failure detail.
        error: String,
    },

    /// The token could not be acquired.
    #[error("keystore error for job {job_id}: {source}")]
    Keystore {
        /// Job id.
        job_id: String,
        /// Underlying keystore failure.
        source: StoreError,
    },
}

impl AttemptError {
    /// Maps an abort reason into its terminal attempt outcome.
    pub fn from_abort(job_id: &str, reason: AbortReason) -> Self {
        let job_id = job_id.to_string();
        match reason {
            AbortReason::Superseded => AttemptError::FencingSuperseded { job_id },
            AbortReason::LockLost => AttemptError::LockExtendFailure { job_id },
            AbortReason::Shutdown => AttemptError::AbortedByCancellation { job_id },
        }
    }

    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use jobfence::AttemptError;
    ///
    /// let err = AttemptError::FencingSuperseded { job_id: "job-1".into() };
    /// assert_eq!(err.as_label(), "attempt_superseded");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            AttemptError::DuplicateAttempt { .. } => "attempt_duplicate",
            AttemptError::FencingSuperseded { .. } => "attempt_superseded",
            AttemptError::LockExtendFailure { .. } => "attempt_lock_lost",
            AttemptError::AbortedByCancellation { .. } => "attempt_aborted",
            AttemptError::ShuttingDown { .. } => "attempt_refused_shutdown",
            AttemptError::Upstream { .. } => "attempt_failed",
            AttemptError::Keystore { .. } => "attempt_keystore",
        }
    }

    /// Returns a human-readable message with details about the error.
    pub fn as_message(&self) -> String {
        match self {
            AttemptError::DuplicateAttempt { job_id } => format!("duplicate: {job_id}"),
            AttemptError::FencingSuperseded { job_id } => format!("superseded: {job_id}"),
            AttemptError::LockExtendFailure { job_id } => format!("lock lost: {job_id}"),
            AttemptError::AbortedByCancellation { job_id } => format!("aborted: {job_id}"),
            AttemptError::ShuttingDown { job_id } => format!("refused (shutting down): {job_id}"),
            AttemptError::Upstream { job_id, error } => format!("error: {job_id}: {error}"),
            AttemptError::Keystore { job_id, source } => format!("keystore: {job_id}: {source}"),
        }
    }

    /// True for the ownership-loss outcomes (superseded, lock lost, aborted).
    pub fn is_ownership_loss(&self) -> bool {
        matches!(
            self,
            AttemptError::FencingSuperseded { .. }
                | AttemptError::LockExtendFailure { .. }
                | AttemptError::AbortedByCancellation { .. }
        )
    }

    /// Indicates whether the queue may retry this attempt.
    ///
    /// Only `Upstream`, `Keystore` and `ShuttingDown` are retryable.
    ///
    /// # Example
    /// ```
    /// use jobfence::AttemptError;
    ///
    /// let failed = AttemptError::Upstream { job_id: "j".into(), error: "boom".into() };
    /// assert!(failed.is_retryable());
    ///
    /// let stale = AttemptError::LockExtendFailure { job_id: "j".into() };
    /// assert!(!stale.is_retryable());
    /// ```
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AttemptError::Upstream { .. }
                | AttemptError::Keystore { .. }
                | AttemptError::ShuttingDown { .. }
        )
    }

    /// Indicates whether the queue must mark the attempt as permanently unretryable.
    pub fn is_unrecoverable(&self) -> bool {
        !self.is_retryable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abort_reasons_map_to_ownership_loss() {
        for reason in [
            AbortReason::Superseded,
            AbortReason::LockLost,
            AbortReason::Shutdown,
        ] {
            let err = AttemptError::from_abort("job", reason);
            assert!(err.is_ownership_loss());
            assert!(err.is_unrecoverable());
        }
    }

    #[test]
    fn duplicate_is_not_retried() {
        let err = AttemptError::DuplicateAttempt {
            job_id: "job".into(),
        };
        assert!(!err.is_retryable());
        assert!(!err.is_ownership_loss());
    }

    #[test]
    fn refusal_at_shutdown_is_retried_elsewhere() {
        let err = AttemptError::ShuttingDown {
            job_id: "job".into(),
        };
        assert!(err.is_retryable());
        assert!(!err.is_unrecoverable());
        assert!(!err.is_ownership_loss());
        assert_eq!(err.as_label(), "attempt_refused_shutdown");
    }

    #[test]
    fn aborted_converts_into_work_error() {
        let err: WorkError = Aborted {
            reason: AbortReason::LockLost,
        }
        .into();
        assert!(err.is_aborted());
    }
}
