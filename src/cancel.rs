//! # Cooperative abort signal for one job attempt.
//!
//! [`AbortSignal`] is shared by the attempt's heartbeat (which raises it) and the
//! work unit (which observes it). It wraps a [`CancellationToken`] and records
//! the first [`AbortReason`]; later calls to [`AbortSignal::abort`] are no-ops.
//!
//! ## Suspension points
//! ```text
//! work unit                               heartbeat
//!   ├─► signal.check()?        (poll)        │
//!   ├─► signal.race(call)?     ◄── abort ────┤  lock lost / token superseded
//!   ├─► signal.sleep(d)?       ◄── abort ────┘
//!   └─► ...
//! ```
//!
//! - `check` is non-blocking;
//! - `race` drops the raced future on abort, which cancels any in-flight I/O it owns;
//! - `sleep` resolves as soon as the signal fires instead of waiting out `d`.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio::time;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

/// Why an attempt was aborted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AbortReason {
    /// The queue lock could not be extended (reassigned or unreachable).
    LockLost,
    /// A newer fencing token replaced ours.
    Superseded,
    /// The worker is shutting down.
    Shutdown,
}

impl AbortReason {
    /// Returns a short stable label (snake_case).
    pub fn as_label(&self) -> &'static str {
        match self {
            AbortReason::LockLost => "lock_lost",
            AbortReason::Superseded => "superseded",
            AbortReason::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

/// Returned by a suspension point that observed the signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Aborted {
    /// First reason recorded on the signal.
    pub reason: AbortReason,
}

impl fmt::Display for Aborted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "aborted: {}", self.reason)
    }
}

impl std::error::Error for Aborted {}

/// One-shot, cloneable abort signal.
///
/// Clones share state. A signal created with [`AbortSignal::child_of`] is also
/// raised when its parent token is cancelled; the reason then reads as
/// [`AbortReason::Shutdown`].
#[derive(Clone, Debug, Default)]
pub struct AbortSignal {
    token: CancellationToken,
    reason: Arc<OnceLock<AbortReason>>,
}

impl AbortSignal {
    /// Creates a fresh, unraised signal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a signal that is also raised when `parent` is cancelled.
    pub fn child_of(parent: &CancellationToken) -> Self {
        Self {
            token: parent.child_token(),
            reason: Arc::new(OnceLock::new()),
        }
    }

    /// Raises the signal.
    ///
    /// Returns `true` only for the call that actually raised it.
    pub fn abort(&self, reason: AbortReason) -> bool {
        if self.token.is_cancelled() {
            // raised by the parent: pin the reason it already reports
            let _ = self.reason.set(AbortReason::Shutdown);
            return false;
        }
        if self.reason.set(reason).is_err() {
            return false;
        }
        self.token.cancel();
        true
    }

    /// Non-blocking poll.
    #[inline]
    pub fn is_aborted(&self) -> bool {
        self.token.is_cancelled()
    }

    /// The recorded reason, if raised.
    pub fn reason(&self) -> Option<AbortReason> {
        match self.reason.get() {
            Some(r) => Some(*r),
            None if self.token.is_cancelled() => Some(AbortReason::Shutdown),
            None => None,
        }
    }

    /// Completes when the signal is raised.
    pub fn aborted(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }

    /// Returns `Err(Aborted)` if the signal has been raised.
    #[inline]
    pub fn check(&self) -> Result<(), Aborted> {
        match self.reason() {
            Some(reason) => Err(Aborted { reason }),
            None => Ok(()),
        }
    }

    /// Waits `duration` unless the signal fires first.
    pub async fn sleep(&self, duration: Duration) -> Result<(), Aborted> {
        self.check()?;
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(self.aborted_error()),
            _ = time::sleep(duration) => Ok(()),
        }
    }

    /// Drives `fut` to completion unless the signal fires first.
    ///
    /// On abort the future is dropped, releasing whatever it holds.
    pub async fn race<F: Future>(&self, fut: F) -> Result<F::Output, Aborted> {
        self.check()?;
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(self.aborted_error()),
            out = fut => Ok(out),
        }
    }

    fn aborted_error(&self) -> Aborted {
        Aborted {
            reason: self.reason().unwrap_or(AbortReason::Shutdown),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    #[test]
    fn first_reason_wins() {
        let signal = AbortSignal::new();
        assert!(signal.check().is_ok());

        assert!(signal.abort(AbortReason::Superseded));
        assert!(!signal.abort(AbortReason::LockLost));

        assert!(signal.is_aborted());
        assert_eq!(signal.reason(), Some(AbortReason::Superseded));
        assert_eq!(
            signal.check(),
            Err(Aborted {
                reason: AbortReason::Superseded
            })
        );
    }

    #[test]
    fn parent_cancellation_reads_as_shutdown() {
        let parent = CancellationToken::new();
        let signal = AbortSignal::child_of(&parent);
        parent.cancel();
        assert!(signal.is_aborted());
        assert_eq!(signal.reason(), Some(AbortReason::Shutdown));
    }

    #[tokio::test(start_paused = true)]
    async fn sleep_resolves_promptly_on_abort() {
        let signal = AbortSignal::new();
        let trigger = signal.clone();
        tokio::spawn(async move {
            time::sleep(Duration::from_secs(1)).await;
            trigger.abort(AbortReason::LockLost);
        });

        let start = Instant::now();
        let res = signal.sleep(Duration::from_secs(60)).await;

        assert_eq!(
            res,
            Err(Aborted {
                reason: AbortReason::LockLost
            })
        );
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn sleep_completes_without_abort() {
        let signal = AbortSignal::new();
        let start = Instant::now();
        signal.sleep(Duration::from_millis(250)).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(250));
    }

    #[tokio::test]
    async fn race_drops_inflight_future() {
        struct DropFlag(Arc<std::sync::atomic::AtomicBool>);
        impl Drop for DropFlag {
            fn drop(&mut self) {
                self.0.store(true, std::sync::atomic::Ordering::SeqCst);
            }
        }

        let dropped = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = DropFlag(dropped.clone());
        let signal = AbortSignal::new();
        let trigger = signal.clone();

        let pending = async move {
            let _flag = flag;
            std::future::pending::<()>().await
        };
        tokio::spawn(async move { trigger.abort(AbortReason::Superseded) });

        let res = signal.race(pending).await;
        assert!(res.is_err());
        assert!(dropped.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn race_refuses_to_start_after_abort() {
        let signal = AbortSignal::new();
        signal.abort(AbortReason::Shutdown);
        let res = signal.race(async { 42 }).await;
        assert!(res.is_err());
    }
}
