//! # Lease heartbeat: keep the queue lock, re-check the fencing token.
//!
//! One heartbeat task runs per attempt, next to the work unit, and talks to it
//! only through the shared [`AbortSignal`].
//!
//! ## Tick
//! ```text
//! every period (first tick one period after start):
//!   extend_lock(lock_duration) ── Err ──► LockLost         ──► abort(LockLost), stop
//!        │ Ok
//!   validate(job, token) ──────── false ─► TokenInvalidated ──► abort(Superseded), stop
//!        │ true              └─── Err ───► LockLost         ──► abort(LockLost), stop
//!   LeaseRenewed
//! ```
//!
//! ## Rules
//! - Ticks are never skipped to catch up (`MissedTickBehavior::Delay`); no jitter.
//! - The first failure raises the signal and ends the loop.
//! - Stopping the heartbeat drops an in-flight tick; it never raises the signal.
//! - Never awaits the work unit.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::cancel::{AbortReason, AbortSignal};
use crate::events::{Bus, Event, EventKind};
use crate::fencing::{Lease, TokenAuthority};
use crate::queue::AttemptRef;

/// Inputs for one heartbeat loop.
pub(crate) struct HeartbeatParams {
    pub attempt: AttemptRef,
    pub authority: TokenAuthority,
    pub lease: Lease,
    pub signal: AbortSignal,
    pub bus: Bus,
    pub period: Duration,
    pub lock_duration: Duration,
}

/// Handle to a running heartbeat. Stops the loop on drop.
pub(crate) struct Heartbeat {
    stop: CancellationToken,
    join: JoinHandle<()>,
}

impl Heartbeat {
    /// Spawns the loop. Must be called within a Tokio runtime.
    pub(crate) fn spawn(params: HeartbeatParams) -> Self {
        let stop = CancellationToken::new();
        let join = tokio::spawn(run(params, stop.clone()));
        Self { stop, join }
    }

    /// Stops scheduling ticks and drops any tick in flight.
    pub(crate) fn stop(&self) {
        self.stop.cancel();
    }

    #[cfg(test)]
    fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        self.stop.cancel();
        self.join.abort();
    }
}

async fn run(p: HeartbeatParams, stop: CancellationToken) {
    let mut ticker = time::interval_at(Instant::now() + p.period, p.period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = stop.cancelled() => return,
            _ = p.signal.aborted() => return,
            _ = ticker.tick() => {}
        }

        let verdict = tokio::select! {
            biased;
            _ = stop.cancelled() => return,
            v = beat(&p) => v,
        };

        if let Err(reason) = verdict {
            if p.signal.abort(reason) {
                tracing::warn!(
                    job_id = %p.lease.job_id,
                    token = p.lease.token.short(),
                    reason = reason.as_label(),
                    "ownership lost, aborting attempt"
                );
            }
            return;
        }
    }
}

/// One renewal: lock first, then token.
async fn beat(p: &HeartbeatParams) -> Result<(), AbortReason> {
    let job_id: &str = &p.lease.job_id;
    let token = &p.lease.token;
    let event = |kind| {
        Event::new(kind)
            .with_job(job_id)
            .with_worker(p.lease.holder_id.clone())
            .with_token(token.short())
    };

    if let Err(e) = p.attempt.extend_lock(p.lock_duration).await {
        p.bus
            .publish(event(EventKind::LockLost).with_reason(e.to_string()));
        return Err(AbortReason::LockLost);
    }

    match p.authority.validate(job_id, token).await {
        Ok(true) => {
            tracing::trace!(job_id, token = token.short(), "lease renewed");
            p.bus.publish(event(EventKind::LeaseRenewed));
            Ok(())
        }
        Ok(false) => {
            p.bus.publish(event(EventKind::TokenInvalidated));
            Err(AbortReason::Superseded)
        }
        Err(e) => {
            p.bus
                .publish(event(EventKind::LockLost).with_reason(e.to_string()));
            Err(AbortReason::LockLost)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use serde_json::Value;

    use super::*;
    use crate::error::QueueError;
    use crate::fencing::MemoryKeystore;
    use crate::queue::QueueAttempt;

    static NULL: Value = Value::Null;

    #[derive(Default)]
    struct CountingAttempt {
        extends: AtomicU32,
        fail_after: Option<u32>,
    }

    #[async_trait]
    impl QueueAttempt for CountingAttempt {
        fn job_id(&self) -> &str {
            "job-1"
        }
        fn attempt(&self) -> u32 {
            1
        }
        fn payload(&self) -> &Value {
            &NULL
        }
        async fn extend_lock(&self, _d: Duration) -> Result<(), QueueError> {
            let n = self.extends.fetch_add(1, Ordering::SeqCst) + 1;
            match self.fail_after {
                Some(limit) if n > limit => Err(QueueError::LockLost {
                    job_id: "job-1".into(),
                }),
                _ => Ok(()),
            }
        }
        async fn update_progress(&self, _p: u8) -> Result<(), QueueError> {
            Ok(())
        }
        async fn discard(&self) -> Result<(), QueueError> {
            Ok(())
        }
    }

    async fn setup(
        attempt: Arc<CountingAttempt>,
    ) -> (Heartbeat, TokenAuthority, AbortSignal, tokio::sync::broadcast::Receiver<Event>) {
        let authority = TokenAuthority::new(MemoryKeystore::arc(), Duration::from_secs(3600), "t:");
        let lease = authority.acquire("job-1", "w1").await.unwrap().lease;
        let signal = AbortSignal::new();
        let bus = Bus::new(64);
        let rx = bus.subscribe();
        let hb = Heartbeat::spawn(HeartbeatParams {
            attempt,
            authority: authority.clone(),
            lease,
            signal: signal.clone(),
            bus,
            period: Duration::from_secs(10),
            lock_duration: Duration::from_secs(30),
        });
        (hb, authority, signal, rx)
    }

    #[tokio::test(start_paused = true)]
    async fn renews_every_period_while_owner() {
        let attempt = Arc::new(CountingAttempt::default());
        let (hb, _auth, signal, mut rx) = setup(attempt.clone()).await;

        time::sleep(Duration::from_secs(35)).await;
        assert_eq!(attempt.extends.load(Ordering::SeqCst), 3);
        assert!(!signal.is_aborted());
        assert_eq!(rx.recv().await.unwrap().kind, EventKind::LeaseRenewed);

        hb.stop();
        time::sleep(Duration::from_secs(30)).await;
        assert_eq!(attempt.extends.load(Ordering::SeqCst), 3);
        assert!(hb.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn newer_token_aborts_as_superseded() {
        let attempt = Arc::new(CountingAttempt::default());
        let (hb, auth, signal, mut rx) = setup(attempt.clone()).await;

        time::sleep(Duration::from_secs(12)).await;
        auth.acquire("job-1", "w2").await.unwrap();

        time::sleep(Duration::from_secs(10)).await;
        assert_eq!(signal.reason(), Some(AbortReason::Superseded));
        assert_eq!(rx.recv().await.unwrap().kind, EventKind::LeaseRenewed);
        assert_eq!(rx.recv().await.unwrap().kind, EventKind::TokenInvalidated);

        time::sleep(Duration::from_secs(60)).await;
        assert_eq!(attempt.extends.load(Ordering::SeqCst), 2);
        assert!(hb.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn lock_failure_skips_validation_and_aborts_once() {
        let attempt = Arc::new(CountingAttempt {
            fail_after: Some(1),
            ..Default::default()
        });
        let (hb, _auth, signal, mut rx) = setup(attempt.clone()).await;

        time::sleep(Duration::from_secs(25)).await;
        assert_eq!(signal.reason(), Some(AbortReason::LockLost));
        assert_eq!(rx.recv().await.unwrap().kind, EventKind::LeaseRenewed);
        let lost = rx.recv().await.unwrap();
        assert_eq!(lost.kind, EventKind::LockLost);
        assert!(lost.reason.is_some());

        time::sleep(Duration::from_secs(60)).await;
        assert_eq!(attempt.extends.load(Ordering::SeqCst), 2);
        assert!(hb.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn external_abort_ends_the_loop() {
        let attempt = Arc::new(CountingAttempt::default());
        let (hb, _auth, signal, _rx) = setup(attempt.clone()).await;

        signal.abort(AbortReason::Shutdown);
        time::sleep(Duration::from_secs(30)).await;
        assert_eq!(attempt.extends.load(Ordering::SeqCst), 0);
        assert!(hb.is_finished());
    }
}
