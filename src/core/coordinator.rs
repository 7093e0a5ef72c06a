//! # Coordinator: runs one job attempt under a fencing token.
//!
//! The [`Coordinator`] owns the token authority, the event log handle, the
//! runtime event [`Bus`] and a [`SubscriberSet`]. For every attempt the queue
//! delivers it claims the job locally, acquires a fresh token, starts a
//! heartbeat and runs the work unit until it reaches a terminal state.
//!
//! ## Attempt flow
//! ```text
//! execute(attempt, work)
//!   INIT      shut down? ─────────────────── yes ────► Err(ShuttingDown)    (retryable)
//!             registry.claim(job)            ── taken ──► Err(DuplicateAttempt)
//!   ACQUIRED  authority.acquire(job, worker) ── Err ────► Err(Keystore)      (retryable)
//!             Heartbeat::spawn(...)
//!             [reset]  started                  (EventLog, under the new token)
//!   RUNNING   work.run(ctx)
//!             heartbeat.stop()
//!             ├─ signal raised ─► ABORTED    discard(); no terminal entry; Err(from_abort)
//!             ├─ Ok(outcome) ───► COMPLETED  completed; release(job, token); Ok(outcome)
//!             └─ Err(e) ────────► FAILED     error; Err(Upstream)               (retryable)
//!   drop(ExecutionContext) → heartbeat stopped, registry entry removed
//! ```
//!
//! ## Runtime events
//! ```text
//! Coordinator / Heartbeat ── publish(Event) ──► Bus ──► subscriber_listener ──► SubscriberSet::emit
//! ```
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use jobfence::{
//!     Config, Coordinator, EventLog, JobQueue, MemoryKeystore, MemoryQueue, SimulatedResearch,
//! };
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let log = EventLog::new();
//!     let coordinator = Coordinator::builder(Config::default(), MemoryKeystore::arc(), log.clone())
//!         .build();
//!
//!     let queue = MemoryQueue::new();
//!     queue.enqueue("job-1", serde_json::json!({ "query": "fencing" })).await?;
//!     let work = Arc::new(SimulatedResearch::new().with_step_delay(Duration::from_millis(1)));
//!
//!     let outcome = coordinator.execute(queue.deliver("job-1")?, work).await?;
//!     assert_eq!(outcome.summary, "Research completed for: job-1");
//!     assert_eq!(log.valid_history("job-1").len(), 8);
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::cancel::{AbortReason, AbortSignal};
use crate::core::config::Config;
use crate::core::context::ExecutionContext;
use crate::core::heartbeat::{Heartbeat, HeartbeatParams};
use crate::core::registry::{ActiveAttempt, AttemptState, Registry};
use crate::core::shutdown;
use crate::error::{AttemptError, WorkError};
use crate::events::{Bus, Event, EventKind};
use crate::fencing::{Grant, KeystoreRef, TokenAuthority};
use crate::queue::AttemptRef;
use crate::stream::{EventBody, EventLog};
use crate::subscribers::{Subscribe, SubscriberSet};
use crate::work::{Outcome, WorkContext, WorkRef};

/// Builder for a [`Coordinator`].
pub struct CoordinatorBuilder {
    cfg: Config,
    store: KeystoreRef,
    log: EventLog,
    subscribers: Vec<Arc<dyn Subscribe>>,
}

impl CoordinatorBuilder {
    /// Sets runtime event subscribers.
    ///
    /// Subscribers receive [`Event`]s through dedicated workers with bounded queues.
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Builds the coordinator and starts the subscriber fan-out.
    ///
    /// Must be called within a Tokio runtime.
    pub fn build(self) -> Arc<Coordinator> {
        let bus = Bus::new(self.cfg.bus_capacity_clamped());
        let subs = Arc::new(SubscriberSet::new(self.subscribers, bus.clone()));
        let authority = TokenAuthority::new(
            self.store,
            self.cfg.token_ttl,
            self.cfg.key_prefix.as_str(),
        );
        let worker_id: Arc<str> = self.cfg.resolve_worker_id().into();

        let coordinator = Arc::new(Coordinator {
            cfg: self.cfg,
            worker_id,
            authority,
            log: self.log,
            bus,
            subs,
            registry: Registry::new(),
            runtime_token: CancellationToken::new(),
            listener: Mutex::new(None),
        });
        let listener = coordinator.subscriber_listener();
        *coordinator.listener.lock() = listener;
        coordinator
    }
}

/// Runs job attempts under fencing tokens.
pub struct Coordinator {
    cfg: Config,
    worker_id: Arc<str>,
    authority: TokenAuthority,
    log: EventLog,
    bus: Bus,
    subs: Arc<SubscriberSet>,
    registry: Arc<Registry>,
    runtime_token: CancellationToken,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl Coordinator {
    /// Starts building a coordinator over `store` and `log`.
    pub fn builder(cfg: Config, store: KeystoreRef, log: EventLog) -> CoordinatorBuilder {
        CoordinatorBuilder {
            cfg,
            store,
            log,
            subscribers: Vec::new(),
        }
    }

    /// Id this process stamps on tokens and log entries.
    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Effective configuration.
    pub fn config(&self) -> &Config {
        &self.cfg
    }

    /// Token authority shared by every attempt.
    pub fn authority(&self) -> &TokenAuthority {
        &self.authority
    }

    /// The job event log.
    pub fn log(&self) -> &EventLog {
        &self.log
    }

    /// New receiver for runtime events.
    pub fn events(&self) -> broadcast::Receiver<Event> {
        self.bus.subscribe()
    }

    /// State of the attempt currently running for `job_id`, if any.
    pub fn state(&self, job_id: &str) -> Option<AttemptState> {
        self.registry.state(job_id)
    }

    /// Attempts currently running in this process, sorted by job id.
    pub fn active(&self) -> Vec<ActiveAttempt> {
        self.registry.list()
    }

    /// Aborts every active attempt as a shutdown. Returns how many were aborted.
    pub fn abort_all(&self) -> usize {
        let n = self.registry.abort_all(AbortReason::Shutdown);
        if n > 0 {
            tracing::info!(aborted = n, "active attempts aborted");
        }
        n
    }

    /// Aborts every active attempt and refuses new ones.
    pub fn shutdown(&self) {
        self.bus.publish(Event::new(EventKind::ShutdownRequested));
        self.runtime_token.cancel();
        self.abort_all();
    }

    /// True once [`shutdown`](Self::shutdown) was called.
    pub fn is_shut_down(&self) -> bool {
        self.runtime_token.is_cancelled()
    }

    /// Waits for SIGINT/SIGTERM/SIGQUIT (Ctrl-C elsewhere), then shuts down.
    pub async fn shutdown_on_signal(&self) -> std::io::Result<()> {
        tokio::select! {
            res = shutdown::wait_for_shutdown_signal() => {
                res?;
                self.shutdown();
            }
            _ = self.runtime_token.cancelled() => {}
        }
        Ok(())
    }

    /// Refuses new attempts, forwards pending runtime events and waits for
    /// subscribers to process them. Call after the last attempt finished.
    pub async fn close(self: Arc<Self>) {
        self.runtime_token.cancel();
        let listener = self.listener.lock().take();
        if let Some(listener) = listener {
            let _ = listener.await;
        }
        self.subs.shutdown().await;
        tracing::debug!(worker_id = %self.worker_id, "coordinator closed");
    }

    /// Runs one queue attempt of a job to a terminal state.
    ///
    /// On `Err`, the queue adapter must honor
    /// [`AttemptError::is_unrecoverable`]; ownership-loss outcomes have
    /// already been discarded through [`QueueAttempt::discard`](crate::QueueAttempt::discard).
    pub async fn execute(&self, attempt: AttemptRef, work: WorkRef) -> Result<Outcome, AttemptError> {
        let job_id = attempt.job_id().to_string();
        let n = attempt.attempt();

        if self.runtime_token.is_cancelled() {
            tracing::info!(job_id = %job_id, attempt = n, "refusing attempt during shutdown");
            self.publish(EventKind::AttemptRejected, &job_id, |e| {
                e.with_attempt(n).with_reason("shutting_down")
            });
            return Err(AttemptError::ShuttingDown { job_id });
        }

        let signal = AbortSignal::child_of(&self.runtime_token);
        let Some(guard) = self.registry.claim(&job_id, n, signal.clone()) else {
            tracing::warn!(job_id = %job_id, attempt = n, worker_id = %self.worker_id, "attempt already running");
            self.publish(EventKind::AttemptRejected, &job_id, |e| e.with_attempt(n));
            return Err(AttemptError::DuplicateAttempt { job_id });
        };

        let grant = match self.authority.acquire(&job_id, &self.worker_id).await {
            Ok(grant) => grant,
            Err(source) => {
                tracing::error!(job_id = %job_id, error = %source, "token acquisition failed");
                self.publish(EventKind::AttemptFailed, &job_id, |e| {
                    e.with_attempt(n).with_reason(source.as_label())
                });
                return Err(AttemptError::Keystore { job_id, source });
            }
        };
        guard.acquired(&grant.lease.token);
        self.publish(EventKind::TokenAcquired, &job_id, |e| {
            let e = e.with_attempt(n).with_token(grant.lease.token.short());
            match &grant.superseded {
                Some(prev) => e.with_reason(format!("superseded={}", prev.short())),
                None => e,
            }
        });

        let heartbeat = Heartbeat::spawn(HeartbeatParams {
            attempt: Arc::clone(&attempt),
            authority: self.authority.clone(),
            lease: grant.lease.clone(),
            signal: signal.clone(),
            bus: self.bus.clone(),
            period: self.cfg.heartbeat_period(),
            lock_duration: self.cfg.lock_duration,
        });
        let ctx = ExecutionContext::new(grant.lease.clone(), signal.clone(), heartbeat, guard);
        let wctx = WorkContext::new(
            Arc::clone(&self.worker_id),
            grant.lease.token.clone(),
            Arc::clone(&attempt),
            signal,
            self.log.clone(),
        );

        tracing::info!(
            job_id = %job_id,
            attempt = n,
            worker_id = %self.worker_id,
            token = grant.lease.token.short(),
            work = work.name(),
            "attempt started"
        );

        let result = match self.announce(&wctx, &grant, n) {
            Ok(()) => {
                ctx.set_state(AttemptState::Running);
                self.publish(EventKind::AttemptRunning, &job_id, |e| {
                    e.with_attempt(n).with_token(grant.lease.token.short())
                });
                work.run(wctx.clone()).await
            }
            Err(e) => Err(e),
        };
        ctx.stop_heartbeat();

        self.finish(&ctx, &wctx, &attempt, result).await
    }

    /// Publishes `reset` (when enabled and a live token was replaced) and `started`.
    fn announce(&self, wctx: &WorkContext, grant: &Grant, n: u32) -> Result<(), WorkError> {
        if self.cfg.announce_takeover {
            if let Some(prev) = &grant.superseded {
                wctx.publish(EventBody::reset(prev))?;
            }
        }
        wctx.publish(EventBody::started(n).with("message", "attempt took ownership"))?;
        Ok(())
    }

    async fn finish(
        &self,
        ctx: &ExecutionContext,
        wctx: &WorkContext,
        attempt: &AttemptRef,
        result: Result<Outcome, WorkError>,
    ) -> Result<Outcome, AttemptError> {
        let job_id = wctx.job_id();
        let n = wctx.attempt();
        let token = &ctx.lease.token;

        let aborted = match (&result, ctx.signal.reason()) {
            (_, Some(reason)) => Some(reason),
            (Err(WorkError::Aborted { reason }), None) => Some(*reason),
            _ => None,
        };
        if let Some(reason) = aborted {
            return Err(self.abandon(ctx, attempt, reason).await);
        }

        match result {
            Ok(outcome) => {
                let mut body = EventBody::completed(outcome.summary.clone());
                for (k, v) in &outcome.fields {
                    body = body.with(k, v.clone());
                }
                if let Err(WorkError::Aborted { reason }) = wctx.publish(body) {
                    return Err(self.abandon(ctx, attempt, reason).await);
                }

                match self.authority.release(job_id, token).await {
                    Ok(true) => self.publish(EventKind::TokenReleased, job_id, |e| {
                        e.with_token(token.short())
                    }),
                    Ok(false) => {}
                    Err(e) => {
                        tracing::warn!(job_id, error = %e, "token release failed, left to expire");
                    }
                }

                ctx.set_state(AttemptState::Completed);
                tracing::info!(job_id, attempt = n, token = token.short(), "attempt completed");
                self.publish(EventKind::AttemptCompleted, job_id, |e| {
                    e.with_attempt(n).with_token(token.short())
                });
                Ok(outcome)
            }
            Err(err) => {
                let message = err.to_string();
                self.log.publish(
                    job_id,
                    token,
                    &self.worker_id,
                    EventBody::error(message.clone()),
                );

                ctx.set_state(AttemptState::Failed);
                tracing::error!(job_id, attempt = n, error = %message, "attempt failed");
                self.publish(EventKind::AttemptFailed, job_id, |e| {
                    e.with_attempt(n)
                        .with_token(token.short())
                        .with_reason(message.clone())
                });
                Err(AttemptError::Upstream {
                    job_id: job_id.to_string(),
                    error: message,
                })
            }
        }
    }

    /// ABORTED: no terminal entry, no release, attempt discarded.
    async fn abandon(
        &self,
        ctx: &ExecutionContext,
        attempt: &AttemptRef,
        reason: AbortReason,
    ) -> AttemptError {
        let job_id = attempt.job_id();
        ctx.set_state(AttemptState::Aborted);
        tracing::warn!(
            job_id,
            attempt = attempt.attempt(),
            token = ctx.lease.token.short(),
            reason = reason.as_label(),
            "attempt aborted"
        );
        self.publish(EventKind::AttemptAborted, job_id, |e| {
            e.with_attempt(attempt.attempt())
                .with_token(ctx.lease.token.short())
                .with_reason(reason.as_label())
        });

        if let Err(e) = attempt.discard().await {
            tracing::warn!(job_id, error = %e, "failed to discard aborted attempt");
        }
        AttemptError::from_abort(job_id, reason)
    }

    fn publish(&self, kind: EventKind, job_id: &str, f: impl FnOnce(Event) -> Event) {
        let ev = Event::new(kind)
            .with_job(job_id)
            .with_worker(Arc::clone(&self.worker_id));
        self.bus.publish(f(ev));
    }

    /// Subscribes to the bus and forwards events to the subscriber set (fire-and-forget).
    fn subscriber_listener(&self) -> Option<JoinHandle<()>> {
        if self.subs.is_empty() {
            return None;
        }
        let mut rx = self.bus.subscribe();
        let set = Arc::clone(&self.subs);
        let stop = self.runtime_token.clone();
        Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = stop.cancelled() => {
                        while let Ok(ev) = rx.try_recv() {
                            set.emit(&ev);
                        }
                        break;
                    }
                    msg = rx.recv() => match msg {
                        Ok(ev) => set.emit(&ev),
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            tracing::warn!(skipped = n, "subscriber listener lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        }))
    }
}
