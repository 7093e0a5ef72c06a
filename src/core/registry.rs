//! # Attempt registry: process-local dedup and per-attempt state.
//!
//! The registry holds one entry per job this process is currently executing.
//! [`Registry::claim`] is the `INIT` guard of the attempt state machine: a
//! second claim for the same job fails until the first attempt's
//! [`ActiveGuard`] is dropped, which happens on every exit path.
//!
//! ## State machine
//! ```text
//! INIT ──claim──► (entry) ──acquire──► ACQUIRED ──started──► RUNNING ──┬──► COMPLETED
//!                                                                       ├──► ABORTED
//!                                                                       └──► FAILED
//! ```
//!
//! ## Rules
//! - Claims are keyed by job id only; the attempt number is informational.
//! - Dropping the guard removes the entry; nothing else does.
//! - `abort_all` raises every entry's signal, it does not remove entries.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::cancel::{AbortReason, AbortSignal};
use crate::fencing::FencingToken;

/// Lifecycle of one job attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    /// Claimed locally, no token yet.
    Init,
    /// Token obtained, heartbeat started.
    Acquired,
    /// Work unit executing.
    Running,
    /// `completed` published, token released.
    Completed,
    /// Ownership lost; no terminal entry published.
    Aborted,
    /// Work failed while still owning the job.
    Failed,
}

impl AttemptState {
    /// Upper-case name used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptState::Init => "INIT",
            AttemptState::Acquired => "ACQUIRED",
            AttemptState::Running => "RUNNING",
            AttemptState::Completed => "COMPLETED",
            AttemptState::Aborted => "ABORTED",
            AttemptState::Failed => "FAILED",
        }
    }

    /// True for `COMPLETED`, `ABORTED` and `FAILED`.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AttemptState::Completed | AttemptState::Aborted | AttemptState::Failed
        )
    }
}

impl fmt::Display for AttemptState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of one active attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveAttempt {
    /// Job id.
    pub job_id: String,
    /// Queue attempt number.
    pub attempt: u32,
    /// Current state.
    pub state: AttemptState,
    /// Token held, once acquired.
    pub token: Option<FencingToken>,
}

struct Entry {
    attempt: u32,
    state: AttemptState,
    token: Option<FencingToken>,
    signal: AbortSignal,
}

/// Map of attempts this process is executing.
#[derive(Default)]
pub(crate) struct Registry {
    jobs: Mutex<HashMap<String, Entry>>,
}

impl Registry {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Claims `job_id` for this process. Returns `None` if it is already active.
    pub(crate) fn claim(
        self: &Arc<Self>,
        job_id: &str,
        attempt: u32,
        signal: AbortSignal,
    ) -> Option<ActiveGuard> {
        let mut jobs = self.jobs.lock();
        if jobs.contains_key(job_id) {
            return None;
        }
        jobs.insert(
            job_id.to_string(),
            Entry {
                attempt,
                state: AttemptState::Init,
                token: None,
                signal,
            },
        );
        Some(ActiveGuard {
            registry: Arc::clone(self),
            job_id: job_id.to_string(),
        })
    }

    pub(crate) fn state(&self, job_id: &str) -> Option<AttemptState> {
        self.jobs.lock().get(job_id).map(|e| e.state)
    }

    /// Active attempts sorted by job id.
    pub(crate) fn list(&self) -> Vec<ActiveAttempt> {
        let jobs = self.jobs.lock();
        let mut out: Vec<ActiveAttempt> = jobs
            .iter()
            .map(|(job_id, e)| ActiveAttempt {
                job_id: job_id.clone(),
                attempt: e.attempt,
                state: e.state,
                token: e.token.clone(),
            })
            .collect();
        out.sort_unstable_by(|a, b| a.job_id.cmp(&b.job_id));
        out
    }

    /// Raises every active signal. Returns how many were newly raised.
    pub(crate) fn abort_all(&self, reason: AbortReason) -> usize {
        let signals: Vec<AbortSignal> = self
            .jobs
            .lock()
            .values()
            .map(|e| e.signal.clone())
            .collect();
        signals.iter().filter(|s| s.abort(reason)).count()
    }

    pub(crate) fn len(&self) -> usize {
        self.jobs.lock().len()
    }

    fn update(&self, job_id: &str, f: impl FnOnce(&mut Entry)) {
        if let Some(entry) = self.jobs.lock().get_mut(job_id) {
            f(entry);
        }
    }
}

/// Ownership of one registry entry; removes it on drop.
pub(crate) struct ActiveGuard {
    registry: Arc<Registry>,
    job_id: String,
}

impl ActiveGuard {
    pub(crate) fn acquired(&self, token: &FencingToken) {
        let token = token.clone();
        self.registry.update(&self.job_id, |e| {
            e.token = Some(token);
            e.state = AttemptState::Acquired;
        });
    }

    pub(crate) fn set_state(&self, state: AttemptState) {
        self.registry.update(&self.job_id, |e| e.state = state);
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.registry.jobs.lock().remove(&self.job_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_claim_fails_until_guard_drops() {
        let reg = Registry::new();
        let guard = reg.claim("job-1", 1, AbortSignal::new()).unwrap();
        assert!(reg.claim("job-1", 2, AbortSignal::new()).is_none());
        assert_eq!(reg.state("job-1"), Some(AttemptState::Init));

        drop(guard);
        assert_eq!(reg.len(), 0);
        assert!(reg.claim("job-1", 2, AbortSignal::new()).is_some());
    }

    #[test]
    fn guard_tracks_state_and_token() {
        let reg = Registry::new();
        let guard = reg.claim("job-1", 3, AbortSignal::new()).unwrap();
        let token = FencingToken::issue();
        guard.acquired(&token);
        guard.set_state(AttemptState::Running);

        let active = reg.list();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].attempt, 3);
        assert_eq!(active[0].state, AttemptState::Running);
        assert_eq!(active[0].token.as_ref(), Some(&token));
    }

    #[test]
    fn abort_all_counts_fresh_aborts_only() {
        let reg = Registry::new();
        let a = AbortSignal::new();
        let b = AbortSignal::new();
        let _ga = reg.claim("a", 1, a.clone()).unwrap();
        let _gb = reg.claim("b", 1, b.clone()).unwrap();
        b.abort(AbortReason::LockLost);

        assert_eq!(reg.abort_all(AbortReason::Shutdown), 1);
        assert_eq!(a.reason(), Some(AbortReason::Shutdown));
        assert_eq!(b.reason(), Some(AbortReason::LockLost));
    }
}
