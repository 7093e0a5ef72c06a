//! Per-attempt execution state owned by the coordinator.

use crate::cancel::AbortSignal;
use crate::core::heartbeat::Heartbeat;
use crate::core::registry::{ActiveGuard, AttemptState};
use crate::fencing::Lease;

/// Everything one attempt holds between `ACQUIRED` and its terminal state.
///
/// Dropping it stops the heartbeat and frees the registry entry, so cleanup
/// runs on every exit path, panics included.
pub(crate) struct ExecutionContext {
    pub lease: Lease,
    pub signal: AbortSignal,
    heartbeat: Heartbeat,
    guard: ActiveGuard,
}

impl ExecutionContext {
    pub(crate) fn new(lease: Lease, signal: AbortSignal, heartbeat: Heartbeat, guard: ActiveGuard) -> Self {
        Self {
            lease,
            signal,
            heartbeat,
            guard,
        }
    }

    pub(crate) fn set_state(&self, state: AttemptState) {
        self.guard.set_state(state);
    }

    /// Stops renewals once the work unit has returned.
    pub(crate) fn stop_heartbeat(&self) {
        self.heartbeat.stop();
    }
}
