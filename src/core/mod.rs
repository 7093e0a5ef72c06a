//! Runtime core: attempt orchestration and lifecycle.
//!
//! The public API from this module is [`Coordinator`] (with its builder),
//! [`Config`] and the attempt state types.
//!
//! Internal modules:
//! - [`coordinator`]: runs one attempt through `INIT → ACQUIRED → RUNNING → terminal`;
//! - [`heartbeat`]: renews the queue lock and re-validates the token;
//! - [`registry`]: process-local dedup and per-attempt state;
//! - [`context`]: the per-attempt bundle dropped on every exit path;
//! - [`shutdown`]: OS signal handling.

mod config;
mod context;
mod coordinator;
mod heartbeat;
mod registry;
mod shutdown;

pub use config::Config;
pub use coordinator::{Coordinator, CoordinatorBuilder};
pub use registry::{ActiveAttempt, AttemptState};
