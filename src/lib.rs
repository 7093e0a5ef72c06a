//! # jobfence
//!
//! **jobfence** is a fencing and lease coordination layer for jobs delivered by
//! an at-least-once queue.
//!
//! A queue that loses a worker's lock will hand the same job to a second
//! worker while the first is still running. jobfence makes sure exactly one of
//! them is recognized as the current owner at any instant, makes the stale one
//! notice and stop on its own, and collapses the log both of them wrote into a
//! single authoritative history.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!            queue delivers attempt                        queue delivers attempt
//!                     │                                             │
//!                     ▼                                             ▼
//! ┌──────────────────────────────────────┐    ┌──────────────────────────────────────┐
//! │ Coordinator (worker A)               │    │ Coordinator (worker B)               │
//! │  - Registry (process-local dedup)    │    │  - Registry                          │
//! │  - Heartbeat per attempt             │    │  - Heartbeat per attempt             │
//! │  - AbortSignal per attempt           │    │  - AbortSignal per attempt           │
//! └───────┬───────────────────┬──────────┘    └──────────┬──────────────┬────────────┘
//!         │ acquire/validate/ │ publish(token)           │ acquire      │ publish(token)
//!         │ release           │                          │              │
//!         ▼                   ▼                          ▼              ▼
//! ┌───────────────────────────────┐        ┌────────────────────────────────────────┐
//! │ TokenAuthority ─► Keystore    │        │ EventLog (append-only, per job)        │
//! │ one live token per job        │        │ entries tagged with the writer's token │
//! └───────────────────────────────┘        └───────────────────┬────────────────────┘
//!                                                               ▼
//!                                               reconcile() ─► authoritative epoch
//! ```
//!
//! ### Takeover
//! ```text
//! A: acquire(t1) ─ started ─ progress ─ progress ─────── tick: validate(t1) = false ─► ABORTED
//! B:                             acquire(t2) ─ started ─ progress ─ ... ─ completed ─► COMPLETED
//! log: [A started] [A p10] [B started] [A p25] [B p10] ... [B completed]
//! valid_history: [B started] [B p10] ... [B completed]
//! ```
//!
//! ## Features
//! | Area              | Description                                                 | Key types / traits                               |
//! |-------------------|-------------------------------------------------------------|--------------------------------------------------|
//! | **Fencing**       | Issue, validate and release ownership tokens.               | [`TokenAuthority`], [`Keystore`], [`FencingToken`] |
//! | **Cancellation**  | Cooperative, one-shot abort shared by heartbeat and work.   | [`AbortSignal`], [`AbortReason`]                 |
//! | **Coordination**  | Attempt state machine, heartbeat, cleanup.                  | [`Coordinator`], [`AttemptState`]                |
//! | **Event log**     | Token-tagged job history with live listeners.               | [`EventLog`], [`EventRecord`], [`reconcile`]     |
//! | **Work**          | Abortable work units and their context.                     | [`Work`], [`WorkFn`], [`WorkContext`]            |
//! | **Queue**         | Collaborator interface plus an in-memory queue.             | [`QueueAttempt`], [`JobQueue`], [`MemoryQueue`]  |
//! | **Subscriber API**| Hook into runtime events (logging, metrics).                | [`Subscribe`], [`Event`]                         |
//! | **Errors**        | Typed outcomes; ownership loss is never retried.            | [`AttemptError`], [`WorkError`]                  |
//!
//! ## Optional features
//! - `logging`: exports a built-in [`LogWriter`] rendering events through `tracing`.
//! - `http`: exports `HttpSource`, a `reqwest` upstream speaking `text/event-stream`.
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use jobfence::{
//!     Config, Coordinator, EventLog, JobQueue, MemoryKeystore, MemoryQueue, Outcome,
//!     WorkContext, WorkError, WorkFn, WorkRef,
//! };
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let log = EventLog::new();
//!     let coordinator = Coordinator::builder(Config::default(), MemoryKeystore::arc(), log.clone())
//!         .build();
//!
//!     let work: WorkRef = WorkFn::arc("two-steps", |ctx: WorkContext| async move {
//!         ctx.report_progress(50, "halfway").await?;
//!         ctx.sleep(Duration::from_millis(5)).await?;
//!         ctx.report_progress(100, "done").await?;
//!         Ok::<_, WorkError>(Outcome::new("all good"))
//!     });
//!
//!     let queue = MemoryQueue::new();
//!     queue.enqueue("job-7", serde_json::json!({ "query": "fencing" })).await?;
//!     coordinator.execute(queue.deliver("job-7")?, work).await?;
//!
//!     for entry in log.valid_history("job-7") {
//!         println!("{} {}", entry.position, entry.status);
//!     }
//!     Ok(())
//! }
//! ```

mod cancel;
mod core;
mod error;
mod events;
mod fencing;
mod queue;
mod stream;
mod subscribers;
mod work;

// ---- Public re-exports ----

pub use cancel::{AbortReason, AbortSignal, Aborted};
pub use crate::core::{ActiveAttempt, AttemptState, Config, Coordinator, CoordinatorBuilder};
pub use error::{AttemptError, QueueError, StoreError, UpstreamError, WorkError};
pub use events::{Bus, Event, EventKind};
pub use fencing::{
    FencingToken, Grant, Keystore, KeystoreRef, Lease, MemoryKeystore, ParseTokenError,
    TokenAuthority, TokenRecord,
};
pub use queue::{AttemptRef, JobQueue, MemoryAttempt, MemoryQueue, QueueAttempt};
pub use stream::{
    Epoch, EventBody, EventLog, EventRecord, Status, Subscription, epochs, reconcile,
};
pub use subscribers::{Subscribe, SubscriberSet};
pub use work::{
    Outcome, ProgressSource, ProgressStream, ProgressUpdate, SimulatedResearch, SseDecoder,
    StreamingResearch, Work, WorkContext, WorkFn, WorkRef, decode_stream,
};

// Optional: expose a simple built-in logger subscriber (demo/reference).
// Enable with: `--features logging`
#[cfg(feature = "logging")]
pub use subscribers::LogWriter;

// Optional: HTTP upstream for streaming research.
// Enable with: `--features http`
#[cfg(feature = "http")]
pub use work::HttpSource;
