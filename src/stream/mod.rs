//! Job event log: records, live fan-out, and epoch reconciliation.
//!
//! ## Contents
//! - [`EventRecord`], [`EventBody`], [`Status`] entry model and wire form
//! - [`EventLog`], [`Subscription`] append-only log with per-job listeners
//! - [`reconcile`], [`epochs`], [`Epoch`] read-side collapse to one authoritative epoch
//!
//! The log is written by whoever currently believes it owns a job, which during
//! a takeover may be two workers at once. Readers that need a single answer go
//! through [`EventLog::valid_history`].

mod log;
mod reconcile;
mod record;

pub use log::{EventLog, Subscription};
pub use reconcile::{Epoch, epochs, reconcile};
pub use record::{EventBody, EventRecord, Status};
