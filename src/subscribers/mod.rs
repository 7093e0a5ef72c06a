//! # Runtime event subscribers.
//!
//! This module provides the [`Subscribe`] trait, the [`SubscriberSet`] fan-out,
//! and (with feature `logging`) the [`LogWriter`] reference subscriber.
//!
//! ## Architecture
//! ```text
//! Coordinator / Heartbeat ── publish(Event) ──► Bus ──► subscriber_listener
//!                                                            │
//!                                                  SubscriberSet::emit(&Event)
//!                                                   ┌────────┼────────┐
//!                                                   ▼        ▼        ▼
//!                                               LogWriter  Metrics  Custom
//! ```
//!
//! ## Implementing custom subscribers
//! ```no_run
//! use jobfence::{Event, EventKind, Subscribe};
//! use async_trait::async_trait;
//!
//! struct TakeoverCounter;
//!
//! #[async_trait]
//! impl Subscribe for TakeoverCounter {
//!     async fn on_event(&self, event: &Event) {
//!         if event.kind == EventKind::TokenInvalidated {
//!             // increment a counter
//!         }
//!     }
//!
//!     fn name(&self) -> &'static str { "takeover-counter" }
//! }
//! ```

#[cfg(feature = "logging")]
mod log;
mod set;
mod subscribe;

#[cfg(feature = "logging")]
pub use log::LogWriter;
pub use set::SubscriberSet;
pub use subscribe::Subscribe;
