//! # Work units and their execution context.
//!
//! - [`Work`] - trait for job work that honors the abort signal
//! - [`WorkFn`] - closure-backed work
//! - [`WorkContext`] - per-attempt handle (token, signal, publishing)
//! - [`SimulatedResearch`] - fixed six-step simulation
//! - [`StreamingResearch`] - relays an upstream [`ProgressSource`]
//! - [`SseDecoder`] - `data: {json}` line decoder for streaming bodies
//! - `HttpSource` - reqwest-backed upstream (feature `http`)

mod context;
#[cfg(feature = "http")]
mod http;
mod simulated;
mod sse;
mod streaming;
#[allow(clippy::module_inception)]
mod work;
mod work_fn;

pub use context::WorkContext;
#[cfg(feature = "http")]
pub use http::HttpSource;
pub use simulated::SimulatedResearch;
pub use sse::{SseDecoder, decode_stream};
pub use streaming::{ProgressSource, ProgressStream, ProgressUpdate, StreamingResearch};
pub use work::{Outcome, Work};
pub use work_fn::{WorkFn, WorkRef};
