//! # Work abstraction.
//!
//! A [`Work`] unit is what a job actually does once the coordinator holds a
//! fencing token for it. It receives a [`WorkContext`] and must stop at the
//! next suspension point once the context's signal is raised.

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::WorkError;
use crate::work::WorkContext;

/// Result of a successful work unit.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Outcome {
    /// Summary published with the `completed` entry.
    pub summary: String,
    /// Extra fields published with the `completed` entry.
    pub fields: Map<String, Value>,
}

impl Outcome {
    /// Outcome with a summary and no extra fields.
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            fields: Map::new(),
        }
    }

    /// Attaches an extra field.
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }
}

/// # Asynchronous, abortable unit of job work.
///
/// # Example
/// ```
/// use async_trait::async_trait;
/// use jobfence::{Outcome, Work, WorkContext, WorkError};
///
/// struct Echo;
///
/// #[async_trait]
/// impl Work for Echo {
///     fn name(&self) -> &str { "echo" }
///
///     async fn run(&self, ctx: WorkContext) -> Result<Outcome, WorkError> {
///         ctx.report_progress(100, "done").await?;
///         Ok(Outcome::new(format!("echoed {}", ctx.job_id())))
///     }
/// }
/// ```
#[async_trait]
pub trait Work: Send + Sync + 'static {
    /// Returns a stable, human-readable name.
    fn name(&self) -> &str;

    /// Executes the work until it finishes or observes the abort signal.
    async fn run(&self, ctx: WorkContext) -> Result<Outcome, WorkError>;
}
