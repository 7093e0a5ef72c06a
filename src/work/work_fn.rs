//! # Function-backed work (`WorkFn`)
//!
//! [`WorkFn`] wraps a closure `F: Fn(WorkContext) -> Fut`, producing a fresh
//! future per attempt. Shared state, if any, goes in an explicit `Arc<...>`
//! captured by the closure.
//!
//! ## Example
//! ```rust
//! use jobfence::{Outcome, WorkContext, WorkError, WorkFn, WorkRef};
//!
//! let w: WorkRef = WorkFn::arc("noop", |ctx: WorkContext| async move {
//!     ctx.checkpoint()?;
//!     Ok::<_, WorkError>(Outcome::new("nothing to do"))
//! });
//!
//! assert_eq!(w.name(), "noop");
//! ```

use std::borrow::Cow;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::WorkError;
use crate::work::{Outcome, Work, WorkContext};

/// Shared handle to a work unit.
pub type WorkRef = Arc<dyn Work>;

/// Function-backed work implementation.
#[derive(Debug)]
pub struct WorkFn<F> {
    name: Cow<'static, str>,
    f: F,
}

impl<F> WorkFn<F> {
    /// Creates a new function-backed work unit.
    ///
    /// Prefer [`WorkFn::arc`] when you immediately need a [`WorkRef`].
    pub fn new(name: impl Into<Cow<'static, str>>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }

    /// Creates the work unit and returns it as a shared handle.
    pub fn arc(name: impl Into<Cow<'static, str>>, f: F) -> Arc<Self> {
        Arc::new(Self::new(name, f))
    }
}

#[async_trait]
impl<F, Fut> Work for WorkFn<F>
where
    F: Fn(WorkContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Outcome, WorkError>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: WorkContext) -> Result<Outcome, WorkError> {
        (self.f)(ctx).await
    }
}
