//! Research simulation used when no upstream backend is configured.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::WorkError;
use crate::work::{Outcome, Work, WorkContext};

const STEPS: [(u8, &str); 6] = [
    (10, "Collecting documents..."),
    (25, "First-pass analysis..."),
    (50, "Deep analysis..."),
    (75, "Synthesizing results..."),
    (90, "Writing report..."),
    (100, "Done"),
];

/// Six fixed progress steps, each followed by an interruptible delay.
#[derive(Clone, Debug)]
pub struct SimulatedResearch {
    step_delay: Duration,
}

impl SimulatedResearch {
    /// Simulation with the default 2 s per step.
    pub fn new() -> Self {
        Self {
            step_delay: Duration::from_secs(2),
        }
    }

    /// Overrides the per-step delay.
    pub fn with_step_delay(mut self, delay: Duration) -> Self {
        self.step_delay = delay;
        self
    }

    /// Total wall time of an uninterrupted run.
    pub fn duration(&self) -> Duration {
        self.step_delay * STEPS.len() as u32
    }
}

impl Default for SimulatedResearch {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Work for SimulatedResearch {
    fn name(&self) -> &str {
        "simulated-research"
    }

    async fn run(&self, ctx: WorkContext) -> Result<Outcome, WorkError> {
        for (percent, message) in STEPS {
            ctx.report_progress(percent, message).await?;
            ctx.sleep(self.step_delay).await?;
        }
        Ok(Outcome::new(format!("Research completed for: {}", ctx.job_id())))
    }
}
