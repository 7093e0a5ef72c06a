//! # Research backed by a streaming upstream.
//!
//! [`StreamingResearch`] opens a progress stream from a [`ProgressSource`] and
//! republishes every update under the attempt's fencing token. Each read is
//! raced against the abort signal; on abort the stream is dropped, which
//! cancels the in-flight upstream call.

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use serde::Deserialize;

use crate::error::{UpstreamError, WorkError};
use crate::work::{Outcome, Work, WorkContext};

/// One progress update from the upstream.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ProgressUpdate {
    /// Completion percentage (0..=100).
    pub percent: u8,
    /// Human-readable step.
    pub message: String,
    /// Final summary, usually on the last update.
    pub summary: Option<String>,
}

/// Stream of upstream progress updates.
pub type ProgressStream = BoxStream<'static, Result<ProgressUpdate, UpstreamError>>;

/// Upstream that turns a query into a progress stream.
#[async_trait]
pub trait ProgressSource: Send + Sync + 'static {
    /// Starts the upstream call for `job_id`.
    async fn open(&self, query: &str, job_id: &str) -> Result<ProgressStream, UpstreamError>;
}

/// Work unit that relays an upstream progress stream.
#[derive(Debug)]
pub struct StreamingResearch<S> {
    source: S,
}

impl<S: ProgressSource> StreamingResearch<S> {
    /// Wraps `source`.
    pub fn new(source: S) -> Self {
        Self { source }
    }
}

#[async_trait]
impl<S: ProgressSource> Work for StreamingResearch<S> {
    fn name(&self) -> &str {
        "streaming-research"
    }

    async fn run(&self, ctx: WorkContext) -> Result<Outcome, WorkError> {
        let query = ctx
            .payload()
            .get("query")
            .and_then(|q| q.as_str())
            .unwrap_or_default()
            .to_string();

        let mut updates = ctx.race(self.source.open(&query, ctx.job_id())).await??;
        let mut summary = None;

        loop {
            ctx.checkpoint()?;
            let Some(next) = ctx.race(updates.next()).await? else {
                break;
            };
            let update = next?;
            ctx.report_progress(update.percent, update.message).await?;
            if let Some(s) = update.summary.filter(|s| !s.is_empty()) {
                summary = Some(s);
            }
        }

        let summary =
            summary.unwrap_or_else(|| format!("Research completed for: {}", ctx.job_id()));
        Ok(Outcome::new(summary).with("query", query))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::cancel::AbortReason;
    use crate::work::context::tests::context_for;
    use futures::stream;

    struct Scripted {
        updates: Vec<Result<ProgressUpdate, UpstreamError>>,
        gap: Duration,
    }

    #[async_trait]
    impl ProgressSource for Scripted {
        async fn open(&self, query: &str, _job_id: &str) -> Result<ProgressStream, UpstreamError> {
            assert_eq!(query, "rust");
            let gap = self.gap;
            Ok(stream::iter(self.updates.clone())
                .then(move |u| async move {
                    tokio::time::sleep(gap).await;
                    u
                })
                .boxed())
        }
    }

    fn update(percent: u8, summary: Option<&str>) -> Result<ProgressUpdate, UpstreamError> {
        Ok(ProgressUpdate {
            percent,
            message: format!("{percent}%"),
            summary: summary.map(str::to_string),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn relays_updates_and_keeps_last_summary() {
        let (ctx, queue, log) = context_for("job-1").await;
        let work = StreamingResearch::new(Scripted {
            updates: vec![update(30, None), update(100, Some("final"))],
            gap: Duration::from_millis(10),
        });

        let outcome = work.run(ctx).await.unwrap();
        assert_eq!(outcome.summary, "final");
        assert_eq!(outcome.fields["query"], "rust");
        assert_eq!(log.history("job-1").len(), 2);
        assert_eq!(queue.progress("job-1"), Some(100));
    }

    #[tokio::test(start_paused = true)]
    async fn missing_summary_falls_back_to_default() {
        let (ctx, _queue, _log) = context_for("job-1").await;
        let work = StreamingResearch::new(Scripted {
            updates: vec![update(100, None)],
            gap: Duration::ZERO,
        });
        let outcome = work.run(ctx).await.unwrap();
        assert_eq!(outcome.summary, "Research completed for: job-1");
    }

    #[tokio::test(start_paused = true)]
    async fn upstream_error_is_a_failure_not_an_abort() {
        let (ctx, _queue, _log) = context_for("job-1").await;
        let work = StreamingResearch::new(Scripted {
            updates: vec![update(10, None), Err(UpstreamError::Status { status: 502 })],
            gap: Duration::ZERO,
        });
        let err = work.run(ctx).await.unwrap_err();
        assert_eq!(err, WorkError::Upstream(UpstreamError::Status { status: 502 }));
    }

    #[tokio::test(start_paused = true)]
    async fn abort_interrupts_a_pending_read() {
        let (ctx, _queue, log) = context_for("job-1").await;
        let signal = ctx.signal().clone();
        let work = StreamingResearch::new(Scripted {
            updates: vec![update(10, None), update(20, None)],
            gap: Duration::from_secs(60),
        });

        let run = tokio::spawn(async move { work.run(ctx).await });
        tokio::time::sleep(Duration::from_secs(61)).await;
        signal.abort(AbortReason::Superseded);

        let err = run.await.unwrap().unwrap_err();
        assert!(err.is_aborted());
        assert_eq!(log.history("job-1").len(), 1);
    }
}
