//! HTTP upstream speaking `text/event-stream` (feature `http`).

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use crate::error::UpstreamError;
use crate::work::sse::decode_stream;
use crate::work::streaming::{ProgressSource, ProgressStream};

/// POSTs `{query, jobId}` to a research backend and decodes its SSE body.
#[derive(Clone, Debug)]
pub struct HttpSource {
    client: reqwest::Client,
    url: String,
    timeout: Option<Duration>,
}

impl HttpSource {
    /// Source for `url` with a default client.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            timeout: None,
        }
    }

    /// Uses a caller-configured client.
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    /// Bounds the time until response headers arrive.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn map_err(&self, err: reqwest::Error) -> UpstreamError {
        match self.timeout {
            Some(timeout) if err.is_timeout() => UpstreamError::Timeout { timeout },
            _ => UpstreamError::Transport {
                reason: err.to_string(),
            },
        }
    }
}

#[async_trait]
impl ProgressSource for HttpSource {
    async fn open(&self, query: &str, job_id: &str) -> Result<ProgressStream, UpstreamError> {
        tracing::debug!(url = %self.url, job_id, "calling upstream");

        let request = self
            .client
            .post(&self.url)
            .json(&json!({ "query": query, "jobId": job_id }));
        let send = request.send();
        let response = match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, send)
                .await
                .map_err(|_| UpstreamError::Timeout { timeout })?,
            None => send.await,
        }
        .map_err(|e| self.map_err(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(UpstreamError::Status {
                status: status.as_u16(),
            });
        }
        Ok(decode_stream(response.bytes_stream()))
    }
}
