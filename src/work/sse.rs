//! Incremental decoder for `text/event-stream` progress bodies.
//!
//! The upstream emits one JSON object per `data: ` line:
//! ```text
//! data: {"percent": 25, "message": "First-pass analysis..."}
//!
//! data: {"percent": 100, "message": "Done", "summary": "..."}
//! ```
//! Transport chunks may split a line (or a UTF-8 sequence) anywhere; bytes are
//! buffered until the newline arrives. Lines without the `data: ` prefix
//! (comments, `event:`, blank separators) are skipped.

use std::collections::VecDeque;
use std::fmt;

use futures::{Stream, StreamExt, stream};

use crate::error::UpstreamError;
use crate::work::streaming::{ProgressStream, ProgressUpdate};

const DATA_PREFIX: &[u8] = b"data: ";

/// Line-buffering SSE decoder.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: Vec<u8>,
}

impl SseDecoder {
    /// Creates an empty decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one chunk and returns every update completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Result<ProgressUpdate, UpstreamError>> {
        self.buf.extend_from_slice(chunk);
        let mut out = Vec::new();
        while let Some(nl) = self.buf.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=nl).collect();
            if let Some(item) = decode_line(&line[..nl]) {
                out.push(item);
            }
        }
        out
    }

    /// Flushes a trailing line that was never terminated.
    pub fn finish(&mut self) -> Option<Result<ProgressUpdate, UpstreamError>> {
        let line = std::mem::take(&mut self.buf);
        decode_line(&line)
    }

    /// Bytes held back waiting for a newline.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

fn decode_line(line: &[u8]) -> Option<Result<ProgressUpdate, UpstreamError>> {
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    let data = line.strip_prefix(DATA_PREFIX)?;
    Some(
        serde_json::from_slice::<ProgressUpdate>(data).map_err(|e| UpstreamError::Malformed {
            reason: e.to_string(),
        }),
    )
}

/// Turns a byte-chunk stream into a [`ProgressStream`].
///
/// A transport error ends the stream after being yielded.
pub fn decode_stream<S, B, E>(bytes: S) -> ProgressStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: fmt::Display + Send + 'static,
{
    let state = (Box::pin(bytes), SseDecoder::new(), VecDeque::new(), false);
    stream::unfold(
        state,
        |(mut bytes, mut decoder, mut pending, mut done)| async move {
            loop {
                if let Some(item) = pending.pop_front() {
                    return Some((item, (bytes, decoder, pending, done)));
                }
                if done {
                    return None;
                }
                match bytes.next().await {
                    Some(Ok(chunk)) => pending.extend(decoder.push(chunk.as_ref())),
                    Some(Err(e)) => {
                        done = true;
                        pending.push_back(Err(UpstreamError::Transport {
                            reason: e.to_string(),
                        }));
                    }
                    None => {
                        done = true;
                        pending.extend(decoder.finish());
                    }
                }
            }
        },
    )
    .boxed()
}
