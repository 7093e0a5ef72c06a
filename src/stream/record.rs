//! # Event log entries.
//!
//! [`EventRecord`] is what the log stores and what subscribers receive.
//! [`EventBody`] is what a publisher hands to [`EventLog::publish`](crate::EventLog::publish);
//! the log stamps position, worker, token and timestamp.
//!
//! ## Wire form
//! ```text
//! {"position":3,"status":"progress","workerId":"w2","token":"00061f…-k2x9q0ab",
//!  "timestamp":"2025-01-01T00:00:00Z","percent":50,"message":"Deep analysis..."}
//! ```

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::fencing::FencingToken;

/// Keys owned by the record envelope; body fields with these names are dropped.
const RESERVED: [&str; 5] = ["position", "status", "workerId", "token", "timestamp"];

/// Lifecycle status of a log entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// An owner started working on the job.
    Started,
    /// Incremental progress.
    Progress,
    /// Terminal success.
    Completed,
    /// Terminal failure of a still-valid owner.
    Error,
    /// A new owner took over; earlier progress should be discarded by clients.
    Reset,
}

impl Status {
    /// Wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Started => "started",
            Status::Progress => "progress",
            Status::Completed => "completed",
            Status::Error => "error",
            Status::Reset => "reset",
        }
    }

    /// True for `completed` and `error`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Status::Completed | Status::Error)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// One append-only log entry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    /// Per-job log position, starting at 1.
    pub position: u64,
    /// Lifecycle status.
    pub status: Status,
    /// Worker that published the entry.
    pub worker_id: String,
    /// Token that was current for the publisher at publish time.
    pub token: FencingToken,
    /// Publish time.
    pub timestamp: DateTime<Utc>,
    /// Status-specific fields.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl EventRecord {
    /// Looks up a status-specific field.
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }
}

/// Payload handed to the log by a publisher.
#[derive(Clone, Debug, PartialEq)]
pub struct EventBody {
    /// Lifecycle status.
    pub status: Status,
    /// Status-specific fields.
    pub fields: Map<String, Value>,
}

impl EventBody {
    /// Creates a body with no fields.
    pub fn new(status: Status) -> Self {
        Self {
            status,
            fields: Map::new(),
        }
    }

    /// `started` for the given 1-based attempt.
    pub fn started(attempt: u32) -> Self {
        Self::new(Status::Started).with("attempt", attempt)
    }

    /// `progress` at `percent` with a human-readable step message.
    pub fn progress(percent: u8, message: impl Into<String>) -> Self {
        Self::new(Status::Progress)
            .with("percent", percent)
            .with("message", message.into())
    }

    /// `completed` with the work summary.
    pub fn completed(summary: impl Into<String>) -> Self {
        Self::new(Status::Completed).with("summary", summary.into())
    }

    /// `error` with the failure message.
    pub fn error(message: impl Into<String>) -> Self {
        Self::new(Status::Error).with("error", message.into())
    }

    /// `reset` naming the token that was taken over.
    pub fn reset(previous: &FencingToken) -> Self {
        Self::new(Status::Reset).with("previousToken", previous.to_string())
    }

    /// Attaches a field. Envelope keys (`position`, `status`, `workerId`,
    /// `token`, `timestamp`) are ignored.
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        if !RESERVED.contains(&key) {
            self.fields.insert(key.to_string(), value.into());
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn wire_form_flattens_fields() {
        let token = FencingToken::issue();
        let body = EventBody::progress(50, "Deep analysis...");
        let rec = EventRecord {
            position: 3,
            status: body.status,
            worker_id: "w2".into(),
            token: token.clone(),
            timestamp: Utc::now(),
            fields: body.fields,
        };

        let wire = serde_json::to_value(&rec).unwrap();
        assert_eq!(wire["status"], json!("progress"));
        assert_eq!(wire["workerId"], json!("w2"));
        assert_eq!(wire["token"], json!(token.to_string()));
        assert_eq!(wire["percent"], json!(50));
        assert_eq!(wire["message"], json!("Deep analysis..."));
        assert!(wire["timestamp"].is_string());

        let back: EventRecord = serde_json::from_value(wire).unwrap();
        assert_eq!(back, rec);
    }

    #[test]
    fn envelope_keys_cannot_be_overridden() {
        let body = EventBody::completed("done")
            .with("status", "error")
            .with("token", "forged")
            .with("query", "rust");
        assert_eq!(body.status, Status::Completed);
        assert!(!body.fields.contains_key("status"));
        assert!(!body.fields.contains_key("token"));
        assert_eq!(body.fields["query"], json!("rust"));
    }

    #[test]
    fn terminal_statuses() {
        assert!(Status::Completed.is_terminal());
        assert!(Status::Error.is_terminal());
        assert!(!Status::Reset.is_terminal());
        assert_eq!(Status::Reset.to_string(), "reset");
    }
}
