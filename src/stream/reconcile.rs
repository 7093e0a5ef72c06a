//! # Epoch reconciliation.
//!
//! A job's log may interleave entries from several owners. Entries sharing a
//! token form an **epoch**. [`reconcile`] collapses the log into one authoritative
//! epoch:
//!
//! ```text
//! history ──► epochs (first-seen order)
//!               ├─ any epoch with `completed`? ──► first such epoch
//!               └─ otherwise                   ──► epoch with the greatest token
//! ```
//!
//! Two epochs can both reach `completed` when a takeover lands after the stale
//! owner's last checkpoint. The first one in log order wins; this is a known
//! ambiguity rather than a chosen policy.
//!
//! The functions here are pure: the same history always yields the same output.

use std::collections::HashMap;

use crate::fencing::FencingToken;
use crate::stream::record::{EventRecord, Status};

/// Entries published under one token, in log order.
#[derive(Debug, Clone, PartialEq)]
pub struct Epoch<'a> {
    /// Token shared by every entry.
    pub token: &'a FencingToken,
    /// Entries in log order.
    pub records: Vec<&'a EventRecord>,
}

impl<'a> Epoch<'a> {
    /// True if the epoch contains a `completed` entry.
    pub fn is_completed(&self) -> bool {
        self.records.iter().any(|r| r.status == Status::Completed)
    }

    /// Worker of the first entry.
    pub fn worker_id(&self) -> Option<&'a str> {
        self.records.first().map(|r| r.worker_id.as_str())
    }

    /// Clones the entries out.
    pub fn to_records(&self) -> Vec<EventRecord> {
        self.records.iter().map(|r| (*r).clone()).collect()
    }
}

/// Partitions `history` into epochs, ordered by first appearance.
pub fn epochs(history: &[EventRecord]) -> Vec<Epoch<'_>> {
    let mut index: HashMap<&FencingToken, usize> = HashMap::new();
    let mut out: Vec<Epoch<'_>> = Vec::new();

    for rec in history {
        let slot = *index.entry(&rec.token).or_insert_with(|| {
            out.push(Epoch {
                token: &rec.token,
                records: Vec::new(),
            });
            out.len() - 1
        });
        out[slot].records.push(rec);
    }
    out
}

/// Returns the authoritative epoch's entries (empty for an empty history).
pub fn reconcile(history: &[EventRecord]) -> Vec<EventRecord> {
    let epochs = epochs(history);

    if let Some(done) = epochs.iter().find(|e| e.is_completed()) {
        return done.to_records();
    }

    epochs
        .iter()
        .max_by(|a, b| a.token.cmp(b.token))
        .map(Epoch::to_records)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::record::EventBody;
    use chrono::Utc;

    fn rec(position: u64, token: &FencingToken, worker: &str, body: EventBody) -> EventRecord {
        EventRecord {
            position,
            status: body.status,
            worker_id: worker.into(),
            token: token.clone(),
            timestamp: Utc::now(),
            fields: body.fields,
        }
    }

    #[test]
    fn empty_history_reconciles_to_nothing() {
        assert!(reconcile(&[]).is_empty());
        assert!(epochs(&[]).is_empty());
    }

    #[test]
    fn takeover_scenario_keeps_only_the_completing_epoch() {
        let t1 = FencingToken::issue();
        let t2 = FencingToken::issue();
        let history = vec![
            rec(1, &t1, "w1", EventBody::started(1)),
            rec(2, &t1, "w1", EventBody::progress(10, "collecting")),
            rec(3, &t2, "w2", EventBody::started(2)),
            rec(4, &t2, "w2", EventBody::progress(50, "analysing")),
            rec(5, &t2, "w2", EventBody::completed("done")),
        ];

        let parts = epochs(&history);
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].worker_id(), Some("w1"));

        let valid = reconcile(&history);
        assert_eq!(valid.len(), 3);
        assert!(valid.iter().all(|r| r.token == t2));
        assert_eq!(
            valid.iter().map(|r| r.position).collect::<Vec<_>>(),
            vec![3, 4, 5]
        );
    }

    #[test]
    fn completed_epoch_beats_a_later_token() {
        let t1 = FencingToken::issue();
        let t2 = FencingToken::issue();
        let history = vec![
            rec(1, &t1, "w1", EventBody::started(1)),
            rec(2, &t2, "w2", EventBody::started(2)),
            rec(3, &t1, "w1", EventBody::completed("done")),
            rec(4, &t2, "w2", EventBody::progress(25, "late")),
        ];

        let valid = reconcile(&history);
        assert_eq!(valid.len(), 2);
        assert!(valid.iter().all(|r| r.token == t1));
    }

    #[test]
    fn without_completion_the_latest_token_wins() {
        let t1 = FencingToken::issue();
        let t2 = FencingToken::issue();
        let history = vec![
            rec(1, &t2, "w2", EventBody::started(2)),
            rec(2, &t1, "w1", EventBody::progress(90, "stale")),
            rec(3, &t2, "w2", EventBody::error("boom")),
        ];

        let valid = reconcile(&history);
        assert_eq!(valid.len(), 2);
        assert!(valid.iter().all(|r| r.token == t2));
    }

    #[test]
    fn double_completion_keeps_the_first_epoch_found() {
        let t1 = FencingToken::issue();
        let t2 = FencingToken::issue();
        let history = vec![
            rec(1, &t2, "w2", EventBody::started(2)),
            rec(2, &t1, "w1", EventBody::completed("stale")),
            rec(3, &t2, "w2", EventBody::completed("fresh")),
        ];

        let valid = reconcile(&history);
        assert!(valid.iter().all(|r| r.token == t2));
    }

    #[test]
    fn reconcile_is_idempotent() {
        let t1 = FencingToken::issue();
        let t2 = FencingToken::issue();
        let history = vec![
            rec(1, &t1, "w1", EventBody::started(1)),
            rec(2, &t2, "w2", EventBody::started(2)),
            rec(3, &t1, "w1", EventBody::progress(10, "x")),
        ];
        assert_eq!(reconcile(&history), reconcile(&history));
    }
}
