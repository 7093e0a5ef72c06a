//! # Per-job append-only event log with live fan-out.
//!
//! [`EventLog`] keeps, per job, an ordered history of [`EventRecord`]s and an
//! optional broadcast topic feeding live listeners.
//!
//! ## Architecture
//! ```text
//! publish(job, token, worker, body)
//!     └─► lock(jobs)
//!           ├─► entries.push(record at position n+1)
//!           └─► topic.tx.send(record)   (if any listener)
//!                     ├──► listener task 1 ──► callback(&record)
//!                     └──► listener task N ──► callback(&record)
//! ```
//!
//! ## Rules
//! - `publish` never validates the token; it stamps whatever the publisher holds.
//! - Append and send happen under one lock, so listeners see position order.
//! - Nothing prevents two epochs from interleaving; see [`reconcile`](crate::reconcile).
//! - The topic for a job is created by its first listener and dropped with its last.
//! - Listener panics are caught and logged.
//! - A lagging listener is warned and then replays the entries it missed from
//!   history, so every listener sees every position exactly once, in order.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Weak};

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;

use crate::fencing::FencingToken;
use crate::stream::reconcile::reconcile;
use crate::stream::record::{EventBody, EventRecord};

/// Default per-job broadcast capacity.
const DEFAULT_CHANNEL_CAPACITY: usize = 256;

struct Topic {
    tx: broadcast::Sender<Arc<EventRecord>>,
    listeners: HashMap<u64, JoinHandle<()>>,
}

#[derive(Default)]
struct JobLog {
    entries: Vec<EventRecord>,
    topic: Option<Topic>,
}

struct Inner {
    jobs: Mutex<HashMap<String, JobLog>>,
    next_listener: AtomicU64,
    channel_capacity: usize,
}

impl Inner {
    fn remove_listener(&self, job_id: &str, id: u64) {
        let mut jobs = self.jobs.lock();
        let Some(job) = jobs.get_mut(job_id) else {
            return;
        };
        let Some(topic) = job.topic.as_mut() else {
            return;
        };
        if let Some(handle) = topic.listeners.remove(&id) {
            handle.abort();
        }
        if topic.listeners.is_empty() {
            job.topic = None;
            tracing::debug!(job_id, "event topic torn down");
        }
    }
}

/// Append-only, per-job event log.
///
/// Cheap to clone; clones share the same log.
#[derive(Clone)]
pub struct EventLog {
    inner: Arc<Inner>,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLog {
    /// Creates an empty log.
    pub fn new() -> Self {
        Self::with_channel_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Creates an empty log whose per-job topics buffer `capacity` records (min 1).
    pub fn with_channel_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                jobs: Mutex::new(HashMap::new()),
                next_listener: AtomicU64::new(1),
                channel_capacity: capacity.max(1),
            }),
        }
    }

    /// Appends an entry at the next position and fans it out to live listeners.
    pub fn publish(
        &self,
        job_id: &str,
        token: &FencingToken,
        worker_id: &str,
        body: EventBody,
    ) -> EventRecord {
        let mut jobs = self.inner.jobs.lock();
        let job = jobs.entry(job_id.to_string()).or_default();

        let record = EventRecord {
            position: job.entries.len() as u64 + 1,
            status: body.status,
            worker_id: worker_id.to_string(),
            token: token.clone(),
            timestamp: Utc::now(),
            fields: body.fields,
        };
        job.entries.push(record.clone());

        if let Some(topic) = &job.topic {
            let _ = topic.tx.send(Arc::new(record.clone()));
        }
        drop(jobs);

        tracing::debug!(
            job_id,
            worker_id,
            status = %record.status,
            position = record.position,
            token = token.short(),
            "event published"
        );
        record
    }

    /// Attaches a live listener for `job_id`.
    ///
    /// The listener receives every record published after this call returns,
    /// on a dedicated Tokio task. Must be called within a Tokio runtime.
    pub fn subscribe<F>(&self, job_id: &str, listener: F) -> Subscription
    where
        F: Fn(&EventRecord) + Send + Sync + 'static,
    {
        let id = self.inner.next_listener.fetch_add(1, AtomicOrdering::Relaxed);
        let capacity = self.inner.channel_capacity;

        let mut jobs = self.inner.jobs.lock();
        let job = jobs.entry(job_id.to_string()).or_default();
        let topic = job.topic.get_or_insert_with(|| Topic {
            tx: broadcast::channel(capacity).0,
            listeners: HashMap::new(),
        });

        let rx = topic.tx.subscribe();
        let cursor = job.entries.len() as u64;
        let handle = tokio::spawn(listen(
            Arc::downgrade(&self.inner),
            job_id.to_string(),
            cursor,
            rx,
            listener,
        ));
        topic.listeners.insert(id, handle);
        drop(jobs);

        Subscription {
            inner: Arc::downgrade(&self.inner),
            job_id: job_id.to_string(),
            id,
        }
    }

    /// Full, unfiltered history of `job_id` in position order.
    pub fn history(&self, job_id: &str) -> Vec<EventRecord> {
        self.inner
            .jobs
            .lock()
            .get(job_id)
            .map(|j| j.entries.clone())
            .unwrap_or_default()
    }

    /// The authoritative epoch of `job_id` (see [`reconcile`]).
    pub fn valid_history(&self, job_id: &str) -> Vec<EventRecord> {
        reconcile(&self.history(job_id))
    }

    /// Number of live listeners on `job_id`.
    pub fn listener_count(&self, job_id: &str) -> usize {
        self.inner
            .jobs
            .lock()
            .get(job_id)
            .and_then(|j| j.topic.as_ref())
            .map_or(0, |t| t.listeners.len())
    }

    /// True if `job_id` currently has a live topic.
    pub fn has_topic(&self, job_id: &str) -> bool {
        self.inner
            .jobs
            .lock()
            .get(job_id)
            .is_some_and(|j| j.topic.is_some())
    }
}

async fn listen<F>(
    log: Weak<Inner>,
    job_id: String,
    mut cursor: u64,
    mut rx: broadcast::Receiver<Arc<EventRecord>>,
    listener: F,
) where
    F: Fn(&EventRecord) + Send + Sync + 'static,
{
    loop {
        match rx.recv().await {
            Ok(record) => {
                // already delivered by a replay
                if record.position <= cursor {
                    continue;
                }
                deliver(&job_id, &listener, &record);
                cursor = record.position;
            }
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(
                    job_id = %job_id,
                    skipped,
                    from = cursor + 1,
                    "event listener lagged, replaying"
                );
                let Some(inner) = log.upgrade() else { break };
                let missed: Vec<EventRecord> = inner
                    .jobs
                    .lock()
                    .get(&job_id)
                    .map(|j| j.entries.iter().skip(cursor as usize).cloned().collect())
                    .unwrap_or_default();
                drop(inner);
                for record in &missed {
                    deliver(&job_id, &listener, record);
                    cursor = record.position;
                }
            }
            Err(RecvError::Closed) => break,
        }
    }
}

fn deliver<F>(job_id: &str, listener: &F, record: &EventRecord)
where
    F: Fn(&EventRecord),
{
    if std::panic::catch_unwind(AssertUnwindSafe(|| listener(record))).is_err() {
        tracing::warn!(job_id, position = record.position, "event listener panicked");
    }
}

/// Handle returned by [`EventLog::subscribe`].
///
/// Dropping it (or calling [`Subscription::unsubscribe`]) removes exactly this
/// listener. When the last listener of a job goes, the job's topic is torn down.
#[must_use = "dropping a Subscription detaches its listener"]
pub struct Subscription {
    inner: Weak<Inner>,
    job_id: String,
    id: u64,
}

impl Subscription {
    /// Job this subscription listens to.
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Detaches the listener.
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.remove_listener(&self.job_id, self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::record::Status;
    use tokio::sync::mpsc;

    fn collector() -> (
        impl Fn(&EventRecord) + Send + Sync + 'static,
        mpsc::UnboundedReceiver<EventRecord>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        (move |r: &EventRecord| drop(tx.send(r.clone())), rx)
    }

    #[tokio::test]
    async fn positions_are_per_job_and_ordered() {
        let log = EventLog::new();
        let t = FencingToken::issue();
        log.publish("a", &t, "w1", EventBody::started(1));
        log.publish("b", &t, "w1", EventBody::started(1));
        log.publish("a", &t, "w1", EventBody::progress(10, "x"));

        let a = log.history("a");
        assert_eq!(a.iter().map(|r| r.position).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(log.history("b").len(), 1);
        assert!(log.history("missing").is_empty());
    }

    #[tokio::test]
    async fn listeners_receive_records_in_order() {
        let log = EventLog::new();
        let t = FencingToken::issue();
        let (f, mut rx) = collector();
        let _sub = log.subscribe("job", f);

        log.publish("job", &t, "w1", EventBody::started(1));
        log.publish("job", &t, "w1", EventBody::progress(10, "x"));
        log.publish("other", &t, "w1", EventBody::started(1));

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.status, Status::Started);
        assert_eq!(second.position, 2);
    }

    #[tokio::test]
    async fn unsubscribe_removes_only_that_listener() {
        let log = EventLog::new();
        let t = FencingToken::issue();
        let (f1, mut rx1) = collector();
        let (f2, mut rx2) = collector();
        let sub1 = log.subscribe("job", f1);
        let sub2 = log.subscribe("job", f2);
        assert_eq!(log.listener_count("job"), 2);

        sub1.unsubscribe();
        assert_eq!(log.listener_count("job"), 1);
        assert!(log.has_topic("job"));

        log.publish("job", &t, "w1", EventBody::started(1));
        assert_eq!(rx2.recv().await.unwrap().position, 1);
        assert!(rx1.recv().await.is_none());

        drop(sub2);
        assert_eq!(log.listener_count("job"), 0);
        assert!(!log.has_topic("job"));

        // History is independent of live fan-out.
        log.publish("job", &t, "w1", EventBody::completed("done"));
        assert_eq!(log.history("job").len(), 2);
    }

    #[tokio::test]
    async fn panicking_listener_does_not_poison_the_log() {
        let log = EventLog::new();
        let t = FencingToken::issue();
        let _bad = log.subscribe("job", |_r: &EventRecord| panic!("listener bug"));
        let (f, mut rx) = collector();
        let _good = log.subscribe("job", f);

        log.publish("job", &t, "w1", EventBody::started(1));
        log.publish("job", &t, "w1", EventBody::progress(50, "y"));
        assert_eq!(rx.recv().await.unwrap().position, 1);
        assert_eq!(rx.recv().await.unwrap().position, 2);
    }

    #[tokio::test]
    async fn lagging_listener_catches_up_from_history() {
        let log = EventLog::with_channel_capacity(4);
        let t = FencingToken::issue();
        log.publish("job", &t, "w1", EventBody::started(1));

        let (f, mut rx) = collector();
        let _sub = log.subscribe("job", f);

        // one burst, far beyond the channel, before the listener task runs
        for pct in 1..=40u8 {
            log.publish("job", &t, "w1", EventBody::progress(pct, "step"));
        }

        let mut seen = Vec::new();
        for _ in 0..40 {
            seen.push(rx.recv().await.unwrap().position);
        }
        assert_eq!(seen, (2..=41).collect::<Vec<u64>>());

        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(rx.try_recv().is_err(), "no record is delivered twice");
        assert_eq!(log.history("job").len(), 41);
    }
}
