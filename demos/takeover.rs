//! # Demo: takeover
//!
//! Two workers share one keystore and one event log. The queue hands the same
//! job to the second worker while the first is still running (the first
//! worker's lock renewal "stalled"). The first worker's heartbeat notices,
//! aborts its attempt, and the log reconciles to the second worker's epoch.
//!
//! ## Flow
//! ```text
//! w1: acquire(t1) ─ started ─ 10% ─ 25% ─┐
//! queue: redeliver ──────────────────────┤
//! w2:                     acquire(t2) ─ started ─ 10% ─ ... ─ 100% ─ completed
//! w1: heartbeat tick ─► LockLost ─► ABORTED (discarded, no terminal entry)
//! ```
//!
//! ## Run
//! ```bash
//! RUST_LOG=info cargo run --example takeover --features logging
//! ```
//! Press Ctrl-C to abort whatever is still running.

use std::sync::Arc;
use std::time::Duration;

use jobfence::{
    Config, Coordinator, EventLog, EventRecord, JobQueue, LogWriter, MemoryKeystore, MemoryQueue,
    SimulatedResearch, Subscribe, WorkRef,
};
use tracing_subscriber::EnvFilter;

fn config(worker: &str) -> Config {
    Config {
        worker_id: Some(worker.to_string()),
        lock_duration: Duration::from_secs(3),
        heartbeat_interval: Duration::from_secs(1),
        announce_takeover: true,
        ..Config::default()
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let store = MemoryKeystore::arc();
    let log = EventLog::new();
    let subs: Vec<Arc<dyn Subscribe>> = vec![Arc::new(LogWriter::new())];

    let w1 = Coordinator::builder(config("w1"), store.clone(), log.clone())
        .with_subscribers(subs.clone())
        .build();
    let w2 = Coordinator::builder(config("w2"), store.clone(), log.clone())
        .with_subscribers(subs)
        .build();

    let _feed = log.subscribe("research-1", |r: &EventRecord| {
        println!(
            "  #{:<2} {:<9} {} token={} {}",
            r.position,
            r.status,
            r.worker_id,
            r.token.short(),
            serde_json::Value::Object(r.fields.clone())
        );
    });

    let queue = MemoryQueue::new();
    queue
        .enqueue("research-1", serde_json::json!({ "query": "fencing tokens" }))
        .await?;
    let work: WorkRef = Arc::new(SimulatedResearch::new().with_step_delay(Duration::from_millis(700)));

    let first = {
        let w1 = Arc::clone(&w1);
        let attempt = queue.deliver("research-1")?;
        let work = work.clone();
        tokio::spawn(async move { w1.execute(attempt, work).await })
    };

    tokio::time::sleep(Duration::from_millis(1500)).await;
    tracing::info!("queue redelivers research-1 to w2");
    let second = {
        let w2 = Arc::clone(&w2);
        let attempt = queue.deliver("research-1")?;
        tokio::spawn(async move { w2.execute(attempt, work).await })
    };

    let both = async { (first.await, second.await) };
    let (r1, r2) = tokio::select! {
        res = both => res,
        _ = w1.shutdown_on_signal() => {
            w2.shutdown();
            return Ok(());
        }
    };

    match r1? {
        Ok(outcome) => println!("w1 completed: {}", outcome.summary),
        Err(e) => println!("w1 -> {} (unrecoverable: {})", e.as_label(), e.is_unrecoverable()),
    }
    match r2? {
        Ok(outcome) => println!("w2 completed: {}", outcome.summary),
        Err(e) => println!("w2 -> {}", e.as_message()),
    }

    println!("\nfull history: {} entries", log.history("research-1").len());
    println!("valid history:");
    for r in log.valid_history("research-1") {
        println!("  #{:<2} {:<9} {}", r.position, r.status, r.worker_id);
    }
    println!("discarded by queue: {}", queue.is_discarded("research-1"));

    w1.close().await;
    w2.close().await;
    Ok(())
}
