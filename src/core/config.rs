//! # Coordinator configuration.
//!
//! Provides [`Config`] centralized settings for token leases, queue lock renewal,
//! and the runtime event bus.
//!
//! ## Sentinel values
//! - `heartbeat_interval = 0s` → `lock_duration / 3`
//! - `heartbeat_interval >= lock_duration` → `lock_duration / 3` (a heartbeat that
//!   is not shorter than the lock cannot keep it alive)
//! - `worker_id = None` → a random `worker-xxxxxx` id is generated at build time

use std::time::Duration;

use crate::fencing::random_base36;

/// Global configuration for one worker process.
///
/// ## Field semantics
/// - `token_ttl`: lifetime of a fencing token record, refreshed only by `acquire`
/// - `lock_duration`: duration requested on every queue lock extension
/// - `heartbeat_interval`: period between renewal/validation ticks
/// - `bus_capacity`: runtime event bus ring buffer size (min 1)
/// - `key_prefix`: prefix of keystore keys (`{key_prefix}{job_id}`)
/// - `worker_id`: holder id stamped on tokens and log entries
/// - `announce_takeover`: publish a `reset` event when a live token is superseded
#[derive(Clone, Debug)]
pub struct Config {
    /// Fencing token lifetime in the keystore.
    ///
    /// Bounds how long a token survives if nobody re-acquires it, independent of
    /// any worker's liveness.
    pub token_ttl: Duration,

    /// Queue lock duration requested on each extension.
    pub lock_duration: Duration,

    /// Heartbeat period (`0s` = derive from `lock_duration`).
    pub heartbeat_interval: Duration,

    /// Capacity of the runtime event bus.
    pub bus_capacity: usize,

    /// Keystore key prefix.
    pub key_prefix: String,

    /// Holder id of this worker (`None` = generated).
    pub worker_id: Option<String>,

    /// Publish a `reset` event before `started` when taking over a live token.
    pub announce_takeover: bool,
}

impl Config {
    /// Returns the effective heartbeat period.
    ///
    /// Always strictly shorter than `lock_duration`.
    #[inline]
    pub fn heartbeat_period(&self) -> Duration {
        let fallback = (self.lock_duration / 3).max(Duration::from_millis(1));
        if self.heartbeat_interval.is_zero() || self.heartbeat_interval >= self.lock_duration {
            fallback
        } else {
            self.heartbeat_interval
        }
    }

    /// Returns a bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }

    /// Returns the configured worker id or generates one.
    pub fn resolve_worker_id(&self) -> String {
        match &self.worker_id {
            Some(id) if !id.is_empty() => id.clone(),
            _ => generate_worker_id(),
        }
    }
}

impl Default for Config {
    /// Default configuration:
    ///
    /// - `token_ttl = 3600s`
    /// - `lock_duration = 30s`
    /// - `heartbeat_interval = 10s`
    /// - `bus_capacity = 1024`
    /// - `key_prefix = "fencing:"`
    /// - `worker_id = None`
    /// - `announce_takeover = false`
    fn default() -> Self {
        Self {
            token_ttl: Duration::from_secs(3600),
            lock_duration: Duration::from_secs(30),
            heartbeat_interval: Duration::from_secs(10),
            bus_capacity: 1024,
            key_prefix: "fencing:".to_string(),
            worker_id: None,
            announce_takeover: false,
        }
    }
}

fn generate_worker_id() -> String {
    format!("worker-{}", random_base36(6))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heartbeat_defaults_to_a_third_of_the_lock() {
        let cfg = Config::default();
        assert_eq!(cfg.heartbeat_period(), Duration::from_secs(10));

        let cfg = Config {
            heartbeat_interval: Duration::ZERO,
            lock_duration: Duration::from_secs(3),
            ..Config::default()
        };
        assert_eq!(cfg.heartbeat_period(), Duration::from_secs(1));
    }

    #[test]
    fn heartbeat_never_outlasts_the_lock() {
        let cfg = Config {
            heartbeat_interval: Duration::from_secs(30),
            lock_duration: Duration::from_secs(30),
            ..Config::default()
        };
        assert_eq!(cfg.heartbeat_period(), Duration::from_secs(10));
    }

    #[test]
    fn worker_id_is_generated_when_missing() {
        let cfg = Config::default();
        let id = cfg.resolve_worker_id();
        assert!(id.starts_with("worker-"));
        assert_eq!(id.len(), "worker-".len() + 6);

        let cfg = Config {
            worker_id: Some("w1".into()),
            ..Config::default()
        };
        assert_eq!(cfg.resolve_worker_id(), "w1");
    }
}
