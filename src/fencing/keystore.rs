//! # Keystore collaborator.
//!
//! [`Keystore`] is the single serialization point for job ownership. Every
//! mutation is a full overwrite ([`Keystore::put`]) or a conditional delete
//! ([`Keystore::delete_if_token`]); there are no partial updates.
//!
//! A networked backend maps these onto `SET key value EX ttl GET`, `GET key`, and
//! a scripted delete that decodes the stored record and compares its token field
//! before deleting. [`MemoryKeystore`] is the in-process implementation.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::error::StoreError;
use crate::fencing::token::FencingToken;

/// Value stored under a job's fencing key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRecord {
    /// Current token.
    pub token: FencingToken,
    /// Holder the token was issued to.
    pub worker_id: String,
    /// Issue time.
    pub created_at: DateTime<Utc>,
}

/// Atomic set-with-TTL, get and compare-and-delete, scoped by key.
#[async_trait]
pub trait Keystore: Send + Sync + 'static {
    /// Stores `record` under `key` for `ttl`, unconditionally replacing any value.
    ///
    /// Returns the live record that was replaced, if any.
    async fn put(
        &self,
        key: &str,
        record: TokenRecord,
        ttl: Duration,
    ) -> Result<Option<TokenRecord>, StoreError>;

    /// Reads the live record under `key`. Expired records read as `None`.
    async fn get(&self, key: &str) -> Result<Option<TokenRecord>, StoreError>;

    /// Deletes the record under `key` only if its token equals `token`.
    ///
    /// Returns `true` if a record was deleted.
    async fn delete_if_token(&self, key: &str, token: &FencingToken)
    -> Result<bool, StoreError>;
}

/// Shared handle to a keystore.
pub type KeystoreRef = Arc<dyn Keystore>;

struct Stored {
    record: TokenRecord,
    expires_at: Instant,
}

impl Stored {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// In-process keystore with TTL expiry on the Tokio clock.
///
/// Shared between coordinators in one process it behaves like a single remote
/// keystore seen by several workers.
#[derive(Default)]
pub struct MemoryKeystore {
    entries: Mutex<HashMap<String, Stored>>,
    offline: AtomicBool,
}

impl MemoryKeystore {
    /// Creates an empty keystore.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty keystore behind an `Arc`.
    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Makes every subsequent call fail with [`StoreError::Unavailable`] (or recover).
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, AtomicOrdering::SeqCst);
    }

    /// Number of live records.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .values()
            .filter(|s| s.is_live(now))
            .count()
    }

    /// True if no live record exists.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn ensure_online(&self) -> Result<(), StoreError> {
        if self.offline.load(AtomicOrdering::SeqCst) {
            return Err(StoreError::Unavailable {
                reason: "memory keystore is offline".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Keystore for MemoryKeystore {
    async fn put(
        &self,
        key: &str,
        record: TokenRecord,
        ttl: Duration,
    ) -> Result<Option<TokenRecord>, StoreError> {
        self.ensure_online()?;
        let now = Instant::now();
        let prev = self.entries.lock().insert(
            key.to_string(),
            Stored {
                record,
                expires_at: now + ttl,
            },
        );
        Ok(prev.filter(|s| s.is_live(now)).map(|s| s.record))
    }

    async fn get(&self, key: &str) -> Result<Option<TokenRecord>, StoreError> {
        self.ensure_online()?;
        let now = Instant::now();
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(s) if s.is_live(now) => Ok(Some(s.record.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn delete_if_token(
        &self,
        key: &str,
        token: &FencingToken,
    ) -> Result<bool, StoreError> {
        self.ensure_online()?;
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let matches = entries
            .get(key)
            .is_some_and(|s| s.is_live(now) && &s.record.token == token);
        if matches {
            entries.remove(key);
        }
        Ok(matches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(worker: &str) -> TokenRecord {
        TokenRecord {
            token: FencingToken::issue(),
            worker_id: worker.to_string(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn put_returns_the_live_record_it_replaced() {
        let ks = MemoryKeystore::new();
        let first = record("w1");
        assert_eq!(
            ks.put("k", first.clone(), Duration::from_secs(5)).await.unwrap(),
            None
        );
        let prev = ks.put("k", record("w2"), Duration::from_secs(5)).await.unwrap();
        assert_eq!(prev, Some(first));
    }

    #[tokio::test(start_paused = true)]
    async fn records_expire() {
        let ks = MemoryKeystore::new();
        ks.put("k", record("w1"), Duration::from_secs(5)).await.unwrap();
        assert!(ks.get("k").await.unwrap().is_some());

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(ks.get("k").await.unwrap().is_none());
        assert!(ks.is_empty());
    }

    #[tokio::test]
    async fn delete_compares_token() {
        let ks = MemoryKeystore::new();
        let stale = record("w1");
        let current = record("w2");
        ks.put("k", stale.clone(), Duration::from_secs(60)).await.unwrap();
        ks.put("k", current.clone(), Duration::from_secs(60)).await.unwrap();

        assert!(!ks.delete_if_token("k", &stale.token).await.unwrap());
        assert_eq!(ks.get("k").await.unwrap(), Some(current.clone()));

        assert!(ks.delete_if_token("k", &current.token).await.unwrap());
        assert_eq!(ks.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn offline_store_fails_every_call() {
        let ks = MemoryKeystore::new();
        ks.set_offline(true);
        assert!(matches!(
            ks.get("k").await,
            Err(StoreError::Unavailable { .. })
        ));
        ks.set_offline(false);
        assert!(ks.get("k").await.is_ok());
    }
}
