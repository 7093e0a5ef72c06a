//! # Token authority: issue, validate and release fencing tokens.
//!
//! ```text
//! acquire(job, holder) ──► put(key, record, ttl)    (unconditional overwrite)
//! validate(job, token) ──► get(key) == token         (passive invalidation)
//! release(job, token)  ──► delete_if_token(key, token)
//! ```
//!
//! ## Rules
//! - The authority never refuses a claim; a newer `acquire` simply replaces
//!   the stored token.
//! - An older holder learns it was superseded only when it next validates.
//! - The TTL is refreshed only by `acquire`; `validate` never extends it.
//! - `release` with a stale token is a no-op and never deletes a newer token.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::error::StoreError;
use crate::fencing::keystore::{KeystoreRef, TokenRecord};
use crate::fencing::token::{FencingToken, Lease};

/// Result of [`TokenAuthority::acquire`].
#[derive(Clone, Debug)]
pub struct Grant {
    /// The newly issued lease.
    pub lease: Lease,
    /// The live token this grant replaced, if any.
    pub superseded: Option<FencingToken>,
}

/// Issues and checks fencing tokens against a [`Keystore`](crate::Keystore).
#[derive(Clone)]
pub struct TokenAuthority {
    store: KeystoreRef,
    ttl: Duration,
    prefix: Arc<str>,
}

impl TokenAuthority {
    /// Creates an authority storing tokens for `ttl` under `{prefix}{job_id}`.
    pub fn new(store: KeystoreRef, ttl: Duration, prefix: impl Into<Arc<str>>) -> Self {
        Self {
            store,
            ttl,
            prefix: prefix.into(),
        }
    }

    /// Token lifetime.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn key(&self, job_id: &str) -> String {
        format!("{}{}", self.prefix, job_id)
    }

    /// Issues a new token for `job_id`, replacing any existing one.
    pub async fn acquire(&self, job_id: &str, holder_id: &str) -> Result<Grant, StoreError> {
        let token = FencingToken::issue();
        let acquired_at = Utc::now();
        let record = TokenRecord {
            token: token.clone(),
            worker_id: holder_id.to_string(),
            created_at: acquired_at,
        };

        let prev = self.store.put(&self.key(job_id), record, self.ttl).await?;
        let superseded = prev.map(|r| r.token);

        tracing::debug!(
            job_id,
            holder_id,
            token = token.short(),
            superseded = superseded.as_ref().map(FencingToken::short),
            "fencing token acquired"
        );

        Ok(Grant {
            lease: Lease {
                job_id: job_id.into(),
                holder_id: holder_id.into(),
                token,
                acquired_at,
            },
            superseded,
        })
    }

    /// True iff `token` is the live token for `job_id`.
    pub async fn validate(&self, job_id: &str, token: &FencingToken) -> Result<bool, StoreError> {
        let current = self.store.get(&self.key(job_id)).await?;
        Ok(current.is_some_and(|r| &r.token == token))
    }

    /// Deletes the token for `job_id` only if it is still `token`.
    ///
    /// Returns `true` if the token was deleted.
    pub async fn release(&self, job_id: &str, token: &FencingToken) -> Result<bool, StoreError> {
        let released = self
            .store
            .delete_if_token(&self.key(job_id), token)
            .await?;
        if !released {
            tracing::debug!(job_id, token = token.short(), "stale release ignored");
        }
        Ok(released)
    }

    /// Returns the live record for `job_id`, if any.
    pub async fn current(&self, job_id: &str) -> Result<Option<TokenRecord>, StoreError> {
        self.store.get(&self.key(job_id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fencing::keystore::MemoryKeystore;

    fn authority(ttl: Duration) -> TokenAuthority {
        TokenAuthority::new(MemoryKeystore::arc(), ttl, "fencing:")
    }

    #[tokio::test]
    async fn newer_acquire_invalidates_older_token() {
        let auth = authority(Duration::from_secs(60));
        let g1 = auth.acquire("job", "w1").await.unwrap();
        let g2 = auth.acquire("job", "w2").await.unwrap();

        assert!(g1.superseded.is_none());
        assert_eq!(g2.superseded.as_ref(), Some(&g1.lease.token));
        assert!(g2.lease.token > g1.lease.token);

        assert!(!auth.validate("job", &g1.lease.token).await.unwrap());
        assert!(auth.validate("job", &g2.lease.token).await.unwrap());
    }

    #[tokio::test]
    async fn stale_release_never_deletes_newer_token() {
        let auth = authority(Duration::from_secs(60));
        let g1 = auth.acquire("job", "w1").await.unwrap();
        let g2 = auth.acquire("job", "w2").await.unwrap();

        assert!(!auth.release("job", &g1.lease.token).await.unwrap());
        assert!(auth.validate("job", &g2.lease.token).await.unwrap());

        assert!(auth.release("job", &g2.lease.token).await.unwrap());
        assert!(!auth.validate("job", &g2.lease.token).await.unwrap());
        assert!(auth.current("job").await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn validate_does_not_refresh_ttl() {
        let auth = authority(Duration::from_secs(10));
        let g = auth.acquire("job", "w1").await.unwrap();

        for _ in 0..3 {
            tokio::time::advance(Duration::from_secs(3)).await;
            assert!(auth.validate("job", &g.lease.token).await.unwrap());
        }
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(!auth.validate("job", &g.lease.token).await.unwrap());
    }

    #[tokio::test]
    async fn tokens_are_scoped_by_job() {
        let auth = authority(Duration::from_secs(60));
        let a = auth.acquire("job-a", "w1").await.unwrap();
        let b = auth.acquire("job-b", "w1").await.unwrap();
        assert!(b.superseded.is_none());
        assert!(auth.validate("job-a", &a.lease.token).await.unwrap());
        assert!(!auth.validate("job-b", &a.lease.token).await.unwrap());

        let current = auth.current("job-b").await.unwrap().unwrap();
        assert_eq!(current.worker_id, "w1");
        assert_eq!(current.token, b.lease.token);
    }
}
