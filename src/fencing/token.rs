//! # Fencing tokens and leases.
//!
//! A [`FencingToken`] is an opaque value ordered by issuance. Its text form is
//! `"{issued:016x}-{nonce}"`, where `issued` is wall-clock microseconds bumped by
//! a process-wide counter so that two issuances in one process never tie.
//! Fixed-width hex keeps lexicographic and numeric order identical.
//!
//! ## Example
//! ```rust
//! use jobfence::FencingToken;
//!
//! let older = FencingToken::issue();
//! let newer = FencingToken::issue();
//! assert!(newer > older);
//!
//! let parsed: FencingToken = newer.to_string().parse().unwrap();
//! assert_eq!(parsed, newer);
//! ```

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Last issued value in this process.
static LAST_ISSUED: AtomicU64 = AtomicU64::new(0);

const NONCE_LEN: usize = 8;
const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Opaque ownership token, totally ordered by issuance.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FencingToken {
    issued: u64,
    nonce: Arc<str>,
}

impl FencingToken {
    /// Issues a new token, strictly greater than every token issued before it
    /// in this process.
    pub fn issue() -> Self {
        Self {
            issued: next_issued(),
            nonce: random_base36(NONCE_LEN).into(),
        }
    }

    /// Issuance stamp (microseconds since the Unix epoch, possibly bumped).
    #[inline]
    pub fn issued(&self) -> u64 {
        self.issued
    }

    /// Short identifier for logs.
    #[inline]
    pub fn short(&self) -> &str {
        &self.nonce
    }
}

impl fmt::Display for FencingToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}-{}", self.issued, self.nonce)
    }
}

/// Error returned when parsing a malformed token.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed fencing token: {0:?}")]
pub struct ParseTokenError(pub String);

impl FromStr for FencingToken {
    type Err = ParseTokenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || ParseTokenError(s.to_string());
        let (issued, nonce) = s.split_once('-').ok_or_else(malformed)?;
        if issued.len() != 16 || nonce.is_empty() {
            return Err(malformed());
        }
        let issued = u64::from_str_radix(issued, 16).map_err(|_| malformed())?;
        Ok(Self {
            issued,
            nonce: nonce.into(),
        })
    }
}

impl Serialize for FencingToken {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for FencingToken {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// A granted ownership of one job, held by the coordinator for one attempt.
#[derive(Clone, Debug)]
pub struct Lease {
    /// Job the token is bound to.
    pub job_id: Arc<str>,
    /// Holder the token was issued to.
    pub holder_id: Arc<str>,
    /// The token itself.
    pub token: FencingToken,
    /// When the token was issued.
    pub acquired_at: DateTime<Utc>,
}

fn next_issued() -> u64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_micros()).unwrap_or(u64::MAX))
        .unwrap_or(0);

    let mut prev = LAST_ISSUED.load(AtomicOrdering::Relaxed);
    loop {
        let next = now.max(prev.saturating_add(1));
        match LAST_ISSUED.compare_exchange_weak(
            prev,
            next,
            AtomicOrdering::AcqRel,
            AtomicOrdering::Relaxed,
        ) {
            Ok(_) => return next,
            Err(actual) => prev = actual,
        }
    }
}

/// Random lowercase base36 string.
pub(crate) fn random_base36(len: usize) -> String {
    let mut rng = rand::rng();
    (0..len)
        .map(|_| ALPHABET[rng.random_range(0..ALPHABET.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issuance_is_strictly_increasing() {
        let tokens: Vec<FencingToken> = (0..1000).map(|_| FencingToken::issue()).collect();
        for pair in tokens.windows(2) {
            assert!(pair[1] > pair[0]);
            assert!(pair[1].issued() > pair[0].issued());
        }
    }

    #[test]
    fn text_order_matches_token_order() {
        let a = FencingToken::issue();
        let b = FencingToken::issue();
        assert!(b.to_string() > a.to_string());
    }

    #[test]
    fn rejects_malformed_text() {
        assert!("".parse::<FencingToken>().is_err());
        assert!("abc-def".parse::<FencingToken>().is_err());
        assert!("000000000000000g-xyz".parse::<FencingToken>().is_err());
        assert!("0000000000000001-".parse::<FencingToken>().is_err());
    }

    #[test]
    fn serializes_as_string() {
        let token = FencingToken::issue();
        let json = serde_json::to_value(&token).unwrap();
        assert_eq!(json, serde_json::Value::String(token.to_string()));
        let back: FencingToken = serde_json::from_value(json).unwrap();
        assert_eq!(back, token);
    }
}
