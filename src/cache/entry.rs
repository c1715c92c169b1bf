//! Cache Entry Types

use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Current entry format version
pub const ENTRY_VERSION: u32 = 1;

/// Freshness of a cached value
///
/// ```text
/// FRESH ──(age/ttl > refresh_threshold)──▶ STALE ──(now > expires_at)──▶ EXPIRED
///   ▲                                        │
///   └────────────── successful refresh ──────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Freshness {
    Fresh,
    Stale,
    Expired,
}

/// A cached value with its timing metadata.
///
/// Entries are never mutated in place; a refresh writes a new entry.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    /// Serialized (uncompressed) value
    pub value: Bytes,
    pub cached_at: DateTime<Utc>,
    /// Always `cached_at + ttl`
    pub expires_at: DateTime<Utc>,
    pub version: u32,
}

impl CacheEntry {
    /// Create an entry cached at `now` that lives for `ttl`
    pub fn new(value: Bytes, now: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            value,
            cached_at: now,
            expires_at: add(now, ttl),
            version: ENTRY_VERSION,
        }
    }

    /// Configured lifetime of the entry
    pub fn ttl(&self) -> Duration {
        (self.expires_at - self.cached_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    /// Age at `now` (zero if `now` precedes `cached_at`)
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.cached_at).to_std().unwrap_or(Duration::ZERO)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Instant at which the entry turns stale
    pub fn stale_at(&self, refresh_threshold: f64) -> DateTime<Utc> {
        add(self.cached_at, self.ttl().mul_f64(refresh_threshold.clamp(0.0, 1.0)))
    }

    /// How long the entry has been stale at `now` (zero while fresh)
    pub fn staleness(&self, now: DateTime<Utc>, refresh_threshold: f64) -> Duration {
        (now - self.stale_at(refresh_threshold))
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    /// Classify the entry at `now`
    pub fn freshness(&self, now: DateTime<Utc>, refresh_threshold: f64) -> Freshness {
        if self.is_expired(now) {
            return Freshness::Expired;
        }
        let ttl = self.ttl().as_secs_f64();
        if ttl == 0.0 || self.age(now).as_secs_f64() / ttl > refresh_threshold {
            Freshness::Stale
        } else {
            Freshness::Fresh
        }
    }

    /// Time remaining until expiry (zero once expired)
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        (self.expires_at - now).to_std().unwrap_or(Duration::ZERO)
    }
}

/// `at + d`, saturating at the latest representable instant
pub(crate) fn add(at: DateTime<Utc>, d: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(d)
        .ok()
        .and_then(|d| at.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
