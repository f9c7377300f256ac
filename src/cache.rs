//! # Bounded Result Cache
//! Memoizes whole pipeline runs by a fingerprint of the raw input.
//!
//! Entries expire after a TTL; when full, the oldest entry (by creation time)
//! is evicted before inserting. One lock covers lookup, compute and insert, so
//! concurrent callers with the same input never compute twice.

use chrono::{Duration, NaiveDateTime};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::{
    collections::HashMap,
    fmt::Write as _,
    sync::{Arc, Mutex, MutexGuard},
};
use tracing::debug;

use crate::aggregate::AggregateSnapshot;
use crate::telemetry;

pub const DEFAULT_TTL_SECS: u64 = 300;
pub const DEFAULT_CAPACITY: usize = 100;
/// Longest TTL accepted from configuration (one week).
pub const MAX_TTL_SECS: u64 = 7 * 24 * 3600;

/// SHA-256 hex of the canonical JSON form of `value`.
///
/// Maps must be ordered (`BTreeMap`) for the result to be independent of
/// insertion order.
pub fn fingerprint<T: Serialize + ?Sized>(value: &T) -> Result<String, serde_json::Error> {
    let bytes = serde_json::to_vec(value)?;
    let digest = Sha256::digest(&bytes);
    let mut out = String::with_capacity(64);
    for b in digest.iter() {
        let _ = write!(&mut out, "{:02x}", b);
    }
    Ok(out)
}

#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub fingerprint: String,
    pub value: Arc<V>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug)]
struct Inner<V> {
    entries: HashMap<String, CacheEntry<V>>,
    hits: u64,
    misses: u64,
}

/// Thread-safe TTL + capacity bounded cache of shared results.
#[derive(Debug)]
pub struct ResultCache<V = AggregateSnapshot> {
    inner: Mutex<Inner<V>>,
    ttl: Duration,
    capacity: usize,
}

impl<V> Default for ResultCache<V> {
    fn default() -> Self {
        Self::new(DEFAULT_TTL_SECS, DEFAULT_CAPACITY)
    }
}

impl<V> ResultCache<V> {
    /// Capacity is at least one entry. TTLs beyond what a `Duration` can hold
    /// saturate to `Duration::MAX`.
    pub fn new(ttl_secs: u64, capacity: usize) -> Self {
        let ttl = i64::try_from(ttl_secs)
            .ok()
            .and_then(Duration::try_seconds)
            .unwrap_or(Duration::MAX);
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                hits: 0,
                misses: 0,
            }),
            ttl,
            capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<V>> {
        // A panic inside `compute` leaves the map itself consistent.
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn is_fresh(&self, entry: &CacheEntry<V>, now: NaiveDateTime) -> bool {
        now.signed_duration_since(entry.created_at) < self.ttl
    }

    /// Cached value for `fingerprint` if younger than the TTL; otherwise run
    /// `compute`, store its result stamped with `now`, and return it.
    ///
    /// The flag is `true` on a cache hit. Errors from `compute` are returned
    /// as-is and nothing is stored.
    pub fn get_or_try_insert_with<E>(
        &self,
        fingerprint: &str,
        now: NaiveDateTime,
        compute: impl FnOnce() -> Result<V, E>,
    ) -> Result<(Arc<V>, bool), E> {
        let mut inner = self.lock();

        if let Some(entry) = inner.entries.get(fingerprint) {
            if self.is_fresh(entry, now) {
                let value = Arc::clone(&entry.value);
                inner.hits += 1;
                telemetry::record_cache(true);
                debug!(target: "cache", key = &fingerprint[..12.min(fingerprint.len())], "hit");
                return Ok((value, true));
            }
        }
        inner.misses += 1;
        telemetry::record_cache(false);

        let value = Arc::new(compute()?);

        inner.entries.retain(|_, e| now.signed_duration_since(e.created_at) < self.ttl);
        inner.entries.remove(fingerprint);
        while inner.entries.len() >= self.capacity {
            let oldest = inner
                .entries
                .values()
                .min_by(|a, b| {
                    a.created_at
                        .cmp(&b.created_at)
                        .then_with(|| a.fingerprint.cmp(&b.fingerprint))
                })
                .map(|e| e.fingerprint.clone());
            match oldest {
                Some(key) => {
                    debug!(target: "cache", key = &key[..12.min(key.len())], "evicted oldest");
                    inner.entries.remove(&key);
                }
                None => break,
            }
        }
        inner.entries.insert(
            fingerprint.to_string(),
            CacheEntry {
                fingerprint: fingerprint.to_string(),
                value: Arc::clone(&value),
                created_at: now,
            },
        );
        Ok((value, false))
    }

    /// Fresh entry for `fingerprint`, without touching counters.
    pub fn peek(&self, fingerprint: &str, now: NaiveDateTime) -> Option<Arc<V>> {
        let inner = self.lock();
        inner
            .entries
            .get(fingerprint)
            .filter(|e| self.is_fresh(e, now))
            .map(|e| Arc::clone(&e.value))
    }

    pub fn clear(&self) {
        self.lock().entries.clear();
    }

    /// Stored entries, expired ones included until the next insert purges them.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn hits(&self) -> u64 {
        self.lock().hits
    }

    pub fn misses(&self) -> u64 {
        self.lock().misses
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
