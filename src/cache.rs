//! # Write Cache
//!
//! This module short-circuits redundant persistence work: a payload whose
//! content hash was written recently gets its previous [`WriteOutcome`]
//! replayed instead of being queued again.
//!
//! ## Policy
//!
//! - **Keyed by content**: the key is the stable [`PayloadHash`] of the
//!   normalized payload, so byte-identical payloads hit regardless of who
//!   submits them.
//! - **TTL on read**: an entry older than its TTL is never returned as a
//!   hit; it is removed on observation. Failed outcomes use the shorter
//!   `failure_ttl`, so a consistently failing write is shielded from
//!   hammering without masking recovery for long.
//! - **Byte budget with strict LRU**: inserting past the budget evicts
//!   least-recently-used entries until the new entry fits.
//! - **Background sweep**: the worker loop periodically removes expired
//!   entries wholesale, independent of LRU pressure, so an idle cache does
//!   not pin stale memory.
//!
//! One mutex guards all state; reads and writes never interleave partially.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use lru::LruCache;

use crate::config::CacheConfig;
use crate::types::{PayloadHash, WriteOutcome};

// =============================================================================
// Entries
// =============================================================================

/// A cached outcome with its creation time and estimated weight.
#[derive(Debug, Clone)]
struct CacheEntry {
    outcome: WriteOutcome,
    stored_at: Instant,
    weight: usize,
}

/// Rough per-entry byte cost: key + bookkeeping + owned strings.
fn estimated_weight(outcome: &WriteOutcome) -> usize {
    let strings = outcome.record_id.as_ref().map_or(0, String::len)
        + outcome.error.as_ref().map_or(0, String::len);
    std::mem::size_of::<PayloadHash>() + std::mem::size_of::<CacheEntry>() + strings
}

// =============================================================================
// Stats
// =============================================================================

/// Point-in-time cache counters, consumed by the metrics snapshot.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    /// Lookups answered from the cache.
    pub hits: u64,

    /// Lookups that missed (absent or expired).
    pub misses: u64,

    /// Entries currently held.
    pub entries: usize,

    /// Estimated bytes currently held.
    pub bytes: usize,
}

impl CacheStats {
    /// Hits as a fraction of all lookups; 0 when nothing was looked up.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

// =============================================================================
// Write Cache
// =============================================================================

struct CacheInner {
    entries: LruCache<PayloadHash, CacheEntry>,
    total_bytes: usize,
    hits: u64,
    misses: u64,
}

/// A time-boxed, size-bounded cache of recent write outcomes.
pub struct WriteCache {
    inner: Mutex<CacheInner>,
    config: CacheConfig,
}

impl WriteCache {
    /// Creates an empty cache with the given policy.
    pub fn new(config: CacheConfig) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                entries: LruCache::unbounded(),
                total_bytes: 0,
                hits: 0,
                misses: 0,
            }),
            config,
        }
    }

    fn ttl_for(&self, outcome: &WriteOutcome) -> Duration {
        if outcome.success {
            self.config.ttl
        } else {
            self.config.failure_ttl
        }
    }

    /// Looks up the outcome for a payload hash.
    ///
    /// A hit refreshes the entry's recency. An expired entry is removed and
    /// counted as a miss.
    pub fn get(&self, hash: PayloadHash) -> Option<WriteOutcome> {
        let mut inner = self.inner.lock().expect("cache mutex poisoned");

        let expired = match inner.entries.peek(&hash) {
            Some(entry) => entry.stored_at.elapsed() >= self.ttl_for(&entry.outcome),
            None => {
                inner.misses += 1;
                return None;
            }
        };

        if expired {
            if let Some(entry) = inner.entries.pop(&hash) {
                inner.total_bytes -= entry.weight;
            }
            inner.misses += 1;
            return None;
        }

        inner.hits += 1;
        // get (not peek) moves the entry to most-recently-used.
        inner.entries.get(&hash).map(|e| e.outcome.clone())
    }

    /// Stores an outcome under its payload hash, evicting least-recently
    /// used entries until the byte budget holds.
    pub fn put(&self, hash: PayloadHash, outcome: WriteOutcome) {
        let weight = estimated_weight(&outcome);
        let mut inner = self.inner.lock().expect("cache mutex poisoned");

        let entry = CacheEntry {
            outcome,
            stored_at: Instant::now(),
            weight,
        };
        if let Some(replaced) = inner.entries.push(hash, entry) {
            inner.total_bytes -= replaced.1.weight;
        }
        inner.total_bytes += weight;

        while inner.total_bytes > self.config.byte_budget {
            match inner.entries.pop_lru() {
                Some((_, evicted)) => inner.total_bytes -= evicted.weight,
                None => break,
            }
        }
    }

    /// Removes every TTL-expired entry.
    ///
    /// Driven periodically by the worker loop, never by the producer path.
    pub fn sweep_expired(&self) {
        let mut inner = self.inner.lock().expect("cache mutex poisoned");

        let expired: Vec<PayloadHash> = inner
            .entries
            .iter()
            .filter(|(_, entry)| entry.stored_at.elapsed() >= self.ttl_for(&entry.outcome))
            .map(|(hash, _)| *hash)
            .collect();

        for hash in expired {
            if let Some(entry) = inner.entries.pop(&hash) {
                inner.total_bytes -= entry.weight;
            }
        }
    }

    /// Current counters.
    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().expect("cache mutex poisoned");
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            entries: inner.entries.len(),
            bytes: inner.total_bytes,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn success_outcome() -> WriteOutcome {
        WriteOutcome::success(PayloadHash::from_raw(1), Duration::from_millis(3), 0)
    }

    fn failure_outcome() -> WriteOutcome {
        WriteOutcome::failure("constraint violated", Duration::from_millis(3), 0)
    }

    fn cache_with(ttl: Duration, failure_ttl: Duration, byte_budget: usize) -> WriteCache {
        WriteCache::new(CacheConfig {
            byte_budget,
            ttl,
            failure_ttl,
            sweep_interval: Duration::from_secs(30),
        })
    }

    #[test]
    fn test_put_then_get_returns_outcome() {
        let cache = cache_with(Duration::from_secs(60), Duration::from_secs(10), 1 << 20);
        let hash = PayloadHash::from_raw(42);

        cache.put(hash, success_outcome());
        let hit = cache.get(hash).expect("fresh entry should hit");
        assert_eq!(hit, success_outcome());
    }

    #[test]
    fn test_miss_on_absent_key() {
        let cache = cache_with(Duration::from_secs(60), Duration::from_secs(10), 1 << 20);
        assert!(cache.get(PayloadHash::from_raw(7)).is_none());
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn test_expired_entry_is_never_a_hit() {
        let cache = cache_with(Duration::from_millis(20), Duration::from_millis(10), 1 << 20);
        let hash = PayloadHash::from_raw(42);

        cache.put(hash, success_outcome());
        std::thread::sleep(Duration::from_millis(30));

        assert!(cache.get(hash).is_none());
        // Removed on observation, not just hidden.
        assert_eq!(cache.stats().entries, 0);
    }

    #[test]
    fn test_failures_expire_sooner_than_successes() {
        let cache = cache_with(Duration::from_secs(60), Duration::from_millis(20), 1 << 20);
        let ok_hash = PayloadHash::from_raw(1);
        let bad_hash = PayloadHash::from_raw(2);

        cache.put(ok_hash, success_outcome());
        cache.put(bad_hash, failure_outcome());

        std::thread::sleep(Duration::from_millis(30));

        assert!(cache.get(ok_hash).is_some(), "success still within ttl");
        assert!(cache.get(bad_hash).is_none(), "failure past failure_ttl");
    }

    #[test]
    fn test_failure_outcome_is_cached_and_replayed() {
        let cache = cache_with(Duration::from_secs(60), Duration::from_secs(10), 1 << 20);
        let hash = PayloadHash::from_raw(9);

        cache.put(hash, failure_outcome());
        let hit = cache.get(hash).expect("fresh failure should hit");
        assert!(!hit.success);
    }

    #[test]
    fn test_lru_eviction_under_byte_pressure() {
        // Budget fits roughly two entries; the third insert evicts the
        // least recently used.
        let weight = estimated_weight(&success_outcome());
        let cache = cache_with(
            Duration::from_secs(60),
            Duration::from_secs(10),
            weight * 2 + weight / 2,
        );

        let first = PayloadHash::from_raw(1);
        let second = PayloadHash::from_raw(2);
        let third = PayloadHash::from_raw(3);

        cache.put(first, success_outcome());
        cache.put(second, success_outcome());
        // Touch `first` so `second` is now least recently used.
        assert!(cache.get(first).is_some());

        cache.put(third, success_outcome());

        assert!(cache.get(second).is_none(), "lru entry evicted");
        assert!(cache.get(first).is_some());
        assert!(cache.get(third).is_some());
    }

    #[test]
    fn test_sweep_removes_only_expired() {
        let cache = cache_with(Duration::from_millis(20), Duration::from_millis(20), 1 << 20);
        let old = PayloadHash::from_raw(1);
        cache.put(old, success_outcome());

        std::thread::sleep(Duration::from_millis(30));
        let fresh = PayloadHash::from_raw(2);
        cache.put(fresh, success_outcome());

        cache.sweep_expired();

        let stats = cache.stats();
        assert_eq!(stats.entries, 1);
        assert!(cache.get(fresh).is_some());
    }

    #[test]
    fn test_hit_rate() {
        let cache = cache_with(Duration::from_secs(60), Duration::from_secs(10), 1 << 20);
        let hash = PayloadHash::from_raw(1);
        cache.put(hash, success_outcome());

        assert!(cache.get(hash).is_some());
        assert!(cache.get(PayloadHash::from_raw(2)).is_none());

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate() - 0.5).abs() < f64::EPSILON);
    }
}
