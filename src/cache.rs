//! Per-username response cache with single-flight coalescing.
//!
//! The cached value is a *shared future* of an aggregation outcome, not the
//! outcome itself. Concurrent requests for the same username resolve to the
//! same future through one atomic get-or-insert, so the aggregation (and all
//! backend traffic behind it) runs at most once per username at a time, and
//! every coalesced caller observes the same result, failures included.
//! Completed outcomes stay cached until the TTL (measured from write)
//! expires, which deliberately makes transient errors sticky for the TTL
//! window in exchange for backend load reduction.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::aggregate::Outcome;
use crate::config::CacheConfig;

type SharedOutcome = Shared<BoxFuture<'static, Outcome>>;

#[derive(Clone)]
struct CacheSlot {
    outcome: SharedOutcome,
    inserted_at: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    /// An unexpired entry existed, completed or still in flight.
    Hit,
    /// A fresh computation was started for this request.
    Miss,
}

impl CacheStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheStatus::Hit => "HIT",
            CacheStatus::Miss => "MISS",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries: usize,
    pub max_entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub hit_ratio: f64,
}

pub struct ResponseCache {
    entries: DashMap<String, CacheSlot>,
    ttl: Duration,
    max_entries: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl ResponseCache {
    pub fn new(config: &CacheConfig) -> Self {
        // Configure DashMap with optimal shard count based on CPU cores
        let shard_count = (num_cpus::get() * 4).next_power_of_two();
        let entries = DashMap::with_capacity_and_shard_amount(config.max_entries, shard_count);

        info!(
            shards = shard_count,
            ttl_secs = config.ttl_secs,
            max_entries = config.max_entries,
            "Initialized response cache"
        );

        Self {
            entries,
            ttl: config.ttl(),
            max_entries: config.max_entries,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Resolve the outcome for `username`, invoking `compute` only if no
    /// unexpired entry exists. The entry is created atomically before this
    /// call awaits anything, which is what guarantees single-flight: a
    /// concurrent caller either finds our entry or we find theirs.
    pub async fn get_or_compute<F, Fut>(&self, username: &str, compute: F) -> (Outcome, CacheStatus)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Outcome> + Send + 'static,
    {
        // Capacity check before taking the entry lock. Concurrent inserts can
        // overshoot the bound by a few entries; the next insert corrects it.
        if self.entries.len() >= self.max_entries && !self.entries.contains_key(username) {
            self.evict_oldest();
        }

        let (shared, status) = match self.entries.entry(username.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().inserted_at.elapsed() < self.ttl {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    debug!(username = %username, "Cache HIT");
                    (occupied.get().outcome.clone(), CacheStatus::Hit)
                } else {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    debug!(username = %username, "Cache entry expired, recomputing");
                    let slot = CacheSlot {
                        outcome: compute().boxed().shared(),
                        inserted_at: Instant::now(),
                    };
                    let shared = slot.outcome.clone();
                    occupied.insert(slot);
                    (shared, CacheStatus::Miss)
                }
            }
            Entry::Vacant(vacant) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                debug!(username = %username, "Cache MISS");
                let slot = CacheSlot {
                    outcome: compute().boxed().shared(),
                    inserted_at: Instant::now(),
                };
                let shared = slot.outcome.clone();
                vacant.insert(slot);
                (shared, CacheStatus::Miss)
            }
        };

        // Await outside the map lock. Coalesced callers each hold a clone of
        // the shared future, so evicting the entry never cancels their wait.
        (shared.await, status)
    }

    /// Drop the oldest-inserted entry. In-flight computations survive
    /// eviction; only future lookups stop finding them.
    fn evict_oldest(&self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|entry| entry.value().inserted_at)
            .map(|entry| entry.key().clone());

        if let Some(key) = oldest {
            if self.entries.remove(&key).is_some() {
                self.evictions.fetch_add(1, Ordering::Relaxed);
                debug!(username = %key, "Evicted oldest cache entry");
            }
        }
    }

    /// Remove entries whose TTL has elapsed. Called from a background sweep;
    /// expired entries are also replaced lazily on lookup.
    pub fn cleanup_expired(&self) -> usize {
        let expired_keys: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| entry.value().inserted_at.elapsed() >= self.ttl)
            .map(|entry| entry.key().clone())
            .collect();

        let count = expired_keys.len();
        for key in expired_keys {
            self.entries.remove(&key);
        }

        if count > 0 {
            debug!(count = count, "Cleaned up expired cache entries");
        }
        count
    }

    pub fn purge_all(&self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        info!(count = count, "Purged all cache entries");
        count
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_ratio = if total > 0 {
            hits as f64 / total as f64
        } else {
            0.0
        };

        CacheStats {
            entries: self.entries.len(),
            max_entries: self.max_entries,
            hits,
            misses,
            evictions: self.evictions.load(Ordering::Relaxed),
            hit_ratio,
        }
    }
}
