//! Enrichment query cache with a bounded time-to-live.
//!
//! Entries are keyed by normalized query text. Each key has its own async
//! slot lock: whoever holds the slot decides hit or miss and, on a miss,
//! performs the fetch and writes the answer. Concurrent callers for the same
//! key wait on the slot and then read the fresh entry, so one key never sees
//! two writers or two external calls inside the TTL. Failed fetches are not
//! stored.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use vignette_shared::{Result, SearchResponse};

/// Whether an answer came from the cache or from the collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    Hit,
    Miss,
}

/// A search answer together with where it came from.
#[derive(Debug, Clone)]
pub struct CachedSearch {
    pub response: SearchResponse,
    /// When the collaborator produced the answer (not when it was read).
    pub fetched_at: DateTime<Utc>,
    pub outcome: CacheOutcome,
}

#[derive(Debug, Clone)]
struct Entry {
    response: SearchResponse,
    fetched_at: DateTime<Utc>,
    stored_at: Instant,
}

type Slot = Arc<Mutex<Option<Entry>>>;

/// Hit/miss counters since the cache was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: usize,
    pub misses: usize,
}

/// Shared TTL cache for search answers. Pass it around as `Arc<QueryCache>`.
#[derive(Debug)]
pub struct QueryCache {
    ttl: Duration,
    slots: Mutex<HashMap<String, Slot>>,
    hits: AtomicUsize,
    misses: AtomicUsize,
}

/// Normalize a query for cache keying: trimmed, lowercased, single spaces.
pub fn normalize_query(query: &str) -> String {
    query
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

impl QueryCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slots: Mutex::new(HashMap::new()),
            hits: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    async fn slot(&self, key: &str) -> Slot {
        let mut slots = self.slots.lock().await;
        slots.entry(key.to_string()).or_default().clone()
    }

    /// Return a fresh cached answer for `query`, or run `fetch` and store its result.
    pub async fn get_or_fetch<F, Fut>(&self, query: &str, fetch: F) -> Result<CachedSearch>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<SearchResponse>>,
    {
        let key = normalize_query(query);
        let slot = self.slot(&key).await;
        let mut entry = slot.lock().await;

        if let Some(cached) = entry.as_ref() {
            if cached.stored_at.elapsed() < self.ttl {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(query = %key, "enrichment cache hit");
                return Ok(CachedSearch {
                    response: cached.response.clone(),
                    fetched_at: cached.fetched_at,
                    outcome: CacheOutcome::Hit,
                });
            }
            debug!(query = %key, "enrichment cache entry expired");
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let response = match fetch().await {
            Ok(response) => response,
            Err(e) => {
                drop(entry);
                self.release_if_unused(&key, &slot).await;
                return Err(e);
            }
        };
        let fetched_at = Utc::now();
        *entry = Some(Entry {
            response: response.clone(),
            fetched_at,
            stored_at: Instant::now(),
        });

        Ok(CachedSearch {
            response,
            fetched_at,
            outcome: CacheOutcome::Miss,
        })
    }

    /// Remove an empty slot once its last user is done with it.
    async fn release_if_unused(&self, key: &str, slot: &Slot) {
        let mut slots = self.slots.lock().await;
        let owned_by_map = slots.get(key).is_some_and(|s| Arc::ptr_eq(s, slot));
        // One reference in the map, one held by the caller.
        if owned_by_map
            && Arc::strong_count(slot) == 2
            && slot.try_lock().is_ok_and(|entry| entry.is_none())
        {
            slots.remove(key);
        }
    }

    /// Number of keys holding a slot, fresh or not.
    pub async fn tracked_keys(&self) -> usize {
        self.slots.lock().await.len()
    }

    /// Number of fresh entries.
    pub async fn len(&self) -> usize {
        let slots: Vec<Slot> = self.slots.lock().await.values().cloned().collect();
        let mut fresh = 0;
        for slot in slots {
            if let Some(entry) = slot.lock().await.as_ref() {
                if entry.stored_at.elapsed() < self.ttl {
                    fresh += 1;
                }
            }
        }
        fresh
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drop expired or empty slots that nobody is currently using.
    /// Returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let mut slots = self.slots.lock().await;
        let before = slots.len();
        slots.retain(|_, slot| {
            // A caller outside the map may be about to lock and write this slot.
            if Arc::strong_count(slot) > 1 {
                return true;
            }
            match slot.try_lock() {
                Ok(entry) => entry
                    .as_ref()
                    .is_some_and(|e| e.stored_at.elapsed() < self.ttl),
                Err(_) => true,
            }
        });
        before - slots.len()
    }
}
