//! Snapshot storage for rendered pages.

use std::{sync::RwLock, time::Duration};

use lru::LruCache;
use metrics::counter;
use tokio::time::Instant;
use tracing::debug;

use crate::application::render::RenderResult;

use super::config::CacheConfig;
use super::keys::CacheKey;
use super::lock::{rw_read, rw_write};

const SOURCE: &str = "cache::store";

pub(crate) const METRIC_CACHE_HIT: &str = "prerender_cache_hit_total";
pub(crate) const METRIC_CACHE_MISS: &str = "prerender_cache_miss_total";
pub(crate) const METRIC_CACHE_EVICT: &str = "prerender_cache_evict_total";

struct CacheEntry {
    value: RenderResult,
    inserted_at: Instant,
}

impl CacheEntry {
    fn is_fresh(&self, ttl: Duration) -> bool {
        self.inserted_at.elapsed() < ttl
    }
}

/// Bounded, TTL-aware store of rendered snapshots.
///
/// Lookups use `peek` so reads never reorder entries: once the store is full
/// the entry inserted longest ago is the one evicted. Replacing a key counts
/// as a fresh insertion.
pub struct RenderCache {
    entries: RwLock<LruCache<CacheKey, CacheEntry>>,
    ttl: Duration,
}

impl RenderCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            entries: RwLock::new(LruCache::new(config.max_entries_non_zero())),
            ttl: config.ttl,
        }
    }

    pub fn get(&self, key: &CacheKey) -> Option<RenderResult> {
        {
            let entries = rw_read(&self.entries, SOURCE, "get");
            match entries.peek(key) {
                Some(entry) if entry.is_fresh(self.ttl) => {
                    counter!(METRIC_CACHE_HIT).increment(1);
                    return Some(entry.value.clone());
                }
                Some(_) => {}
                None => {
                    counter!(METRIC_CACHE_MISS).increment(1);
                    return None;
                }
            }
        }

        let mut entries = rw_write(&self.entries, SOURCE, "get.expire");
        if entries
            .peek(key)
            .is_some_and(|entry| !entry.is_fresh(self.ttl))
        {
            entries.pop(key);
            debug!(target = "prerender::cache", key = %key, "dropped expired snapshot");
        }
        counter!(METRIC_CACHE_MISS).increment(1);
        None
    }

    /// Insert or wholesale replace the snapshot for `key`.
    pub fn set(&self, key: CacheKey, value: RenderResult) {
        let entry = CacheEntry {
            value,
            inserted_at: Instant::now(),
        };
        let displaced = rw_write(&self.entries, SOURCE, "set").push(key.clone(), entry);

        if let Some((evicted, _)) = displaced
            && evicted != key
        {
            counter!(METRIC_CACHE_EVICT).increment(1);
            debug!(target = "prerender::cache", key = %evicted, "evicted oldest snapshot");
        }
    }

    pub fn len(&self) -> usize {
        rw_read(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every snapshot. Called once on shutdown.
    pub fn close(&self) {
        rw_write(&self.entries, SOURCE, "close").clear();
    }
}
