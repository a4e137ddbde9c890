//! Render cache configuration.

use std::{num::NonZeroUsize, time::Duration};

const DEFAULT_MAX_ENTRIES: usize = 1000;
const DEFAULT_TTL_SECS: u64 = 86_400;

/// Size and age bounds for [`RenderCache`](super::RenderCache).
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of snapshots kept before the oldest is evicted.
    pub max_entries: usize,
    /// Age after which a snapshot is treated as absent.
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_MAX_ENTRIES,
            ttl: Duration::from_secs(DEFAULT_TTL_SECS),
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            max_entries: settings.max_entries.get(),
            ttl: settings.ttl,
        }
    }
}

impl CacheConfig {
    /// Returns the entry limit as NonZeroUsize, clamping to 1 if zero.
    pub fn max_entries_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.max_entries).unwrap_or(NonZeroUsize::MIN)
    }
}
