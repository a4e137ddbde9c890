//! Render cache.
//!
//! Snapshots are indexed by [`CacheKey`], the query- and fragment-free form of
//! the page URL, and bounded both by entry count and by age:
//!
//! ```toml
//! [cache]
//! max_entries = 1000
//! ttl_seconds = 86400
//! ```

mod config;
mod keys;
mod lock;
mod store;

pub use config::CacheConfig;
pub use keys::CacheKey;
pub use store::RenderCache;

pub(crate) use store::{METRIC_CACHE_EVICT, METRIC_CACHE_HIT, METRIC_CACHE_MISS};
