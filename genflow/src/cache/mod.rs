//! TTL-based, two-category result cache.
//!
//! This module provides:
//! - [`CacheKey`] fingerprints of normalized requests
//! - [`CacheStore`], the storage protocol, and [`InMemoryCacheStore`]
//! - [`CacheStatistics`] with a division-safe hit rate
//! - [`Clock`] so TTL checks can be driven by tests
//! - [`spawn_eviction_task`] for periodic sweeping

mod clock;
mod entry;
mod key;
mod stats;
mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use entry::{CacheCategory, CacheEntry, CachePayload};
pub use key::CacheKey;
pub use stats::CacheStatistics;
pub use store::{CacheStore, InMemoryCacheStore};

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::cancellation::CancellationToken;

/// Sweeps expired entries from both categories every `interval` until `stop` fires.
///
/// Lookups already ignore expired entries; the sweep only bounds memory.
pub fn spawn_eviction_task(
    store: Arc<dyn CacheStore>,
    interval: Duration,
    stop: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                reason = stop.cancelled() => {
                    debug!(reason = %reason, "Cache eviction task stopped");
                    return;
                }
                _ = ticker.tick() => {
                    for category in CacheCategory::ALL {
                        match store.evict_expired(category).await {
                            Ok(0) => {}
                            Ok(removed) => debug!(category = %category, removed, "Evicted expired cache entries"),
                            Err(e) => warn!(category = %category, error = %e, "Cache eviction failed"),
                        }
                    }
                }
            }
        }
    })
}
