//! Cache storage trait and the in-memory implementation.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;

use super::clock::{Clock, SystemClock};
use super::entry::{CacheCategory, CacheEntry, CachePayload};
use super::key::CacheKey;
use super::stats::{CacheStatistics, CategoryCounters};
use crate::config::CacheConfig;
use crate::errors::CacheError;

/// Protocol for cache storage backends.
///
/// Implementations own their synchronization: every method may be called
/// concurrently from many in-flight pipelines.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Looks up a live entry.
    ///
    /// A hit increments the entry's usage count and the category hit counter.
    /// An absent or expired entry counts as a miss and yields `None`; expired
    /// entries are left in place for [`CacheStore::evict_expired`]. An entry whose
    /// payload belongs to the other category also counts as a miss and is
    /// reported as [`CacheError::Corrupt`].
    async fn lookup(&self, key: &CacheKey, category: CacheCategory) -> Result<Option<CacheEntry>, CacheError>;

    /// Stores a payload, replacing any existing entry and resetting its usage count.
    async fn store(&self, key: &CacheKey, category: CacheCategory, payload: CachePayload) -> Result<(), CacheError>;

    /// Removes expired entries from a category and returns how many were removed.
    async fn evict_expired(&self, category: CacheCategory) -> Result<usize, CacheError>;

    /// Drops every entry and resets all statistics.
    async fn clear_all(&self) -> Result<(), CacheError>;

    /// Returns the statistics of a category.
    fn statistics(&self, category: CacheCategory) -> CacheStatistics;
}

#[derive(Debug, Default)]
struct Partition {
    entries: DashMap<CacheKey, CacheEntry>,
    counters: CategoryCounters,
}

/// In-memory cache store.
///
/// Each category lives in its own [`DashMap`]; the usage count of a key is
/// updated under that key's shard lock, so concurrent hits never lose updates.
pub struct InMemoryCacheStore {
    config: CacheConfig,
    clock: Arc<dyn Clock>,
    text: Partition,
    artifacts: Partition,
}

impl InMemoryCacheStore {
    /// Creates a store using the wall clock.
    #[must_use]
    pub fn new(config: CacheConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Creates a store reading time from `clock`.
    #[must_use]
    pub fn with_clock(config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            text: Partition::default(),
            artifacts: Partition::default(),
        }
    }

    fn partition(&self, category: CacheCategory) -> &Partition {
        match category {
            CacheCategory::DerivedText => &self.text,
            CacheCategory::GeneratedArtifact => &self.artifacts,
        }
    }

    /// Returns an entry without touching usage counts or statistics.
    #[must_use]
    pub fn peek(&self, key: &CacheKey, category: CacheCategory) -> Option<CacheEntry> {
        self.partition(category)
            .entries
            .get(key)
            .map(|entry| entry.value().clone())
    }

    /// Returns the number of entries across both categories.
    #[must_use]
    pub fn len(&self) -> usize {
        self.text.entries.len() + self.artifacts.entries.len()
    }

    /// Returns true if the store holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryCacheStore {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

impl std::fmt::Debug for InMemoryCacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryCacheStore")
            .field("config", &self.config)
            .field("text_entries", &self.text.entries.len())
            .field("artifact_entries", &self.artifacts.entries.len())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl CacheStore for InMemoryCacheStore {
    async fn lookup(&self, key: &CacheKey, category: CacheCategory) -> Result<Option<CacheEntry>, CacheError> {
        let partition = self.partition(category);
        let now = self.clock.now();
        let ttl = self.config.ttl(category);

        let hit = match partition.entries.get_mut(key) {
            Some(entry) if entry.payload.category() != category => {
                partition.counters.record_miss();
                return Err(CacheError::Corrupt {
                    key: key.to_string(),
                    reason: format!("{} payload in the {category} category", entry.payload.category()),
                });
            }
            Some(mut entry) if !entry.is_expired(now, ttl) => {
                entry.usage_count += 1;
                Some(entry.value().clone())
            }
            _ => None,
        };

        if hit.is_some() {
            partition.counters.record_hit();
        } else {
            partition.counters.record_miss();
        }

        Ok(hit)
    }

    async fn store(&self, key: &CacheKey, category: CacheCategory, payload: CachePayload) -> Result<(), CacheError> {
        let entry = CacheEntry::new(key.clone(), payload, self.clock.now());
        self.partition(category).entries.insert(key.clone(), entry);
        Ok(())
    }

    async fn evict_expired(&self, category: CacheCategory) -> Result<usize, CacheError> {
        let now = self.clock.now();
        let ttl = self.config.ttl(category);
        let mut removed = 0;

        self.partition(category).entries.retain(|_, entry| {
            let keep = !entry.is_expired(now, ttl);
            if !keep {
                removed += 1;
            }
            keep
        });

        Ok(removed)
    }

    async fn clear_all(&self) -> Result<(), CacheError> {
        for partition in [&self.text, &self.artifacts] {
            partition.entries.clear();
            partition.counters.reset();
        }
        Ok(())
    }

    fn statistics(&self, category: CacheCategory) -> CacheStatistics {
        let partition = self.partition(category);
        partition.counters.snapshot(category, partition.entries.len())
    }
}
