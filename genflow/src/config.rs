//! Configuration types for the generation pipeline.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::cache::CacheCategory;
use crate::errors::{GenflowError, GenflowResult};
use crate::pipeline::RetryConfig;

/// Per-category timeouts for a single remote attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Timeout for one text derivation attempt in milliseconds.
    #[serde(default = "default_text_timeout_ms")]
    pub text_derivation_ms: u64,
    /// Timeout for one image generation attempt in milliseconds.
    #[serde(default = "default_artifact_timeout_ms")]
    pub artifact_generation_ms: u64,
}

fn default_text_timeout_ms() -> u64 {
    30_000
}

fn default_artifact_timeout_ms() -> u64 {
    120_000
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            text_derivation_ms: default_text_timeout_ms(),
            artifact_generation_ms: default_artifact_timeout_ms(),
        }
    }
}

impl TimeoutConfig {
    /// Creates a new timeout configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the text derivation timeout.
    #[must_use]
    pub fn with_text_derivation(mut self, timeout: Duration) -> Self {
        self.text_derivation_ms = duration_to_millis(timeout);
        self
    }

    /// Sets the image generation timeout.
    #[must_use]
    pub fn with_artifact_generation(mut self, timeout: Duration) -> Self {
        self.artifact_generation_ms = duration_to_millis(timeout);
        self
    }

    /// Returns the per-attempt timeout for a category.
    #[must_use]
    pub fn for_category(&self, category: CacheCategory) -> Duration {
        match category {
            CacheCategory::DerivedText => Duration::from_millis(self.text_derivation_ms),
            CacheCategory::GeneratedArtifact => Duration::from_millis(self.artifact_generation_ms),
        }
    }
}

/// Time-to-live per cache category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// TTL of derived text entries in seconds.
    #[serde(default = "default_text_ttl_secs")]
    pub text_ttl_secs: u64,
    /// TTL of generated artifact entries in seconds.
    #[serde(default = "default_artifact_ttl_secs")]
    pub artifact_ttl_secs: u64,
}

fn default_text_ttl_secs() -> u64 {
    60 * 60
}

fn default_artifact_ttl_secs() -> u64 {
    7 * 24 * 60 * 60
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            text_ttl_secs: default_text_ttl_secs(),
            artifact_ttl_secs: default_artifact_ttl_secs(),
        }
    }
}

impl CacheConfig {
    /// Creates a new cache configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the derived text TTL, rounded up to whole seconds.
    #[must_use]
    pub fn with_text_ttl(mut self, ttl: Duration) -> Self {
        self.text_ttl_secs = duration_to_secs_ceil(ttl);
        self
    }

    /// Sets the generated artifact TTL, rounded up to whole seconds.
    #[must_use]
    pub fn with_artifact_ttl(mut self, ttl: Duration) -> Self {
        self.artifact_ttl_secs = duration_to_secs_ceil(ttl);
        self
    }

    /// Returns the TTL for a category.
    #[must_use]
    pub fn ttl(&self, category: CacheCategory) -> Duration {
        match category {
            CacheCategory::DerivedText => Duration::from_secs(self.text_ttl_secs),
            CacheCategory::GeneratedArtifact => Duration::from_secs(self.artifact_ttl_secs),
        }
    }
}

/// Top-level pipeline configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Retry behavior.
    #[serde(default)]
    pub retry: RetryConfig,
    /// Per-attempt timeouts.
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    /// Cache TTLs.
    #[serde(default)]
    pub cache: CacheConfig,
}

impl PipelineConfig {
    /// Creates a configuration with all defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a JSON document; missing fields take their defaults.
    pub fn from_json_str(json: &str) -> GenflowResult<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| GenflowError::Config(format!("invalid pipeline config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Sets the retry configuration.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the timeout configuration.
    #[must_use]
    pub fn with_timeouts(mut self, timeouts: TimeoutConfig) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Sets the cache configuration.
    #[must_use]
    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    /// Validates the configuration.
    pub fn validate(&self) -> GenflowResult<()> {
        if self.retry.max_attempts < 1 {
            return Err(GenflowError::Config("max_attempts must be >= 1".to_string()));
        }
        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            return Err(GenflowError::Config(
                "max_delay_ms must be >= base_delay_ms".to_string(),
            ));
        }
        if self.timeouts.text_derivation_ms == 0 || self.timeouts.artifact_generation_ms == 0 {
            return Err(GenflowError::Config("timeouts must be positive".to_string()));
        }
        if self.cache.text_ttl_secs == 0 || self.cache.artifact_ttl_secs == 0 {
            return Err(GenflowError::Config("cache TTLs must be positive".to_string()));
        }
        Ok(())
    }
}

fn duration_to_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn duration_to_secs_ceil(duration: Duration) -> u64 {
    if duration.subsec_nanos() > 0 {
        duration.as_secs().saturating_add(1)
    } else {
        duration.as_secs()
    }
}
