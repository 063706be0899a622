//! Cache entries and categories.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use super::key::CacheKey;

/// One of the two cache partitions, each with its own TTL and timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheCategory {
    /// Short-lived text derived from a remote text service.
    DerivedText,
    /// Long-lived generated image references.
    GeneratedArtifact,
}

impl CacheCategory {
    /// Both categories.
    pub const ALL: [Self; 2] = [Self::DerivedText, Self::GeneratedArtifact];

    /// Returns the stable identifier.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DerivedText => "derived_text",
            Self::GeneratedArtifact => "generated_artifact",
        }
    }
}

impl fmt::Display for CacheCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a cache entry holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CachePayload {
    /// A generated image.
    Artifact {
        /// Reference to the artifact.
        reference: String,
        /// The description as rewritten by the service.
        revised_description: Option<String>,
    },
    /// Derived text.
    Text {
        /// The text.
        text: String,
    },
}

impl CachePayload {
    /// Creates an artifact payload.
    #[must_use]
    pub fn artifact(reference: impl Into<String>, revised_description: Option<String>) -> Self {
        Self::Artifact {
            reference: reference.into(),
            revised_description,
        }
    }

    /// Creates a text payload.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// The category this kind of payload belongs to.
    #[must_use]
    pub fn category(&self) -> CacheCategory {
        match self {
            Self::Artifact { .. } => CacheCategory::GeneratedArtifact,
            Self::Text { .. } => CacheCategory::DerivedText,
        }
    }
}

/// A cached remote result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// The request fingerprint.
    pub key: CacheKey,
    /// The cached value.
    pub payload: CachePayload,
    /// When the entry was stored.
    pub created_at: DateTime<Utc>,
    /// Times the entry has been served, including the original store.
    pub usage_count: u64,
}

impl CacheEntry {
    /// Creates a fresh entry with a usage count of one.
    #[must_use]
    pub fn new(key: CacheKey, payload: CachePayload, created_at: DateTime<Utc>) -> Self {
        Self {
            key,
            payload,
            created_at,
            usage_count: 1,
        }
    }

    /// Returns true once more than `ttl` has passed since the entry was stored.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        match chrono::Duration::from_std(ttl) {
            Ok(ttl) => now - self.created_at > ttl,
            // A TTL too large for chrono never expires.
            Err(_) => false,
        }
    }
}
