//! Cache key fingerprints.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use super::entry::CacheCategory;
use crate::core::{normalize_text, GenerationRequest};

/// Separates fields so description text cannot forge a field boundary.
const FIELD_SEPARATOR: u8 = 0x1f;

/// Bumped whenever the canonical form changes, invalidating old keys.
const KEY_VERSION: &str = "v1";

/// A SHA-256 fingerprint of a normalized request, hex encoded.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    /// Length of the hex encoded fingerprint.
    pub const LEN: usize = 64;

    /// Fingerprints an image generation request.
    #[must_use]
    pub fn for_request(request: &GenerationRequest) -> Self {
        Self::from_components(&[
            CacheCategory::GeneratedArtifact.as_str(),
            &request.normalized_description(),
            request.style.as_str(),
            request.quality.as_str(),
        ])
    }

    /// Fingerprints a text derivation input.
    #[must_use]
    pub fn for_text(input: &str) -> Self {
        Self::from_components(&[CacheCategory::DerivedText.as_str(), &normalize_text(input)])
    }

    fn from_components(components: &[&str]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(KEY_VERSION.as_bytes());
        for component in components {
            hasher.update([FIELD_SEPARATOR]);
            hasher.update(component.as_bytes());
        }
        Self(hex::encode(hasher.finalize()))
    }

    /// Returns the hex fingerprint.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
