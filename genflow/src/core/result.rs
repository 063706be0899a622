//! Results returned to pipeline callers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use super::request::GenerationRequest;

/// Where a result came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultSource {
    /// Served from the cache without a remote call.
    Cache,
    /// Produced by the remote service during this request.
    Remote,
}

impl fmt::Display for ResultSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cache => write!(f, "cache"),
            Self::Remote => write!(f, "remote"),
        }
    }
}

/// A generated image reference plus metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationResult {
    /// Reference to the generated artifact (typically a URL).
    pub artifact_reference: String,
    /// The description as rewritten by the service, if it rewrote it.
    pub revised_description: Option<String>,
    /// The request that produced this result.
    pub originating_request: GenerationRequest,
    /// Cache or remote.
    pub source: ResultSource,
    /// When the artifact was produced.
    pub created_at: DateTime<Utc>,
}

impl GenerationResult {
    /// Returns true if the result was served from the cache.
    #[must_use]
    pub fn is_cached(&self) -> bool {
        self.source == ResultSource::Cache
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("artifact_reference".to_string(), serde_json::json!(self.artifact_reference));
        map.insert("source".to_string(), serde_json::json!(self.source.to_string()));
        map.insert("created_at".to_string(), serde_json::json!(self.created_at.to_rfc3339()));
        map.insert("style".to_string(), serde_json::json!(self.originating_request.style.as_str()));
        map.insert("quality".to_string(), serde_json::json!(self.originating_request.quality.as_str()));

        if let Some(ref revised) = self.revised_description {
            map.insert("revised_description".to_string(), serde_json::json!(revised));
        }

        map
    }
}

/// A derived text result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextResult {
    /// The derived text.
    pub text: String,
    /// The input the text was derived from.
    pub input: String,
    /// Cache or remote.
    pub source: ResultSource,
    /// When the text was produced.
    pub created_at: DateTime<Utc>,
}
