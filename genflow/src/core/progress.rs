//! Progress events emitted while a request moves through the pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// A pipeline stage, in the order a request passes through them.
///
/// The derived ordering is the emission order: a request never reports a stage
/// that sorts before one it already reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStage {
    /// Building the cache key.
    Preparing,
    /// Looking the request up in the cache.
    CheckingCache,
    /// Calling the remote service.
    InvokingRemote,
    /// Backing off before another attempt.
    Retrying,
    /// Packaging the final result.
    ProcessingResult,
}

impl fmt::Display for ProgressStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Preparing => write!(f, "preparing"),
            Self::CheckingCache => write!(f, "checking_cache"),
            Self::InvokingRemote => write!(f, "invoking_remote"),
            Self::Retrying => write!(f, "retrying"),
            Self::ProcessingResult => write!(f, "processing_result"),
        }
    }
}

/// A single progress notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// Identifies the request across concurrent pipelines.
    pub request_id: Uuid,
    /// The stage just entered.
    pub stage: ProgressStage,
    /// Human readable detail.
    pub message: String,
    /// When the stage was entered.
    pub timestamp: DateTime<Utc>,
}

impl ProgressEvent {
    /// Creates a new progress event stamped with the current time.
    #[must_use]
    pub fn new(request_id: Uuid, stage: ProgressStage, message: impl Into<String>) -> Self {
        Self {
            request_id,
            stage,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    /// Converts the event to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("request_id".to_string(), serde_json::json!(self.request_id.to_string()));
        map.insert("stage".to_string(), serde_json::json!(self.stage.to_string()));
        map.insert("message".to_string(), serde_json::json!(self.message));
        map.insert("timestamp".to_string(), serde_json::json!(self.timestamp.to_rfc3339()));
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_ordering() {
        assert!(ProgressStage::Preparing < ProgressStage::CheckingCache);
        assert!(ProgressStage::CheckingCache < ProgressStage::InvokingRemote);
        assert!(ProgressStage::InvokingRemote < ProgressStage::Retrying);
        assert!(ProgressStage::Retrying < ProgressStage::ProcessingResult);
    }

    #[test]
    fn test_stage_serialize() {
        let json = serde_json::to_string(&ProgressStage::CheckingCache).unwrap();
        assert_eq!(json, r#""checking_cache""#);
    }

    #[test]
    fn test_event_to_dict() {
        let id = Uuid::new_v4();
        let event = ProgressEvent::new(id, ProgressStage::Retrying, "attempt 2 of 3");
        let dict = event.to_dict();

        assert_eq!(dict.get("stage").unwrap(), "retrying");
        assert_eq!(dict.get("request_id").unwrap(), &serde_json::json!(id.to_string()));
        assert_eq!(dict.get("message").unwrap(), "attempt 2 of 3");
    }
}
