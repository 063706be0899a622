//! Error types for genflow.
//!
//! Three layers of errors exist:
//!
//! - [`ServiceError`]: what the remote generation service reported for one call.
//! - [`CacheError`]: a failure of the cache storage itself. Never surfaced to callers;
//!   the pipeline degrades to a remote call instead.
//! - [`GenflowError`]: what a caller of the pipeline receives.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

use crate::cache::CacheCategory;

/// Result type alias for genflow operations.
pub type GenflowResult<T> = Result<T, GenflowError>;

/// How an error should be treated by the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Expected to potentially succeed if retried.
    Transient,
    /// Retrying cannot fix it.
    Fatal,
    /// Not recognized. Retried by default.
    Unknown,
}

/// Errors reported by the remote generation service for a single call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    /// The transport gave up waiting for the service.
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// The network connection dropped or could not be established.
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// DNS or host resolution failed.
    #[error("Host resolution failed: {0}")]
    HostResolution(String),

    /// Too many redirects.
    #[error("Redirect loop: {0}")]
    RedirectLoop(String),

    /// The endpoint URL is malformed.
    #[error("Malformed URL: {0}")]
    MalformedUrl(String),

    /// The service failed (5xx).
    #[error("Server error {status}: {message}")]
    Server {
        /// Status code.
        status: u16,
        /// Message from the service.
        message: String,
    },

    /// The service is rate limiting this client.
    #[error("Rate limited: {message}")]
    RateLimited {
        /// Retry-after hint from the service, if any.
        retry_after: Option<Duration>,
        /// Message from the service.
        message: String,
    },

    /// Credentials were rejected (401/403).
    #[error("Unauthorized ({status}): {message}")]
    Unauthorized {
        /// Status code.
        status: u16,
        /// Message from the service.
        message: String,
    },

    /// The request was rejected (4xx).
    #[error("Client error {status}: {message}")]
    Client {
        /// Status code.
        status: u16,
        /// Message from the service.
        message: String,
    },

    /// Anything the adapter could not categorize.
    #[error("Unknown service error: {0}")]
    Unknown(String),
}

impl ServiceError {
    /// Maps an HTTP-style status code onto the taxonomy.
    ///
    /// Adapters that speak HTTP use this so classification stays in one place.
    #[must_use]
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 | 403 => Self::Unauthorized { status, message },
            429 => Self::RateLimited {
                retry_after: None,
                message,
            },
            300..=399 => Self::RedirectLoop(format!("status {status}: {message}")),
            400..=499 => Self::Client { status, message },
            500..=599 => Self::Server { status, message },
            _ => Self::Unknown(format!("status {status}: {message}")),
        }
    }

    /// Classifies the error for the retry policy.
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Timeout(_)
            | Self::ConnectionLost(_)
            | Self::HostResolution(_)
            | Self::Server { .. }
            | Self::RateLimited { .. } => ErrorClass::Transient,
            Self::RedirectLoop(_)
            | Self::MalformedUrl(_)
            | Self::Unauthorized { .. }
            | Self::Client { .. } => ErrorClass::Fatal,
            Self::Unknown(_) => ErrorClass::Unknown,
        }
    }

    /// The service's own hint for how long to wait before calling again.
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Returns a stable identifier for the error variant.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Timeout(_) => "timeout",
            Self::ConnectionLost(_) => "connection_lost",
            Self::HostResolution(_) => "host_resolution",
            Self::RedirectLoop(_) => "redirect_loop",
            Self::MalformedUrl(_) => "malformed_url",
            Self::Server { .. } => "server",
            Self::RateLimited { .. } => "rate_limited",
            Self::Unauthorized { .. } => "unauthorized",
            Self::Client { .. } => "client",
            Self::Unknown(_) => "unknown",
        }
    }
}

/// Errors from the cache storage backend.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    /// The backend could not be reached or failed internally.
    #[error("Cache backend unavailable: {0}")]
    Unavailable(String),

    /// A stored payload could not be used for the requested category.
    #[error("Corrupt cache entry for key {key}: {reason}")]
    Corrupt {
        /// The key of the entry.
        key: String,
        /// What was wrong with it.
        reason: String,
    },
}

/// The error a pipeline caller receives.
#[derive(Debug, Clone, Error)]
pub enum GenflowError {
    /// The timeout guard's timer won the race.
    #[error("Timed out after {}ms", timeout.as_millis())]
    TimeoutExceeded {
        /// The configured timeout.
        timeout: Duration,
    },

    /// Connectivity, DNS, 5xx or rate limiting.
    #[error("Transient network error: {source}")]
    TransientNetwork {
        /// The underlying service error.
        #[source]
        source: ServiceError,
    },

    /// Auth, malformed request or redirect errors.
    #[error("Non-retryable request error: {source}")]
    NonRetryableRequest {
        /// The underlying service error.
        #[source]
        source: ServiceError,
    },

    /// All permitted attempts were consumed.
    #[error("Retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted {
        /// Number of attempts made.
        attempts: u32,
        /// The error from the final attempt.
        #[source]
        last: Box<GenflowError>,
    },

    /// The service answered successfully but produced nothing usable.
    #[error("No {category} result produced")]
    NoResultProduced {
        /// Which kind of result was expected.
        category: CacheCategory,
    },

    /// The caller cancelled the request.
    #[error("Generation cancelled: {0}")]
    Cancelled(String),

    /// Invalid configuration or a missing collaborator.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl GenflowError {
    /// Wraps a service error according to its class.
    ///
    /// Fatal errors become [`GenflowError::NonRetryableRequest`]; everything else
    /// becomes [`GenflowError::TransientNetwork`].
    #[must_use]
    pub fn from_service(error: ServiceError) -> Self {
        match error.class() {
            ErrorClass::Fatal => Self::NonRetryableRequest { source: error },
            ErrorClass::Transient | ErrorClass::Unknown => Self::TransientNetwork { source: error },
        }
    }

    /// Returns a stable identifier for the error variant.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TimeoutExceeded { .. } => "timeout_exceeded",
            Self::TransientNetwork { .. } => "transient_network",
            Self::NonRetryableRequest { .. } => "non_retryable_request",
            Self::RetriesExhausted { .. } => "retries_exhausted",
            Self::NoResultProduced { .. } => "no_result_produced",
            Self::Cancelled(_) => "cancelled",
            Self::Config(_) => "config",
        }
    }

    /// Returns true if the error came from cancellation rather than failure.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }

    /// Returns the innermost service error, if one caused this error.
    #[must_use]
    pub fn service_error(&self) -> Option<&ServiceError> {
        match self {
            Self::TransientNetwork { source } | Self::NonRetryableRequest { source } => Some(source),
            Self::RetriesExhausted { last, .. } => last.service_error(),
            _ => None,
        }
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("type".to_string(), serde_json::json!(self.kind()));

        match self {
            Self::TimeoutExceeded { timeout } => {
                map.insert("timeout_ms".to_string(), serde_json::json!(timeout.as_millis() as u64));
            }
            Self::TransientNetwork { source } | Self::NonRetryableRequest { source } => {
                map.insert("service_error".to_string(), serde_json::json!(source.kind()));
            }
            Self::RetriesExhausted { attempts, last } => {
                map.insert("attempts".to_string(), serde_json::json!(attempts));
                map.insert("last_error".to_string(), serde_json::json!(last.kind()));
            }
            Self::NoResultProduced { category } => {
                map.insert("category".to_string(), serde_json::json!(category.as_str()));
            }
            Self::Cancelled(_) | Self::Config(_) => {}
        }

        map.insert("message".to_string(), serde_json::json!(self.to_string()));
        map
    }
}
