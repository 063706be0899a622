//! Remote invoker: bounded, retried calls to the generation services.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::retry::{RetryDecision, RetryPolicy};
use super::timeout::{with_timeout, TimedResult};
use crate::cache::CacheCategory;
use crate::cancellation::CancellationToken;
use crate::config::{PipelineConfig, TimeoutConfig};
use crate::core::{GenerationRequest, GenerationResult, ProgressStage, ResultSource};
use crate::errors::{GenflowError, GenflowResult, ServiceError};
use crate::events::{EventSink, NoOpEventSink, ProgressReporter};
use crate::observability::AttemptTimer;
use crate::service::{GenerationService, TextDerivationService};

/// How a single attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    /// The service answered.
    Success,
    /// The attempt failed in a way another attempt might fix.
    RetryableError,
    /// The attempt failed for good.
    FatalError,
}

impl AttemptOutcome {
    /// Returns the outcome as a string.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::RetryableError => "retryable_error",
            Self::FatalError => "fatal_error",
        }
    }
}

/// Telemetry for one remote attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// 1-based attempt number.
    pub attempt: u32,
    /// Category of the call.
    pub category: CacheCategory,
    /// When the attempt started.
    pub started_at: DateTime<Utc>,
    /// How it ended.
    pub outcome: AttemptOutcome,
    /// How long it took.
    pub duration: Duration,
    /// The error, if the attempt failed.
    pub error: Option<String>,
}

impl AttemptRecord {
    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("attempt".to_string(), serde_json::json!(self.attempt));
        map.insert("category".to_string(), serde_json::json!(self.category.as_str()));
        map.insert("started_at".to_string(), serde_json::json!(self.started_at.to_rfc3339()));
        map.insert("outcome".to_string(), serde_json::json!(self.outcome.as_str()));
        map.insert(
            "duration_ms".to_string(),
            serde_json::json!(u64::try_from(self.duration.as_millis()).unwrap_or(u64::MAX)),
        );
        if let Some(ref error) = self.error {
            map.insert("error".to_string(), serde_json::json!(error));
        }
        map
    }
}

/// Calls the remote services under per-attempt timeouts and the retry policy.
///
/// The invoker is the only component that consumes attempts. It never touches
/// the cache.
#[derive(Clone)]
pub struct RemoteInvoker {
    image_service: Arc<dyn GenerationService>,
    text_service: Option<Arc<dyn TextDerivationService>>,
    policy: RetryPolicy,
    timeouts: TimeoutConfig,
    event_sink: Arc<dyn EventSink>,
}

impl RemoteInvoker {
    /// Creates an invoker for the image service.
    #[must_use]
    pub fn new(image_service: Arc<dyn GenerationService>, config: &PipelineConfig) -> Self {
        Self {
            image_service,
            text_service: None,
            policy: RetryPolicy::new(config.retry.clone()),
            timeouts: config.timeouts.clone(),
            event_sink: Arc::new(NoOpEventSink),
        }
    }

    /// Sets the text derivation service.
    #[must_use]
    pub fn with_text_service(mut self, service: Arc<dyn TextDerivationService>) -> Self {
        self.text_service = Some(service);
        self
    }

    /// Sets the sink that receives `invoker.attempt` events.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = sink;
        self
    }

    /// Returns the retry policy.
    #[must_use]
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Generates an image for `request`.
    ///
    /// A response without a usable image fails with
    /// [`GenflowError::NoResultProduced`] and is not retried.
    pub async fn invoke(
        &self,
        request: &GenerationRequest,
        reporter: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> GenflowResult<GenerationResult> {
        let payload = request.to_payload();
        let service = &self.image_service;

        let image = self
            .run_attempts(CacheCategory::GeneratedArtifact, reporter, cancel, |token| {
                let payload = &payload;
                async move {
                    let response = service.generate_image(payload, &token).await?;
                    Ok(response.first_usable().cloned())
                }
            })
            .await?;

        Ok(GenerationResult {
            artifact_reference: image.reference,
            revised_description: image.revised_description,
            originating_request: request.clone(),
            source: ResultSource::Remote,
            created_at: Utc::now(),
        })
    }

    /// Derives text from `input` with the text service.
    ///
    /// Fails with [`GenflowError::Config`] if no text service was configured, and
    /// with [`GenflowError::NoResultProduced`] on a blank answer.
    pub async fn derive(
        &self,
        input: &str,
        reporter: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> GenflowResult<String> {
        let Some(service) = self.text_service.as_ref() else {
            return Err(GenflowError::Config("no text derivation service configured".to_string()));
        };

        self.run_attempts(CacheCategory::DerivedText, reporter, cancel, |token| async move {
            let text = service.derive_text(input, &token).await?;
            Ok((!text.trim().is_empty()).then_some(text))
        })
        .await
    }

    /// The attempt loop shared by every remote call.
    ///
    /// `call` yields `Ok(None)` for a successful call without a usable result.
    async fn run_attempts<T, F, Fut>(
        &self,
        category: CacheCategory,
        reporter: &ProgressReporter,
        cancel: &CancellationToken,
        mut call: F,
    ) -> GenflowResult<T>
    where
        F: FnMut(CancellationToken) -> Fut,
        Fut: Future<Output = Result<Option<T>, ServiceError>>,
    {
        let timeout = self.timeouts.for_category(category);
        let max_attempts = self.policy.max_attempts();
        let mut attempt: u32 = 1;
        let mut delay = Duration::ZERO;

        loop {
            if attempt > 1 {
                tokio::select! {
                    biased;
                    reason = cancel.cancelled() => return Err(GenflowError::Cancelled(reason)),
                    () = tokio::time::sleep(delay) => {}
                }
                reporter.report(
                    ProgressStage::Retrying,
                    format!("Retrying {category} (attempt {attempt} of {max_attempts})"),
                );
            }

            let started_at = Utc::now();
            let timer = AttemptTimer::start(category.as_str());
            let outcome = with_timeout(timeout, cancel, |token| call(token)).await;
            let duration = timer.finish();

            let error = match outcome {
                TimedResult::Ok(Some(value)) => {
                    self.record(AttemptRecord {
                        attempt,
                        category,
                        started_at,
                        outcome: AttemptOutcome::Success,
                        duration,
                        error: None,
                    })
                    .await;
                    return Ok(value);
                }
                TimedResult::Ok(None) => GenflowError::NoResultProduced { category },
                TimedResult::Cancelled(reason) => {
                    debug!(
                        request_id = %reporter.request_id(),
                        category = %category,
                        attempt,
                        reason = %reason,
                        "Remote call cancelled"
                    );
                    return Err(GenflowError::Cancelled(reason));
                }
                TimedResult::Timeout(timeout) => GenflowError::TimeoutExceeded { timeout },
                TimedResult::Err(error) => GenflowError::from_service(error),
            };

            let decision = self.policy.decide(&error, attempt);
            let retryable = RetryPolicy::is_retryable(&error);
            self.record(AttemptRecord {
                attempt,
                category,
                started_at,
                outcome: if retryable {
                    AttemptOutcome::RetryableError
                } else {
                    AttemptOutcome::FatalError
                },
                duration,
                error: Some(error.to_string()),
            })
            .await;

            match decision {
                RetryDecision::Retry(next_delay) => {
                    delay = next_delay;
                    warn!(
                        request_id = %reporter.request_id(),
                        category = %category,
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %error,
                        "Remote attempt failed, retrying"
                    );
                    attempt += 1;
                }
                RetryDecision::NotRetryable => {
                    info!(
                        request_id = %reporter.request_id(),
                        category = %category,
                        attempt,
                        error = %error,
                        "Remote attempt failed with a non-retryable error"
                    );
                    return Err(error);
                }
                RetryDecision::GiveUp if retryable => {
                    info!(
                        request_id = %reporter.request_id(),
                        category = %category,
                        attempts = attempt,
                        error = %error,
                        "Retries exhausted"
                    );
                    return Err(GenflowError::RetriesExhausted {
                        attempts: attempt,
                        last: Box::new(error),
                    });
                }
                RetryDecision::GiveUp => return Err(error),
            }
        }
    }

    async fn record(&self, record: AttemptRecord) {
        debug!(
            category = %record.category,
            attempt = record.attempt,
            outcome = record.outcome.as_str(),
            duration_ms = u64::try_from(record.duration.as_millis()).unwrap_or(u64::MAX),
            "Remote attempt finished"
        );
        let data = serde_json::to_value(record.to_dict()).ok();
        self.event_sink.emit("invoker.attempt", data).await;
    }
}

impl std::fmt::Debug for RemoteInvoker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteInvoker")
            .field("policy", &self.policy)
            .field("timeouts", &self.timeouts)
            .field("has_text_service", &self.text_service.is_some())
            .finish_non_exhaustive()
    }
}
