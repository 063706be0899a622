//! The generation pipeline: cache first, remote second.

use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::flight::{self, InFlight};
use super::invoker::RemoteInvoker;
use crate::cache::{CacheCategory, CacheEntry, CacheKey, CachePayload, CacheStatistics, CacheStore};
use crate::cancellation::CancellationToken;
use crate::core::{
    GenerationRequest, GenerationResult, ImageQuality, ImageStyle, ProgressStage, ResultSource,
    TextResult,
};
use crate::errors::{CacheError, GenflowError, GenflowResult};
use crate::events::{EventSink, NoOpEventSink, NoOpProgressSink, ProgressReporter, ProgressSink};
use crate::service::DescriptionSource;

/// Orchestrates one request: key, cache lookup, remote call, cache write.
///
/// Requests share the cache store and the table of remote calls in progress:
/// concurrent misses for the same key await one remote call, which stores its
/// result before anyone sees it. Failures are never cached, and neither is
/// anything from a cancelled or timed out request. Clones share both.
#[derive(Clone)]
pub struct GenerationPipeline {
    cache: Arc<dyn CacheStore>,
    invoker: RemoteInvoker,
    event_sink: Arc<dyn EventSink>,
    artifacts: InFlight<GenerationResult>,
    texts: InFlight<String>,
}

impl GenerationPipeline {
    /// Creates a pipeline over a cache store and an invoker.
    #[must_use]
    pub fn new(cache: Arc<dyn CacheStore>, invoker: RemoteInvoker) -> Self {
        Self {
            cache,
            invoker,
            event_sink: Arc::new(NoOpEventSink),
            artifacts: InFlight::default(),
            texts: InFlight::default(),
        }
    }

    /// Sets the sink for pipeline telemetry events.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = sink;
        self
    }

    /// Returns the cache store.
    #[must_use]
    pub fn cache(&self) -> &Arc<dyn CacheStore> {
        &self.cache
    }

    /// Returns the statistics of a cache category.
    #[must_use]
    pub fn statistics(&self, category: CacheCategory) -> CacheStatistics {
        self.cache.statistics(category)
    }

    /// Generates an image, serving it from the cache when possible.
    pub async fn generate(&self, request: GenerationRequest) -> GenflowResult<GenerationResult> {
        self.generate_with(request, Arc::new(NoOpProgressSink), &CancellationToken::new())
            .await
    }

    /// Generates an image, reporting progress to `progress` and honoring `cancel`.
    pub async fn generate_with(
        &self,
        request: GenerationRequest,
        progress: Arc<dyn ProgressSink>,
        cancel: &CancellationToken,
    ) -> GenflowResult<GenerationResult> {
        const CATEGORY: CacheCategory = CacheCategory::GeneratedArtifact;

        let reporter = Arc::new(ProgressReporter::new(progress));
        reporter.report(ProgressStage::Preparing, "Preparing generation request");
        if let Some(reason) = cancel.reason() {
            return Err(GenflowError::Cancelled(reason));
        }
        let key = CacheKey::for_request(&request);

        reporter.report(ProgressStage::CheckingCache, "Checking cache");
        if let Some(entry) = self.lookup(&key, CATEGORY, &reporter).await {
            match entry.payload {
                CachePayload::Artifact {
                    reference,
                    revised_description,
                } => {
                    reporter.report(ProgressStage::ProcessingResult, "Serving cached image");
                    self.emit_cache_hit(&key, CATEGORY, entry.usage_count);
                    return Ok(GenerationResult {
                        artifact_reference: reference,
                        revised_description,
                        originating_request: request,
                        source: ResultSource::Cache,
                        created_at: entry.created_at,
                    });
                }
                CachePayload::Text { .. } => self.degrade(
                    "lookup",
                    CATEGORY,
                    &reporter,
                    &CacheError::Corrupt {
                        key: key.to_string(),
                        reason: "text payload in the artifact category".to_string(),
                    },
                ),
            }
        }
        self.emit_cache_miss(&key, CATEGORY);

        reporter.report(ProgressStage::InvokingRemote, "Calling generation service");
        let (call, _) = self.artifacts.join_or_start(&key, || {
            let pipeline = self.clone();
            let key = key.clone();
            let request = request.clone();
            let reporter = Arc::clone(&reporter);
            async move {
                let result = pipeline
                    .invoker
                    .invoke(&request, &reporter, &CancellationToken::new())
                    .await?;
                pipeline
                    .store(
                        &key,
                        CATEGORY,
                        CachePayload::artifact(&result.artifact_reference, result.revised_description.clone()),
                        &reporter,
                    )
                    .await;
                Ok::<_, GenflowError>(result)
            }
        });
        match flight::wait(call, cancel).await {
            Ok(result) => {
                reporter.report(ProgressStage::ProcessingResult, "Image generated");
                self.emit_completed(&reporter, CATEGORY);
                Ok(GenerationResult {
                    originating_request: request,
                    ..result
                })
            }
            Err(error) => Err(self.fail(&reporter, CATEGORY, error)),
        }
    }

    /// Derives text for `input`, serving it from the cache when possible.
    pub async fn derive_text(&self, input: &str) -> GenflowResult<TextResult> {
        self.derive_text_with(input, Arc::new(NoOpProgressSink), &CancellationToken::new())
            .await
    }

    /// Derives text, reporting progress to `progress` and honoring `cancel`.
    pub async fn derive_text_with(
        &self,
        input: &str,
        progress: Arc<dyn ProgressSink>,
        cancel: &CancellationToken,
    ) -> GenflowResult<TextResult> {
        const CATEGORY: CacheCategory = CacheCategory::DerivedText;

        let reporter = Arc::new(ProgressReporter::new(progress));
        reporter.report(ProgressStage::Preparing, "Preparing text derivation");
        if let Some(reason) = cancel.reason() {
            return Err(GenflowError::Cancelled(reason));
        }
        let key = CacheKey::for_text(input);

        reporter.report(ProgressStage::CheckingCache, "Checking cache");
        if let Some(entry) = self.lookup(&key, CATEGORY, &reporter).await {
            match entry.payload {
                CachePayload::Text { text } => {
                    reporter.report(ProgressStage::ProcessingResult, "Serving cached text");
                    self.emit_cache_hit(&key, CATEGORY, entry.usage_count);
                    return Ok(TextResult {
                        text,
                        input: input.to_string(),
                        source: ResultSource::Cache,
                        created_at: entry.created_at,
                    });
                }
                CachePayload::Artifact { .. } => self.degrade(
                    "lookup",
                    CATEGORY,
                    &reporter,
                    &CacheError::Corrupt {
                        key: key.to_string(),
                        reason: "artifact payload in the text category".to_string(),
                    },
                ),
            }
        }
        self.emit_cache_miss(&key, CATEGORY);

        reporter.report(ProgressStage::InvokingRemote, "Calling text derivation service");
        let (call, _) = self.texts.join_or_start(&key, || {
            let pipeline = self.clone();
            let key = key.clone();
            let input = input.to_string();
            let reporter = Arc::clone(&reporter);
            async move {
                let text = pipeline
                    .invoker
                    .derive(&input, &reporter, &CancellationToken::new())
                    .await?;
                pipeline
                    .store(&key, CATEGORY, CachePayload::text(text.clone()), &reporter)
                    .await;
                Ok::<_, GenflowError>(text)
            }
        });
        match flight::wait(call, cancel).await {
            Ok(text) => {
                reporter.report(ProgressStage::ProcessingResult, "Text derived");
                self.emit_completed(&reporter, CATEGORY);
                Ok(TextResult {
                    text,
                    input: input.to_string(),
                    source: ResultSource::Remote,
                    created_at: chrono::Utc::now(),
                })
            }
            Err(error) => Err(self.fail(&reporter, CATEGORY, error)),
        }
    }

    /// Generates an image for whatever `source` describes.
    pub async fn generate_described(
        &self,
        source: &dyn DescriptionSource,
        style: ImageStyle,
        quality: ImageQuality,
    ) -> GenflowResult<GenerationResult> {
        let request = GenerationRequest::new(source.describe(), style, quality);
        self.generate(request).await
    }

    /// Runs every request concurrently and returns the outcomes in input order.
    ///
    /// Identical requests in one batch share a single remote call.
    pub async fn generate_all(
        &self,
        requests: Vec<GenerationRequest>,
    ) -> Vec<GenflowResult<GenerationResult>> {
        debug!(count = requests.len(), "Generating batch");
        join_all(requests.into_iter().map(|request| self.generate(request))).await
    }

    async fn lookup(
        &self,
        key: &CacheKey,
        category: CacheCategory,
        reporter: &ProgressReporter,
    ) -> Option<CacheEntry> {
        match self.cache.lookup(key, category).await {
            Ok(entry) => entry,
            Err(error) => {
                self.degrade("lookup", category, reporter, &error);
                None
            }
        }
    }

    async fn store(
        &self,
        key: &CacheKey,
        category: CacheCategory,
        payload: CachePayload,
        reporter: &ProgressReporter,
    ) {
        if let Err(error) = self.cache.store(key, category, payload).await {
            self.degrade("store", category, reporter, &error);
        }
    }

    fn degrade(
        &self,
        operation: &'static str,
        category: CacheCategory,
        reporter: &ProgressReporter,
        error: &CacheError,
    ) {
        warn!(
            request_id = %reporter.request_id(),
            category = %category,
            operation,
            error = %error,
            "Cache unavailable, continuing without it"
        );
        self.event_sink.try_emit(
            "cache.degraded",
            Some(serde_json::json!({
                "request_id": reporter.request_id().to_string(),
                "category": category.as_str(),
                "operation": operation,
                "error": error.to_string(),
            })),
        );
    }

    fn emit_cache_hit(&self, key: &CacheKey, category: CacheCategory, usage_count: u64) {
        debug!(key = %key, category = %category, usage_count, "Cache hit");
        self.event_sink.try_emit(
            "generation.cache_hit",
            Some(serde_json::json!({
                "key": key.as_str(),
                "category": category.as_str(),
                "usage_count": usage_count,
            })),
        );
    }

    fn emit_cache_miss(&self, key: &CacheKey, category: CacheCategory) {
        debug!(key = %key, category = %category, "Cache miss");
        self.event_sink.try_emit(
            "generation.cache_miss",
            Some(serde_json::json!({
                "key": key.as_str(),
                "category": category.as_str(),
            })),
        );
    }

    fn emit_completed(&self, reporter: &ProgressReporter, category: CacheCategory) {
        info!(request_id = %reporter.request_id(), category = %category, "Generation completed");
        self.event_sink.try_emit(
            "generation.completed",
            Some(serde_json::json!({
                "request_id": reporter.request_id().to_string(),
                "category": category.as_str(),
            })),
        );
    }

    fn fail(&self, reporter: &ProgressReporter, category: CacheCategory, error: GenflowError) -> GenflowError {
        if error.is_cancelled() {
            info!(request_id = %reporter.request_id(), category = %category, error = %error, "Generation cancelled");
        } else {
            warn!(request_id = %reporter.request_id(), category = %category, error = %error, "Generation failed");
        }

        let mut data = error.to_dict();
        data.insert("request_id".to_string(), serde_json::json!(reporter.request_id().to_string()));
        data.insert("category".to_string(), serde_json::json!(category.as_str()));
        self.event_sink
            .try_emit("generation.failed", serde_json::to_value(data).ok());
        error
    }
}

impl std::fmt::Debug for GenerationPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationPipeline")
            .field("invoker", &self.invoker)
            .finish_non_exhaustive()
    }
}
