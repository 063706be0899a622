//! End-to-end tests for the generation pipeline.

#[cfg(test)]
mod tests {
    use crate::cache::{CacheCategory, CacheStore, InMemoryCacheStore, ManualClock};
    use crate::cancellation::CancellationToken;
    use crate::config::{CacheConfig, PipelineConfig, TimeoutConfig};
    use crate::core::{GenerationRequest, ImageQuality, ImageStyle, ProgressStage, ResultSource};
    use crate::errors::{GenflowError, ServiceError};
    use crate::events::{ChannelProgressSink, CollectingEventSink, CollectingProgressSink};
    use crate::pipeline::{GenerationPipeline, RemoteInvoker, RetryConfig};
    use crate::service::{GeneratedImage, ServiceResponse};
    use crate::testing::{FailingCacheStore, Scripted, ScriptedImageService};
    use chrono::Utc;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use std::time::Duration;

    const ARTIFACT: CacheCategory = CacheCategory::GeneratedArtifact;

    fn cat_request() -> GenerationRequest {
        GenerationRequest::new("orange cat, tabby", ImageStyle::Realistic, ImageQuality::Standard)
    }

    struct Harness {
        pipeline: GenerationPipeline,
        cache: Arc<InMemoryCacheStore>,
        service: Arc<ScriptedImageService>,
        events: Arc<CollectingEventSink>,
    }

    fn harness(service: ScriptedImageService, config: &PipelineConfig) -> Harness {
        let service = Arc::new(service);
        let cache = Arc::new(InMemoryCacheStore::new(config.cache.clone()));
        let events = Arc::new(CollectingEventSink::new());
        let invoker = RemoteInvoker::new(service.clone(), config).with_event_sink(events.clone());
        let pipeline = GenerationPipeline::new(cache.clone(), invoker).with_event_sink(events.clone());
        Harness {
            pipeline,
            cache,
            service,
            events,
        }
    }

    #[tokio::test]
    async fn test_same_request_twice_hits_cache() {
        let h = harness(ScriptedImageService::succeeding(), &PipelineConfig::default());

        let first = h.pipeline.generate(cat_request()).await.unwrap();
        let stats = h.pipeline.statistics(ARTIFACT);
        assert_eq!(first.source, ResultSource::Remote);
        assert_eq!((stats.hits, stats.misses), (0, 1));

        let second = h.pipeline.generate(cat_request()).await.unwrap();
        let stats = h.pipeline.statistics(ARTIFACT);
        assert_eq!(second.source, ResultSource::Cache);
        assert_eq!((stats.hits, stats.misses), (1, 1));

        assert_eq!(h.service.call_count(), 1);
        assert_eq!(second.artifact_reference, first.artifact_reference);
        assert_eq!(h.events.events_of_type("generation.cache_miss").len(), 1);
        assert_eq!(h.events.events_of_type("generation.cache_hit").len(), 1);
    }

    #[tokio::test]
    async fn test_description_differences_in_case_and_spacing_share_an_entry() {
        let h = harness(ScriptedImageService::succeeding(), &PipelineConfig::default());

        h.pipeline.generate(cat_request()).await.unwrap();
        let variant = GenerationRequest::new("  Orange   Cat,  TABBY ", ImageStyle::Realistic, ImageQuality::Standard);
        let result = h.pipeline.generate(variant).await.unwrap();

        assert!(result.is_cached());
        assert_eq!(h.service.call_count(), 1);

        let other_style = GenerationRequest::new("orange cat, tabby", ImageStyle::Cartoon, ImageQuality::Standard);
        assert!(!h.pipeline.generate(other_style).await.unwrap().is_cached());
        assert_eq!(h.service.call_count(), 2);
    }

    #[tokio::test]
    async fn test_revised_description_survives_the_cache() {
        let response = ServiceResponse::single(
            GeneratedImage::new("https://img.example/cat.png").with_revised_description("a tabby cat"),
        );
        let h = harness(
            ScriptedImageService::new([Scripted::Respond(response)]),
            &PipelineConfig::default(),
        );

        h.pipeline.generate(cat_request()).await.unwrap();
        let cached = h.pipeline.generate(cat_request()).await.unwrap();

        assert_eq!(cached.artifact_reference, "https://img.example/cat.png");
        assert_eq!(cached.revised_description.as_deref(), Some("a tabby cat"));
    }

    #[tokio::test]
    async fn test_expired_entry_triggers_new_call() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let config = PipelineConfig::default()
            .with_cache(CacheConfig::new().with_artifact_ttl(Duration::from_secs(60)));
        let service = Arc::new(ScriptedImageService::succeeding());
        let cache = Arc::new(InMemoryCacheStore::with_clock(config.cache.clone(), clock.clone()));
        let pipeline = GenerationPipeline::new(cache.clone(), RemoteInvoker::new(service.clone(), &config));

        let first = pipeline.generate(cat_request()).await.unwrap();
        clock.advance(Duration::from_secs(61));
        let second = pipeline.generate(cat_request()).await.unwrap();

        assert_eq!(second.source, ResultSource::Remote);
        assert_ne!(second.artifact_reference, first.artifact_reference);
        assert_eq!(service.call_count(), 2);
        assert_eq!(cache.statistics(ARTIFACT).misses, 2);
    }

    #[tokio::test]
    async fn test_fatal_failure_caches_nothing() {
        let h = harness(
            ScriptedImageService::failing(ServiceError::from_status(403, "forbidden"), 1),
            &PipelineConfig::default(),
        );

        let err = h.pipeline.generate(cat_request()).await.unwrap_err();
        assert_eq!(err.kind(), "non_retryable_request");
        assert!(h.cache.is_empty());

        let failed = h.events.events_of_type("generation.failed");
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0]["type"], "non_retryable_request");

        let retry = h.pipeline.generate(cat_request()).await.unwrap();
        assert_eq!(retry.source, ResultSource::Remote);
        assert_eq!(h.service.call_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_caches_nothing() {
        let config = PipelineConfig::default()
            .with_retry(RetryConfig::new().with_max_attempts(2).with_base_delay_ms(100))
            .with_timeouts(TimeoutConfig::new().with_artifact_generation(Duration::from_millis(50)));
        let h = harness(ScriptedImageService::new([Scripted::Hang, Scripted::Hang]), &config);

        let err = h.pipeline.generate(cat_request()).await.unwrap_err();

        assert!(matches!(err, GenflowError::RetriesExhausted { attempts: 2, .. }));
        assert_eq!(h.service.cancelled_calls(), 2);
        assert!(h.cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_caller_cancellation_reaches_the_remote_call() {
        let h = harness(ScriptedImageService::new([Scripted::Hang]), &PipelineConfig::default());
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel("user navigated away");
        });

        let err = h
            .pipeline
            .generate_with(cat_request(), Arc::new(CollectingProgressSink::new()), &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, GenflowError::Cancelled(ref reason) if reason == "user navigated away"));
        assert_eq!(h.service.call_count(), 1);
        assert_eq!(h.service.cancelled_calls(), 1);
        assert!(h.cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_generate_cancels_the_remote_call() {
        let h = harness(ScriptedImageService::new([Scripted::Hang]), &PipelineConfig::default());

        let outcome = tokio::time::timeout(Duration::from_millis(20), h.pipeline.generate(cat_request())).await;

        assert!(outcome.is_err());
        assert_eq!(h.service.cancelled_calls(), 1);
        assert!(h.cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_caller_leaves_shared_call_running() {
        let h = harness(
            ScriptedImageService::succeeding().with_latency(Duration::from_millis(50)),
            &PipelineConfig::default(),
        );
        let impatient = CancellationToken::new();
        let trigger = impatient.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel("closed the tab");
        });

        let (first, second) = tokio::join!(
            h.pipeline
                .generate_with(cat_request(), Arc::new(CollectingProgressSink::new()), &impatient),
            h.pipeline.generate(cat_request()),
        );

        assert!(matches!(first, Err(GenflowError::Cancelled(ref reason)) if reason == "closed the tab"));
        let second = second.unwrap();
        assert_eq!(second.source, ResultSource::Remote);
        assert_eq!(h.service.call_count(), 1);
        assert_eq!(h.service.cancelled_calls(), 0);
        let cached = h.cache.peek(&crate::cache::CacheKey::for_request(&cat_request()), ARTIFACT).unwrap();
        assert_eq!(cached.payload, crate::cache::CachePayload::artifact(second.artifact_reference, None));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shared_failure_reaches_every_caller_and_caches_nothing() {
        let h = harness(
            ScriptedImageService::failing(ServiceError::from_status(400, "bad prompt"), 1)
                .with_latency(Duration::from_millis(20)),
            &PipelineConfig::default(),
        );

        let (first, second) = tokio::join!(h.pipeline.generate(cat_request()), h.pipeline.generate(cat_request()));

        assert_eq!(first.unwrap_err().kind(), "non_retryable_request");
        assert_eq!(second.unwrap_err().kind(), "non_retryable_request");
        assert_eq!(h.service.call_count(), 1);
        assert!(h.cache.is_empty());
        assert_eq!(h.events.events_of_type("generation.failed").len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_order_with_retries() {
        let h = harness(
            ScriptedImageService::failing(ServiceError::from_status(500, "hiccup"), 1),
            &PipelineConfig::default(),
        );
        let (sink, mut receiver) = ChannelProgressSink::channel();

        h.pipeline
            .generate_with(cat_request(), Arc::new(sink), &CancellationToken::new())
            .await
            .unwrap();

        let mut events = Vec::new();
        while let Ok(event) = receiver.try_recv() {
            events.push(event);
        }
        let stages: Vec<_> = events.iter().map(|e| e.stage).collect();
        assert_eq!(
            stages,
            vec![
                ProgressStage::Preparing,
                ProgressStage::CheckingCache,
                ProgressStage::InvokingRemote,
                ProgressStage::Retrying,
                ProgressStage::ProcessingResult,
            ]
        );
        assert!(events.iter().all(|e| e.request_id == events[0].request_id));
        assert!(events.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[tokio::test]
    async fn test_progress_order_on_hit() {
        let h = harness(ScriptedImageService::succeeding(), &PipelineConfig::default());
        h.pipeline.generate(cat_request()).await.unwrap();

        let sink = Arc::new(CollectingProgressSink::new());
        h.pipeline
            .generate_with(cat_request(), sink.clone(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            sink.stages(),
            vec![
                ProgressStage::Preparing,
                ProgressStage::CheckingCache,
                ProgressStage::ProcessingResult,
            ]
        );
    }

    #[tokio::test]
    async fn test_unavailable_cache_degrades_to_remote() {
        let service = Arc::new(ScriptedImageService::succeeding());
        let events = Arc::new(CollectingEventSink::new());
        let config = PipelineConfig::default();
        let pipeline = GenerationPipeline::new(
            Arc::new(FailingCacheStore::new()),
            RemoteInvoker::new(service.clone(), &config),
        )
        .with_event_sink(events.clone());

        let first = pipeline.generate(cat_request()).await.unwrap();
        let second = pipeline.generate(cat_request()).await.unwrap();

        assert_eq!(first.source, ResultSource::Remote);
        assert_eq!(second.source, ResultSource::Remote);
        assert_eq!(service.call_count(), 2);

        let degraded = events.events_of_type("cache.degraded");
        let operations: Vec<_> = degraded.iter().map(|d| d["operation"].as_str().unwrap().to_string()).collect();
        assert_eq!(operations, vec!["lookup", "store", "lookup", "store"]);
    }

    #[tokio::test]
    async fn test_failed_store_still_returns_result() {
        let service = Arc::new(ScriptedImageService::succeeding());
        let cache = Arc::new(FailingCacheStore::failing_stores());
        let pipeline = GenerationPipeline::new(
            cache.clone(),
            RemoteInvoker::new(service.clone(), &PipelineConfig::default()),
        );

        let result = pipeline.generate(cat_request()).await.unwrap();

        assert_eq!(result.artifact_reference, "https://images.test/1.png");
        assert!(cache.inner().is_empty());
        assert_eq!(cache.statistics(ARTIFACT).misses, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_requests_share_the_cache() {
        let h = harness(ScriptedImageService::succeeding(), &PipelineConfig::default());
        h.pipeline.generate(cat_request()).await.unwrap();

        let pipeline = Arc::new(h.pipeline);
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let pipeline = pipeline.clone();
                tokio::spawn(async move { pipeline.generate(cat_request()).await })
            })
            .collect();
        for handle in handles {
            assert!(handle.await.unwrap().unwrap().is_cached());
        }

        assert_eq!(h.service.call_count(), 1);
        let stats = pipeline.statistics(ARTIFACT);
        assert_eq!((stats.hits, stats.misses), (16, 1));
        assert_eq!(h.cache.peek(&crate::cache::CacheKey::for_request(&cat_request()), ARTIFACT).unwrap().usage_count, 17);
    }

    #[tokio::test]
    async fn test_attempt_events_are_emitted() {
        let h = harness(ScriptedImageService::succeeding(), &PipelineConfig::default());

        h.pipeline.generate(cat_request()).await.unwrap();

        let attempts = h.events.events_of_type("invoker.attempt");
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0]["outcome"], "success");
        assert_eq!(h.events.events_of_type("generation.completed").len(), 1);
    }
}
