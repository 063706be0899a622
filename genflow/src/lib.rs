//! # Genflow
//!
//! A resilience layer for slow, rate-limited remote image generation services.
//!
//! Genflow turns a content description into a generated artifact while:
//!
//! - **Deduplicating requests**: a two-category TTL cache keyed by a SHA-256
//!   fingerprint of the normalized request
//! - **Bounding latency**: every remote attempt runs under its own timeout
//! - **Surviving transient failures**: classified retries with linear, capped backoff
//! - **Reporting progress**: ordered per-request progress events
//! - **Honoring cancellation**: caller cancellation and timeouts never cache partial state
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use genflow::prelude::*;
//! use std::sync::Arc;
//!
//! let config = PipelineConfig::default();
//! let cache = Arc::new(InMemoryCacheStore::new(config.cache.clone()));
//! let invoker = RemoteInvoker::new(Arc::new(MyImageService::new()), &config);
//! let pipeline = GenerationPipeline::new(cache, invoker);
//!
//! let request = GenerationRequest::new("orange cat, tabby", ImageStyle::Realistic, ImageQuality::Standard);
//! let result = pipeline.generate(request).await?;
//! println!("{} ({})", result.artifact_reference, result.source);
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cache;
pub mod cancellation;
pub mod config;
pub mod core;
pub mod errors;
pub mod events;
pub mod observability;
pub mod pipeline;
pub mod service;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cache::{
        CacheCategory, CacheEntry, CacheKey, CachePayload, CacheStatistics, CacheStore,
        InMemoryCacheStore,
    };
    pub use crate::cancellation::CancellationToken;
    pub use crate::config::{CacheConfig, PipelineConfig, TimeoutConfig};
    pub use crate::core::{
        GenerationRequest, GenerationResult, ImageQuality, ImageStyle, ProgressEvent,
        ProgressStage, ResultSource, TextResult,
    };
    pub use crate::errors::{CacheError, GenflowError, GenflowResult, ServiceError};
    pub use crate::events::{
        ChannelProgressSink, EventSink, LoggingEventSink, NoOpEventSink, NoOpProgressSink,
        ProgressSink,
    };
    pub use crate::pipeline::{
        GenerationPipeline, RemoteInvoker, RetryConfig, RetryDecision, RetryPolicy,
    };
    pub use crate::service::{
        DescriptionSource, GeneratedImage, GenerationService, ImagePayload, ServiceResponse,
        TextDerivationService,
    };
}
