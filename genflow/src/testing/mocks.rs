//! Scripted service doubles and a faulty cache store.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::cache::{CacheCategory, CacheEntry, CacheKey, CachePayload, CacheStatistics, CacheStore, InMemoryCacheStore};
use crate::cancellation::CancellationToken;
use crate::errors::{CacheError, ServiceError};
use crate::service::{GeneratedImage, GenerationService, ImagePayload, ServiceResponse, TextDerivationService};

/// What a scripted service does on one call.
#[derive(Debug, Clone)]
pub enum Scripted<T> {
    /// Answer with this value.
    Respond(T),
    /// Fail with this error.
    Fail(ServiceError),
    /// Never answer; wait until the call's token is cancelled.
    Hang,
}

#[derive(Debug)]
struct Script<T> {
    queue: Mutex<VecDeque<Scripted<T>>>,
    latency: Option<Duration>,
    calls: AtomicUsize,
    cancelled: Arc<AtomicUsize>,
}

impl<T: Clone> Script<T> {
    fn new(outcomes: impl IntoIterator<Item = Scripted<T>>) -> Self {
        Self {
            queue: Mutex::new(outcomes.into_iter().collect()),
            latency: None,
            calls: AtomicUsize::new(0),
            cancelled: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Plays the next scripted step; `fallback` answers once the script runs out.
    async fn play(&self, cancel: &CancellationToken, fallback: impl FnOnce(usize) -> T) -> Result<T, ServiceError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let counter = self.cancelled.clone();
        cancel.on_cancel(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let step = self.queue.lock().pop_front();
        match step {
            Some(Scripted::Respond(value)) => Ok(value),
            Some(Scripted::Fail(error)) => Err(error),
            Some(Scripted::Hang) => {
                let reason = cancel.cancelled().await;
                Err(ServiceError::Unknown(format!("call abandoned: {reason}")))
            }
            None => Ok(fallback(call)),
        }
    }
}

/// A [`GenerationService`] that plays back a script of outcomes.
///
/// Once the script is used up every call succeeds with
/// `https://images.test/{n}.png`, where `n` is the 1-based call number.
#[derive(Debug)]
pub struct ScriptedImageService {
    script: Script<ServiceResponse>,
    payloads: Mutex<Vec<ImagePayload>>,
}

impl ScriptedImageService {
    /// Creates a service playing `outcomes` in order.
    #[must_use]
    pub fn new(outcomes: impl IntoIterator<Item = Scripted<ServiceResponse>>) -> Self {
        Self {
            script: Script::new(outcomes),
            payloads: Mutex::new(Vec::new()),
        }
    }

    /// Creates a service that always succeeds.
    #[must_use]
    pub fn succeeding() -> Self {
        Self::new([])
    }

    /// Creates a service whose first calls fail with `error`.
    #[must_use]
    pub fn failing(error: ServiceError, times: usize) -> Self {
        Self::new(std::iter::repeat(Scripted::Fail(error)).take(times))
    }

    /// Delays every call by `latency` before answering.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.script.latency = Some(latency);
        self
    }

    /// Number of calls received.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.script.calls.load(Ordering::SeqCst)
    }

    /// Number of calls whose token was cancelled.
    #[must_use]
    pub fn cancelled_calls(&self) -> usize {
        self.script.cancelled.load(Ordering::SeqCst)
    }

    /// Payloads received, in call order.
    #[must_use]
    pub fn payloads(&self) -> Vec<ImagePayload> {
        self.payloads.lock().clone()
    }
}

#[async_trait]
impl GenerationService for ScriptedImageService {
    async fn generate_image(
        &self,
        payload: &ImagePayload,
        cancel: &CancellationToken,
    ) -> Result<ServiceResponse, ServiceError> {
        self.payloads.lock().push(payload.clone());
        self.script
            .play(cancel, |call| {
                ServiceResponse::single(GeneratedImage::new(format!("https://images.test/{call}.png")))
            })
            .await
    }
}

/// A [`TextDerivationService`] that plays back a script of outcomes.
///
/// Once the script is used up every call echoes `derived: {input}`.
#[derive(Debug)]
pub struct ScriptedTextService {
    script: Script<String>,
    inputs: Mutex<Vec<String>>,
}

impl ScriptedTextService {
    /// Creates a service playing `outcomes` in order.
    #[must_use]
    pub fn new(outcomes: impl IntoIterator<Item = Scripted<String>>) -> Self {
        Self {
            script: Script::new(outcomes),
            inputs: Mutex::new(Vec::new()),
        }
    }

    /// Creates a service that always succeeds.
    #[must_use]
    pub fn succeeding() -> Self {
        Self::new([])
    }

    /// Delays every call by `latency` before answering.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.script.latency = Some(latency);
        self
    }

    /// Number of calls received.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.script.calls.load(Ordering::SeqCst)
    }

    /// Number of calls whose token was cancelled.
    #[must_use]
    pub fn cancelled_calls(&self) -> usize {
        self.script.cancelled.load(Ordering::SeqCst)
    }

    /// Inputs received, in call order.
    #[must_use]
    pub fn inputs(&self) -> Vec<String> {
        self.inputs.lock().clone()
    }
}

#[async_trait]
impl TextDerivationService for ScriptedTextService {
    async fn derive_text(&self, input: &str, cancel: &CancellationToken) -> Result<String, ServiceError> {
        self.inputs.lock().push(input.to_string());
        self.script.play(cancel, |_| format!("derived: {input}")).await
    }
}

/// A cache store whose operations fail on demand.
///
/// Operations that are not set to fail pass through to an in-memory store.
#[derive(Debug)]
pub struct FailingCacheStore {
    inner: InMemoryCacheStore,
    fail_lookups: bool,
    fail_stores: bool,
}

impl FailingCacheStore {
    /// Fails every lookup and every store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: InMemoryCacheStore::default(),
            fail_lookups: true,
            fail_stores: true,
        }
    }

    /// Fails lookups only.
    #[must_use]
    pub fn failing_lookups() -> Self {
        Self {
            fail_stores: false,
            ..Self::new()
        }
    }

    /// Fails stores only.
    #[must_use]
    pub fn failing_stores() -> Self {
        Self {
            fail_lookups: false,
            ..Self::new()
        }
    }

    /// The store that receives non-failing operations.
    #[must_use]
    pub fn inner(&self) -> &InMemoryCacheStore {
        &self.inner
    }

    fn unavailable(operation: &str) -> CacheError {
        CacheError::Unavailable(format!("{operation} refused by test store"))
    }
}

impl Default for FailingCacheStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheStore for FailingCacheStore {
    async fn lookup(&self, key: &CacheKey, category: CacheCategory) -> Result<Option<CacheEntry>, CacheError> {
        if self.fail_lookups {
            return Err(Self::unavailable("lookup"));
        }
        self.inner.lookup(key, category).await
    }

    async fn store(&self, key: &CacheKey, category: CacheCategory, payload: CachePayload) -> Result<(), CacheError> {
        if self.fail_stores {
            return Err(Self::unavailable("store"));
        }
        self.inner.store(key, category, payload).await
    }

    async fn evict_expired(&self, category: CacheCategory) -> Result<usize, CacheError> {
        self.inner.evict_expired(category).await
    }

    async fn clear_all(&self) -> Result<(), CacheError> {
        self.inner.clear_all().await
    }

    fn statistics(&self, category: CacheCategory) -> CacheStatistics {
        self.inner.statistics(category)
    }
}
