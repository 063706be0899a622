//! Merging of concurrent cache misses for the same key.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared, WeakShared};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

use crate::cache::CacheKey;
use crate::cancellation::CancellationToken;
use crate::errors::{GenflowError, GenflowResult};

type Call<T> = BoxFuture<'static, GenflowResult<T>>;

/// A remote call that any number of callers may await.
pub(crate) type Flight<T> = Shared<Call<T>>;

/// Remote calls in progress, at most one per cache key.
///
/// Only weak handles are kept here. When every caller awaiting a call has gone
/// away the call is dropped, which cancels its current attempt.
pub(crate) struct InFlight<T> {
    calls: Arc<DashMap<CacheKey, (u64, WeakShared<Call<T>>)>>,
    next_id: Arc<AtomicU64>,
}

impl<T> Clone for InFlight<T> {
    fn clone(&self) -> Self {
        Self {
            calls: Arc::clone(&self.calls),
            next_id: Arc::clone(&self.next_id),
        }
    }
}

impl<T> Default for InFlight<T> {
    fn default() -> Self {
        Self {
            calls: Arc::new(DashMap::new()),
            next_id: Arc::new(AtomicU64::new(0)),
        }
    }
}

impl<T> InFlight<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Returns the live call for `key`, or starts one with `start`.
    ///
    /// The flag is true when this caller started the call. The entry is removed
    /// as soon as the call finishes, so later callers go back to the cache.
    pub(crate) fn join_or_start<F, Fut>(&self, key: &CacheKey, start: F) -> (Flight<T>, bool)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = GenflowResult<T>> + Send + 'static,
    {
        match self.calls.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                if let Some(flight) = occupied.get().1.upgrade() {
                    debug!(key = %key, "Joining in-flight remote call");
                    return (flight, false);
                }
                let (id, flight) = self.launch(key, start());
                if let Some(weak) = flight.downgrade() {
                    occupied.insert((id, weak));
                }
                (flight, true)
            }
            Entry::Vacant(vacant) => {
                let (id, flight) = self.launch(key, start());
                if let Some(weak) = flight.downgrade() {
                    vacant.insert((id, weak));
                }
                (flight, true)
            }
        }
    }

    fn launch<Fut>(&self, key: &CacheKey, call: Fut) -> (u64, Flight<T>)
    where
        Fut: Future<Output = GenflowResult<T>> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let calls = Arc::clone(&self.calls);
        let key = key.clone();
        let flight = async move {
            let outcome = call.await;
            calls.remove_if(&key, |_, (current, _)| *current == id);
            outcome
        }
        .boxed()
        .shared();
        (id, flight)
    }
}

impl<T> InFlight<T> {
    /// Number of calls still registered.
    pub(crate) fn len(&self) -> usize {
        self.calls.len()
    }
}

/// Awaits `flight` on behalf of one caller.
///
/// Cancelling `cancel` abandons only this caller's wait; the call keeps running
/// for anyone else awaiting it.
pub(crate) async fn wait<T>(flight: Flight<T>, cancel: &CancellationToken) -> GenflowResult<T>
where
    T: Clone + Send + Sync + 'static,
{
    tokio::select! {
        biased;
        reason = cancel.cancelled() => Err(GenflowError::Cancelled(reason)),
        outcome = flight => outcome,
    }
}

impl<T> std::fmt::Debug for InFlight<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InFlight")
            .field("calls", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn key() -> CacheKey {
        CacheKey::for_text("heron")
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_caller_joins_the_first_call() {
        let flights: InFlight<String> = InFlight::default();
        let started = Arc::new(AtomicUsize::new(0));

        let start = |started: Arc<AtomicUsize>| {
            move || async move {
                started.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                Ok::<_, GenflowError>("a grey heron".to_string())
            }
        };
        let (first, leader) = flights.join_or_start(&key(), start(started.clone()));
        let (second, follower) = flights.join_or_start(&key(), start(started.clone()));

        assert!(leader);
        assert!(!follower);
        let token = CancellationToken::new();
        let (a, b) = tokio::join!(wait(first, &token), wait(second, &token));
        assert_eq!(a.unwrap(), "a grey heron");
        assert_eq!(b.unwrap(), "a grey heron");
        assert_eq!(started.load(Ordering::SeqCst), 1);
        assert_eq!(flights.len(), 0);
    }

    #[tokio::test]
    async fn test_abandoned_call_is_replaced() {
        let flights: InFlight<String> = InFlight::default();

        let (abandoned, _) = flights.join_or_start(&key(), || async { Ok::<_, GenflowError>("stale".to_string()) });
        drop(abandoned);
        let (fresh, leader) = flights.join_or_start(&key(), || async { Ok::<_, GenflowError>("fresh".to_string()) });

        assert!(leader);
        assert_eq!(wait(fresh, &CancellationToken::new()).await.unwrap(), "fresh");
        assert_eq!(flights.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_waiter_leaves_others_waiting() {
        let flights: InFlight<String> = InFlight::default();
        let (first, _) = flights.join_or_start(&key(), || async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok::<_, GenflowError>("done".to_string())
        });
        let (second, _) = flights.join_or_start(&key(), || async { Ok::<_, GenflowError>("unused".to_string()) });

        let impatient = CancellationToken::new();
        impatient.cancel("gave up");

        let patient = CancellationToken::new();
        let (a, b) = tokio::join!(wait(first, &impatient), wait(second, &patient));
        assert!(matches!(a, Err(GenflowError::Cancelled(ref reason)) if reason == "gave up"));
        assert_eq!(b.unwrap(), "done");
    }

    #[tokio::test]
    async fn test_failures_are_shared_and_not_kept() {
        let flights: InFlight<String> = InFlight::default();
        let (flight, _) = flights.join_or_start(&key(), || async {
            Err::<String, _>(GenflowError::Config("no service".to_string()))
        });

        let err = wait(flight, &CancellationToken::new()).await.unwrap_err();

        assert_eq!(err.kind(), "config");
        assert_eq!(flights.len(), 0);
    }
}
