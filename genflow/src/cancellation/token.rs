//! Cancellation token for cooperative cancellation.

use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::warn;

/// A callback type for cancellation notifications.
pub type CancelCallback = Box<dyn FnOnce(&str) + Send>;

#[derive(Default)]
struct TokenState {
    cancelled: AtomicBool,
    reason: RwLock<Option<String>>,
    callbacks: Mutex<Vec<CancelCallback>>,
    notify: Notify,
}

/// A token for cooperative cancellation.
///
/// Clones share state: cancelling any clone cancels all of them. Cancellation is
/// idempotent and only the first reason is kept.
#[derive(Clone, Default)]
pub struct CancellationToken {
    state: Arc<TokenState>,
}

impl CancellationToken {
    /// Creates a live token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation with a reason.
    ///
    /// Wakes every task waiting in [`CancellationToken::cancelled`] and runs the
    /// registered callbacks once. Panics in callbacks are logged and suppressed.
    pub fn cancel(&self, reason: impl Into<String>) {
        let reason = reason.into();
        {
            // The reason lock serializes cancellers, so the first one wins and the
            // reason is visible before the flag is.
            let mut slot = self.state.reason.write();
            if self.state.cancelled.load(Ordering::SeqCst) {
                return;
            }
            *slot = Some(reason.clone());
            self.state.cancelled.store(true, Ordering::SeqCst);
        }
        self.state.notify.notify_waiters();

        let callbacks = std::mem::take(&mut *self.state.callbacks.lock());
        for callback in callbacks {
            run_callback(callback, &reason);
        }
    }

    /// Runs `callback` with the reason once the token is cancelled.
    ///
    /// A token that is already cancelled runs it on the spot.
    pub fn on_cancel<F>(&self, callback: F)
    where
        F: FnOnce(&str) + Send + 'static,
    {
        {
            let mut callbacks = self.state.callbacks.lock();
            if !self.is_cancelled() {
                callbacks.push(Box::new(callback));
                return;
            }
        }

        let reason = self.reason().unwrap_or_default();
        run_callback(Box::new(callback), &reason);
    }

    /// True once any clone has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::SeqCst)
    }

    /// The reason passed to the first `cancel` call.
    #[must_use]
    pub fn reason(&self) -> Option<String> {
        self.state.reason.read().clone()
    }

    /// Waits until the token is cancelled and returns the reason.
    pub async fn cancelled(&self) -> String {
        loop {
            // Registered before the flag check so a concurrent cancel cannot be missed.
            let notified = self.state.notify.notified();
            if self.is_cancelled() {
                return self.reason().unwrap_or_default();
            }
            notified.await;
        }
    }
}

fn run_callback(callback: CancelCallback, reason: &str) {
    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| callback(reason)));
    if outcome.is_err() {
        warn!(reason, "cancel callback panicked; ignoring");
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .field("reason", &self.reason())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio_test::{assert_pending, assert_ready_eq, task};

    #[test]
    fn test_fresh_token_is_live() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
        assert!(token.reason().is_none());
    }

    #[test]
    fn test_first_reason_wins() {
        let token = CancellationToken::new();
        token.cancel("caller");
        token.cancel("timeout");

        assert!(token.is_cancelled());
        assert_eq!(token.reason(), Some("caller".to_string()));
    }

    #[test]
    fn test_clones_share_state() {
        let token = CancellationToken::new();
        let clone = token.clone();

        clone.cancel("from clone");

        assert!(token.is_cancelled());
        assert_eq!(token.reason(), Some("from clone".to_string()));
    }

    #[test]
    fn test_on_cancel_runs_once_with_reason() {
        let token = CancellationToken::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(Mutex::new(String::new()));

        let counter_clone = counter.clone();
        let seen_clone = seen.clone();
        token.on_cancel(move |reason| {
            counter_clone.fetch_add(1, Ordering::SeqCst);
            *seen_clone.lock() = reason.to_string();
        });

        token.cancel("timeout");
        token.cancel("again");

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(*seen.lock(), "timeout");
    }

    #[test]
    fn test_late_callback_runs_immediately() {
        let token = CancellationToken::new();
        token.cancel("shutdown");

        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = counter.clone();
        token.on_cancel(move |_| {
            counter_clone.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panicking_callback_is_contained() {
        let token = CancellationToken::new();
        token.on_cancel(|_| panic!("boom"));

        token.cancel("test");
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_cancelled_future_wakes() {
        let token = CancellationToken::new();
        let mut waiter = task::spawn(token.cancelled());

        assert_pending!(waiter.poll());

        token.cancel("done");

        assert!(waiter.is_woken());
        assert_ready_eq!(waiter.poll(), "done".to_string());
    }

    #[tokio::test]
    async fn test_cancelled_returns_immediately_when_already_cancelled() {
        let token = CancellationToken::new();
        token.cancel("early");

        assert_eq!(token.cancelled().await, "early");
    }
}
