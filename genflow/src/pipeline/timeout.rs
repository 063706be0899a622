//! Per-attempt timeout guard.

use std::future::Future;
use std::time::Duration;

use crate::cancellation::CancellationToken;

/// Reason given to an attempt's token when its timer fires.
pub const TIMEOUT_REASON: &str = "timeout";

/// Result of a timed operation.
#[derive(Debug)]
pub enum TimedResult<T, E> {
    /// Operation completed successfully.
    Ok(T),
    /// Operation failed with an error.
    Err(E),
    /// The timer fired first.
    Timeout(Duration),
    /// The parent token was cancelled first.
    Cancelled(String),
}

impl<T, E> TimedResult<T, E> {
    /// Returns true if the operation succeeded.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        matches!(self, TimedResult::Ok(_))
    }

    /// Returns true if the operation failed.
    #[must_use]
    pub fn is_err(&self) -> bool {
        matches!(self, TimedResult::Err(_))
    }

    /// Returns true if the operation timed out.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, TimedResult::Timeout(_))
    }

    /// Returns true if the parent was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TimedResult::Cancelled(_))
    }
}

/// Cancels the attempt token when dropped unless disarmed.
struct CancelOnDrop {
    token: Option<CancellationToken>,
}

impl CancelOnDrop {
    fn new(token: CancellationToken) -> Self {
        Self { token: Some(token) }
    }

    fn disarm(mut self) {
        self.token = None;
    }
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            token.cancel("attempt abandoned");
        }
    }
}

/// Runs `operation` under a timeout, bound to a parent cancellation token.
///
/// The operation receives a fresh token of its own. That token is cancelled when
/// the timer fires (reason [`TIMEOUT_REASON`]), when `parent` is cancelled, or
/// when the returned future is dropped before finishing. Exactly one outcome is
/// reported; parent cancellation wins ties, then completion, then the timer.
pub async fn with_timeout<T, E, F, Fut>(
    duration: Duration,
    parent: &CancellationToken,
    operation: F,
) -> TimedResult<T, E>
where
    F: FnOnce(CancellationToken) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let attempt_token = CancellationToken::new();
    let guard = CancelOnDrop::new(attempt_token.clone());
    let operation = operation(attempt_token.clone());

    let outcome = tokio::select! {
        biased;
        reason = parent.cancelled() => {
            attempt_token.cancel(reason.clone());
            TimedResult::Cancelled(reason)
        }
        result = operation => match result {
            Ok(value) => TimedResult::Ok(value),
            Err(error) => TimedResult::Err(error),
        },
        () = tokio::time::sleep(duration) => {
            attempt_token.cancel(TIMEOUT_REASON);
            TimedResult::Timeout(duration)
        }
    };

    guard.disarm();
    outcome
}
