//! Progress sinks and the per-request progress reporter.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::core::{ProgressEvent, ProgressStage};

/// Receives progress events. Delivery is fire-and-forget.
#[cfg_attr(test, mockall::automock)]
pub trait ProgressSink: Send + Sync {
    /// Handles one event. Must not block or panic.
    fn on_progress(&self, event: ProgressEvent);
}

/// Discards progress events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpProgressSink;

impl ProgressSink for NoOpProgressSink {
    fn on_progress(&self, _event: ProgressEvent) {}
}

/// Logs progress events at info level.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingProgressSink;

impl ProgressSink for LoggingProgressSink {
    fn on_progress(&self, event: ProgressEvent) {
        info!(
            request_id = %event.request_id,
            stage = %event.stage,
            "{}", event.message
        );
    }
}

/// Forwards progress events into an unbounded tokio channel.
///
/// Events are dropped silently once the receiver is gone.
#[derive(Debug, Clone)]
pub struct ChannelProgressSink {
    sender: mpsc::UnboundedSender<ProgressEvent>,
}

impl ChannelProgressSink {
    /// Creates a sink and the receiver its events arrive on.
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl ProgressSink for ChannelProgressSink {
    fn on_progress(&self, event: ProgressEvent) {
        let _ = self.sender.send(event);
    }
}

/// Keeps every progress event in memory, for tests.
#[derive(Debug, Default)]
pub struct CollectingProgressSink {
    events: Mutex<Vec<ProgressEvent>>,
}

impl CollectingProgressSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the collected events.
    #[must_use]
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().clone()
    }

    /// Returns just the stages, in emission order.
    #[must_use]
    pub fn stages(&self) -> Vec<ProgressStage> {
        self.events.lock().iter().map(|e| e.stage).collect()
    }
}

impl ProgressSink for CollectingProgressSink {
    fn on_progress(&self, event: ProgressEvent) {
        self.events.lock().push(event);
    }
}

/// Emits the progress of one request, refusing backward stage transitions.
pub struct ProgressReporter {
    request_id: Uuid,
    sink: Arc<dyn ProgressSink>,
    last: Mutex<Option<ProgressStage>>,
}

impl ProgressReporter {
    /// Creates a reporter for a new request.
    #[must_use]
    pub fn new(sink: Arc<dyn ProgressSink>) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            sink,
            last: Mutex::new(None),
        }
    }

    /// Creates a reporter that drops everything.
    #[must_use]
    pub fn silent() -> Self {
        Self::new(Arc::new(NoOpProgressSink))
    }

    /// The id stamped on every event of this request.
    #[must_use]
    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    /// The most recently reported stage.
    #[must_use]
    pub fn last_stage(&self) -> Option<ProgressStage> {
        *self.last.lock()
    }

    /// Reports entering `stage`.
    ///
    /// Returns false, emitting nothing, if `stage` sorts before the last reported
    /// stage. Repeating the current stage is allowed.
    pub fn report(&self, stage: ProgressStage, message: impl Into<String>) -> bool {
        {
            let mut last = self.last.lock();
            if matches!(*last, Some(previous) if stage < previous) {
                debug!(
                    request_id = %self.request_id,
                    stage = %stage,
                    "Dropped backward progress transition"
                );
                return false;
            }
            *last = Some(stage);
        }

        self.sink
            .on_progress(ProgressEvent::new(self.request_id, stage, message));
        true
    }
}

impl std::fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressReporter")
            .field("request_id", &self.request_id)
            .field("last", &self.last_stage())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_reporter_forwards_in_order() {
        let sink = Arc::new(CollectingProgressSink::new());
        let reporter = ProgressReporter::new(sink.clone());

        assert!(reporter.report(ProgressStage::Preparing, "preparing"));
        assert!(reporter.report(ProgressStage::CheckingCache, "checking"));
        assert!(reporter.report(ProgressStage::InvokingRemote, "calling"));
        assert!(reporter.report(ProgressStage::Retrying, "retry 2"));
        assert!(reporter.report(ProgressStage::Retrying, "retry 3"));
        assert!(reporter.report(ProgressStage::ProcessingResult, "done"));

        assert_eq!(
            sink.stages(),
            vec![
                ProgressStage::Preparing,
                ProgressStage::CheckingCache,
                ProgressStage::InvokingRemote,
                ProgressStage::Retrying,
                ProgressStage::Retrying,
                ProgressStage::ProcessingResult,
            ]
        );
        assert!(sink.events().iter().all(|e| e.request_id == reporter.request_id()));
    }

    #[test]
    fn test_reporter_rejects_backward_transition() {
        let sink = Arc::new(CollectingProgressSink::new());
        let reporter = ProgressReporter::new(sink.clone());

        reporter.report(ProgressStage::InvokingRemote, "calling");
        assert!(!reporter.report(ProgressStage::CheckingCache, "late"));

        assert_eq!(sink.stages(), vec![ProgressStage::InvokingRemote]);
        assert_eq!(reporter.last_stage(), Some(ProgressStage::InvokingRemote));
    }

    #[test]
    fn test_mock_sink_receives_each_event() {
        let mut sink = MockProgressSink::new();
        sink.expect_on_progress()
            .withf(|event| event.stage == ProgressStage::Preparing)
            .times(1)
            .return_const(());

        let reporter = ProgressReporter::new(Arc::new(sink));
        reporter.report(ProgressStage::Preparing, "preparing");
    }

    #[tokio::test]
    async fn test_channel_sink() {
        let (sink, mut receiver) = ChannelProgressSink::channel();
        let reporter = ProgressReporter::new(Arc::new(sink));

        reporter.report(ProgressStage::Preparing, "hello");
        let event = receiver.recv().await.unwrap();

        assert_eq!(event.stage, ProgressStage::Preparing);
        assert_eq!(event.message, "hello");
    }

    #[test]
    fn test_channel_sink_after_receiver_dropped() {
        let (sink, receiver) = ChannelProgressSink::channel();
        drop(receiver);
        sink.on_progress(ProgressEvent::new(Uuid::new_v4(), ProgressStage::Preparing, "x"));
    }

    #[test]
    fn test_silent_reporter() {
        let reporter = ProgressReporter::silent();
        assert!(reporter.report(ProgressStage::Preparing, "nobody listens"));
        LoggingProgressSink.on_progress(ProgressEvent::new(reporter.request_id(), ProgressStage::Preparing, "log"));
    }
}
