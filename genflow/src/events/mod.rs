//! Event emission for observability and progress reporting.
//!
//! Two kinds of events leave the pipeline:
//! - telemetry events through an [`EventSink`] (attempts, cache hits, outcomes)
//! - per-request [`crate::core::ProgressEvent`]s through a [`ProgressSink`]
//!
//! Sinks are passed in explicitly; nothing here is process-global.

mod progress;
mod sink;

pub use progress::{
    ChannelProgressSink, CollectingProgressSink, LoggingProgressSink, NoOpProgressSink,
    ProgressReporter, ProgressSink,
};
pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
