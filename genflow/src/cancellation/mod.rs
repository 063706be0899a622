//! Cooperative cancellation.
//!
//! A [`CancellationToken`] is handed to every remote call so that timeouts and
//! caller cancellation reach the in-flight operation.

mod token;

pub use token::{CancelCallback, CancellationToken};
