//! Request orchestration.
//!
//! This module provides:
//! - [`RetryPolicy`]: error classification and linear, capped backoff
//! - [`with_timeout`]: the per-attempt timeout guard
//! - [`RemoteInvoker`]: the attempt loop around the remote services
//! - [`GenerationPipeline`]: cache lookup, remote call and cache write, with
//!   concurrent identical misses sharing one remote call

mod coordinator;
mod flight;
mod integration_tests;
mod invoker;
mod retry;
mod timeout;

pub use coordinator::GenerationPipeline;
pub use invoker::{AttemptOutcome, AttemptRecord, RemoteInvoker};
pub use retry::{RetryConfig, RetryDecision, RetryPolicy};
pub use timeout::{with_timeout, TimedResult, TIMEOUT_REASON};
