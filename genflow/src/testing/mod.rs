//! Test doubles for code built on genflow.
//!
//! The scripted services replay a fixed list of outcomes and count calls and
//! cancellations; [`FailingCacheStore`] exercises cache degradation.

mod mocks;

pub use mocks::{FailingCacheStore, Scripted, ScriptedImageService, ScriptedTextService};
