//! Core domain model types for genflow.
//!
//! This module contains the values that flow through the pipeline:
//! - Generation requests and their style/quality enums
//! - Generation and text results
//! - Progress stages and events

mod progress;
mod request;
mod result;

pub use progress::{ProgressEvent, ProgressStage};
pub use request::{normalize_text, GenerationRequest, ImageQuality, ImageStyle};
pub use result::{GenerationResult, ResultSource, TextResult};
