//! Generation requests and their visual attribute enums.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::service::ImagePayload;

/// Visual style requested from the generation service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageStyle {
    /// Photographic rendering.
    #[default]
    Realistic,
    /// Flat, outlined cartoon rendering.
    Cartoon,
    /// Soft watercolor painting.
    Watercolor,
    /// Low-resolution pixel art.
    PixelArt,
    /// Pencil sketch.
    Sketch,
}

impl ImageStyle {
    /// Returns the stable identifier used in cache keys and payloads.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Realistic => "realistic",
            Self::Cartoon => "cartoon",
            Self::Watercolor => "watercolor",
            Self::PixelArt => "pixel_art",
            Self::Sketch => "sketch",
        }
    }
}

impl fmt::Display for ImageStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Quality tier requested from the generation service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageQuality {
    /// Default tier.
    #[default]
    Standard,
    /// Higher detail, slower and more expensive.
    Hd,
}

impl ImageQuality {
    /// Returns the stable identifier used in cache keys and payloads.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Hd => "hd",
        }
    }
}

impl fmt::Display for ImageQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request to generate one image. The unit of deduplication.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// Free-form content description.
    pub description: String,
    /// Visual style.
    pub style: ImageStyle,
    /// Quality tier.
    pub quality: ImageQuality,
}

impl GenerationRequest {
    /// Creates a new request.
    #[must_use]
    pub fn new(description: impl Into<String>, style: ImageStyle, quality: ImageQuality) -> Self {
        Self {
            description: description.into(),
            style,
            quality,
        }
    }

    /// Returns the description in canonical form.
    ///
    /// Two descriptions that differ only in case or whitespace normalize equally.
    #[must_use]
    pub fn normalized_description(&self) -> String {
        normalize_text(&self.description)
    }

    /// Builds the payload sent to the generation service.
    #[must_use]
    pub fn to_payload(&self) -> ImagePayload {
        ImagePayload {
            prompt: self.description.trim().to_string(),
            style: self.style,
            quality: self.quality,
        }
    }
}

/// Trims, collapses whitespace runs and lowercases.
#[must_use]
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
