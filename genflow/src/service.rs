//! Interfaces to the collaborators outside the pipeline.
//!
//! These traits describe the remote generation service, the optional remote
//! text derivation service and the description source. The pipeline only depends
//! on their call contracts and on [`ServiceError`]'s taxonomy; wire formats are
//! the implementor's concern.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::cancellation::CancellationToken;
use crate::core::{ImageQuality, ImageStyle};
use crate::errors::ServiceError;

/// Payload sent to the generation service for one image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImagePayload {
    /// The description to render.
    pub prompt: String,
    /// Visual style.
    pub style: ImageStyle,
    /// Quality tier.
    pub quality: ImageQuality,
}

/// One image returned by the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedImage {
    /// Reference to the artifact, typically a URL.
    pub reference: String,
    /// The prompt as rewritten by the service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revised_description: Option<String>,
}

impl GeneratedImage {
    /// Creates an image without a revised description.
    #[must_use]
    pub fn new(reference: impl Into<String>) -> Self {
        Self {
            reference: reference.into(),
            revised_description: None,
        }
    }

    /// Sets the revised description.
    #[must_use]
    pub fn with_revised_description(mut self, revised: impl Into<String>) -> Self {
        self.revised_description = Some(revised.into());
        self
    }
}

/// A successful service response.
///
/// A response with no images is a nominal success that produced nothing; the
/// invoker reports it as [`crate::errors::GenflowError::NoResultProduced`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceResponse {
    /// Generated images, best first.
    #[serde(default)]
    pub images: Vec<GeneratedImage>,
}

impl ServiceResponse {
    /// Creates a response holding a single image.
    #[must_use]
    pub fn single(image: GeneratedImage) -> Self {
        Self { images: vec![image] }
    }

    /// Returns the first image with a non-empty reference.
    #[must_use]
    pub fn first_usable(&self) -> Option<&GeneratedImage> {
        self.images.iter().find(|image| !image.reference.trim().is_empty())
    }
}

/// The remote text-to-image service.
///
/// Implementations should watch `cancel` and abandon the in-flight call promptly
/// once it fires; the pipeline cancels it on timeout and on caller cancellation.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GenerationService: Send + Sync {
    /// Generates images for the payload.
    async fn generate_image(
        &self,
        payload: &ImagePayload,
        cancel: &CancellationToken,
    ) -> Result<ServiceResponse, ServiceError>;
}

/// A remote service deriving text, e.g. expanding a short description.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TextDerivationService: Send + Sync {
    /// Derives text from the input. An empty string counts as no result.
    async fn derive_text(&self, input: &str, cancel: &CancellationToken) -> Result<String, ServiceError>;
}

/// Supplies the description text for a generation request.
pub trait DescriptionSource: Send + Sync {
    /// Builds the description.
    fn describe(&self) -> String;
}

impl DescriptionSource for String {
    fn describe(&self) -> String {
        self.clone()
    }
}

impl DescriptionSource for &str {
    fn describe(&self) -> String {
        (*self).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_usable_skips_blank_references() {
        let response = ServiceResponse {
            images: vec![GeneratedImage::new("  "), GeneratedImage::new("https://img/2.png")],
        };

        assert_eq!(response.first_usable().unwrap().reference, "https://img/2.png");
        assert!(ServiceResponse::default().first_usable().is_none());
    }

    #[test]
    fn test_response_deserialize_without_revision() {
        let response: ServiceResponse =
            serde_json::from_str(r#"{"images":[{"reference":"https://img/1.png"}]}"#).unwrap();

        assert_eq!(response.images.len(), 1);
        assert!(response.images[0].revised_description.is_none());
    }

    #[test]
    fn test_description_source_for_strings() {
        assert_eq!("a red fox".describe(), "a red fox");
        assert_eq!(String::from("owl").describe(), "owl");
    }
}
