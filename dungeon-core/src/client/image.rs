//! Scene illustration.

use crate::transcript::TurnId;
use async_trait::async_trait;
use ::image::DynamicImage;
use std::sync::Arc;
use thiserror::Error;
use together::{ImageRequest, Together};
use tracing::{debug, warn};

/// Attempts made for one illustration before giving up.
pub const MAX_IMAGE_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ImageError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Could not decode image: {0}")]
    Decode(String),

    #[error("Image unavailable after {attempts} attempts: {last_error}")]
    Unavailable { attempts: u32, last_error: String },
}

impl From<together::Error> for ImageError {
    fn from(err: together::Error) -> Self {
        match err {
            together::Error::Parse(msg) => ImageError::Decode(msg),
            other => ImageError::Transport(other.to_string()),
        }
    }
}

/// Turns a text prompt into an image. One call is one attempt.
#[async_trait]
pub trait ImageClient: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<DynamicImage, ImageError>;
}

/// A finished illustration, tagged with the turn it belongs to.
#[derive(Debug, Clone)]
pub struct Illustration {
    pub turn: TurnId,
    pub prompt: String,
    pub image: Arc<DynamicImage>,
}

/// Try up to [`MAX_IMAGE_ATTEMPTS`] times, with no delay between attempts.
pub async fn fetch_illustration(
    client: &dyn ImageClient,
    prompt: &str,
) -> Result<DynamicImage, ImageError> {
    let mut last_error = String::new();
    for attempt in 1..=MAX_IMAGE_ATTEMPTS {
        match client.generate(prompt).await {
            Ok(image) => {
                debug!(attempt, "illustration ready");
                return Ok(image);
            }
            Err(e) => {
                warn!(attempt, error = %e, "illustration attempt failed");
                last_error = e.to_string();
            }
        }
    }
    Err(ImageError::Unavailable {
        attempts: MAX_IMAGE_ATTEMPTS,
        last_error,
    })
}

/// [`ImageClient`] backed by together.ai.
#[derive(Debug, Clone)]
pub struct TogetherImageClient {
    together: Together,
    model: String,
}

impl TogetherImageClient {
    pub fn new(api_key: impl Into<String>) -> Result<Self, together::Error> {
        Ok(Self::from_client(Together::new(api_key)?))
    }

    pub fn from_client(together: Together) -> Self {
        Self {
            together,
            model: together::DEFAULT_MODEL.to_string(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}

#[async_trait]
impl ImageClient for TogetherImageClient {
    async fn generate(&self, prompt: &str) -> Result<DynamicImage, ImageError> {
        let request = ImageRequest::new(prompt).with_model(self.model.clone());
        let response = self.together.generate_image(&request).await?;
        let bytes = response.first_image_bytes()?;
        ::image::load_from_memory(&bytes).map_err(|e| ImageError::Decode(e.to_string()))
    }
}
