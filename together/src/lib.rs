//! Minimal together.ai image generation client.
//!
//! Covers the `images/generations` endpoint with base64 JSON responses,
//! which is all the illustration pipeline needs.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

const API_BASE: &str = "https://api.together.xyz/v1";
pub const DEFAULT_MODEL: &str = "black-forest-labs/FLUX.1-schnell-Free";

/// Errors that can occur when using the together.ai client.
#[derive(Debug, Error)]
pub enum Error {
    #[error("API key not configured")]
    NoApiKey,

    #[error("Network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// together.ai API client.
#[derive(Clone)]
pub struct Together {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl fmt::Debug for Together {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Together")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl Together {
    /// Create a new client with the given API key.
    pub fn new(api_key: impl Into<String>) -> Result<Self, Error> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(Error::NoApiKey);
        }

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .connect_timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key,
            base_url: API_BASE.to_string(),
        })
    }

    /// Create a client from the TOGETHER_API_KEY environment variable.
    pub fn from_env() -> Result<Self, Error> {
        let api_key = std::env::var("TOGETHER_API_KEY").map_err(|_| Error::NoApiKey)?;
        Self::new(api_key)
    }

    /// Point the client at a different API root.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Generate images for a prompt.
    pub async fn generate_image(&self, request: &ImageRequest) -> Result<ImageResponse, Error> {
        let headers = self.build_headers()?;

        let response = self
            .client
            .post(format!("{}/images/generations", self.base_url))
            .headers(headers)
            .json(request)
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Api {
                status,
                message: body,
            });
        }

        response
            .json::<ImageResponse>()
            .await
            .map_err(|e| Error::Parse(e.to_string()))
    }

    fn build_headers(&self) -> Result<HeaderMap, Error> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", self.api_key))
                .map_err(|e| Error::Config(format!("Invalid API key: {e}")))?,
        );
        Ok(headers)
    }
}

/// Output encoding requested from the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseFormat {
    B64Json,
    Url,
}

/// An image generation request.
#[derive(Debug, Clone, Serialize)]
pub struct ImageRequest {
    pub model: String,
    pub prompt: String,
    pub width: u32,
    pub height: u32,
    pub steps: u32,
    pub n: u32,
    pub response_format: ResponseFormat,
}

impl ImageRequest {
    /// A single 1024x768 two-step image, returned as base64 JSON.
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            prompt: prompt.into(),
            width: 1024,
            height: 768,
            steps: 2,
            n: 1,
            response_format: ResponseFormat::B64Json,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_steps(mut self, steps: u32) -> Self {
        self.steps = steps;
        self
    }
}

/// An image generation response.
#[derive(Debug, Clone, Deserialize)]
pub struct ImageResponse {
    #[serde(default)]
    pub data: Vec<ImageData>,
}

impl ImageResponse {
    /// Decoded bytes of the first image.
    pub fn first_image_bytes(&self) -> Result<Vec<u8>, Error> {
        self.data
            .first()
            .ok_or_else(|| Error::Parse("response contained no images".to_string()))?
            .decode()
    }
}

/// One generated image.
#[derive(Debug, Clone, Deserialize)]
pub struct ImageData {
    #[serde(default)]
    pub b64_json: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

impl ImageData {
    /// Decode the base64 payload.
    pub fn decode(&self) -> Result<Vec<u8>, Error> {
        let encoded = self
            .b64_json
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::Parse("image has no b64_json payload".to_string()))?;
        BASE64
            .decode(encoded.trim().as_bytes())
            .map_err(|e| Error::Parse(format!("base64 decode failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_defaults() {
        let request = ImageRequest::new("a misty forest at dusk");
        let body = serde_json::to_value(&request).unwrap();

        assert_eq!(body["model"], DEFAULT_MODEL);
        assert_eq!(body["prompt"], "a misty forest at dusk");
        assert_eq!(body["width"], 1024);
        assert_eq!(body["height"], 768);
        assert_eq!(body["steps"], 2);
        assert_eq!(body["n"], 1);
        assert_eq!(body["response_format"], "b64_json");
    }

    #[test]
    fn test_request_builder() {
        let request = ImageRequest::new("x").with_size(512, 512).with_steps(4);
        assert_eq!((request.width, request.height, request.steps), (512, 512, 4));
    }

    #[test]
    fn test_decode_payload() {
        let raw = serde_json::json!({"data": [{"b64_json": BASE64.encode(b"png-bytes")}]});
        let response: ImageResponse = serde_json::from_value(raw).unwrap();
        assert_eq!(response.first_image_bytes().unwrap(), b"png-bytes");
    }

    #[test]
    fn test_empty_response_is_parse_error() {
        let response: ImageResponse = serde_json::from_value(serde_json::json!({})).unwrap();
        assert!(matches!(response.first_image_bytes(), Err(Error::Parse(_))));
    }

    #[test]
    fn test_bad_base64_is_parse_error() {
        let data = ImageData {
            b64_json: Some("not base64!!".to_string()),
            url: None,
        };
        assert!(matches!(data.decode(), Err(Error::Parse(_))));
    }

    #[test]
    fn test_debug_redacts_key() {
        let client = Together::new("tg-secret").unwrap();
        assert!(!format!("{client:?}").contains("tg-secret"));
    }
}
