//! Minimal Google Gemini API client.
//!
//! This crate provides a focused client for Gemini's `generateContent` endpoint with:
//! - Multi-turn conversations with user and model turns
//! - System instructions and sampling temperature
//! - Structured (JSON schema constrained) output via [`ResponseSchema`]

use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MODEL: &str = "gemini-flash-latest";
const JSON_MIME_TYPE: &str = "application/json";

/// Errors that can occur when using the Gemini client.
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

/// Types that can describe themselves as a Gemini response schema.
///
/// The schema uses the OpenAPI subset accepted by `generationConfig.responseSchema`.
/// Structs usually get this through `#[derive(Schema)]` from `dungeon-macros`.
pub trait ResponseSchema {
    fn response_schema() -> serde_json::Value;
}

macro_rules! primitive_schema {
    ($kind:literal => $($ty:ty),+) => {
        $(
            impl ResponseSchema for $ty {
                fn response_schema() -> serde_json::Value {
                    serde_json::json!({ "type": $kind })
                }
            }
        )+
    };
}

primitive_schema!("STRING" => String);
primitive_schema!("INTEGER" => i8, i16, i32, i64, u8, u16, u32, u64, usize, isize);
primitive_schema!("NUMBER" => f32, f64);
primitive_schema!("BOOLEAN" => bool);

impl<T: ResponseSchema> ResponseSchema for Vec<T> {
    fn response_schema() -> serde_json::Value {
        serde_json::json!({
            "type": "ARRAY",
            "items": T::response_schema()
        })
    }
}

impl<T: ResponseSchema> ResponseSchema for Option<T> {
    fn response_schema() -> serde_json::Value {
        let mut schema = T::response_schema();
        schema["nullable"] = serde_json::json!(true);
        schema
    }
}

/// Gemini API client.
#[derive(Clone)]
pub struct Gemini {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl fmt::Debug for Gemini {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gemini")
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl Gemini {
    /// Create a new Gemini client with the given API key.
    pub fn new(api_key: impl Into<String>) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .connect_timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {e}")))?;

        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(Error::NoApiKey);
        }

        Ok(Self {
            client,
            api_key,
            model: DEFAULT_MODEL.to_string(),
            base_url: API_BASE.to_string(),
        })
    }

    /// Create a Gemini client from the GEMINI_API_KEY environment variable.
    pub fn from_env() -> Result<Self, Error> {
        let api_key = std::env::var("GEMINI_API_KEY").map_err(|_| Error::NoApiKey)?;
        Self::new(api_key)
    }

    /// Set the default model for this client.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Point the client at a different API root (proxies, local fakes).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// The model used when a request does not name one.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Send a generation request and return the full response.
    pub async fn generate(&self, request: Request) -> Result<Response, Error> {
        let model = request.model.clone().unwrap_or_else(|| self.model.clone());
        let api_request = build_api_request(&request);
        let headers = self.build_headers()?;

        let response = self
            .client
            .post(format!("{}/models/{model}:generateContent", self.base_url))
            .headers(headers)
            .json(&api_request)
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

        let api_response: ApiResponse = response
            .json()
            .await
            .map_err(|e| Error::Parse(e.to_string()))?;

        Ok(parse_response(api_response))
    }

    /// Send a request constrained to `T`'s schema and decode the reply into `T`.
    ///
    /// The request's response schema is replaced by `T::response_schema()`.
    pub async fn generate_json<T>(&self, request: Request) -> Result<T, Error>
    where
        T: ResponseSchema + DeserializeOwned,
    {
        let request = request.with_response_schema(T::response_schema());
        self.generate(request).await?.parse_json()
    }

    fn build_headers(&self) -> Result<HeaderMap, Error> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            "x-goog-api-key",
            HeaderValue::from_str(&self.api_key)
                .map_err(|e| Error::Config(format!("Invalid API key: {e}")))?,
        );
        Ok(headers)
    }
}

fn build_api_request(request: &Request) -> ApiRequest {
    let contents = request
        .contents
        .iter()
        .map(|c| ApiContent {
            role: Some(c.role.as_str().to_string()),
            parts: c.parts.iter().map(|p| p.into()).collect(),
        })
        .collect();

    let system_instruction = request.system.as_ref().map(|text| ApiContent {
        role: None,
        parts: vec![ApiPart {
            text: Some(text.clone()),
            inline_data: None,
        }],
    });

    let generation_config = ApiGenerationConfig {
        temperature: request.temperature,
        max_output_tokens: request.max_output_tokens,
        response_mime_type: request
            .response_schema
            .as_ref()
            .map(|_| JSON_MIME_TYPE.to_string()),
        response_schema: request.response_schema.clone(),
    };

    ApiRequest {
        contents,
        system_instruction,
        generation_config,
    }
}

fn parse_response(api_response: ApiResponse) -> Response {
    let candidates = api_response
        .candidates
        .into_iter()
        .map(|c| {
            let content = c.content.unwrap_or_default();
            Candidate {
                content: Content {
                    role: match content.role.as_deref() {
                        Some("user") => Role::User,
                        _ => Role::Model,
                    },
                    parts: content.parts.into_iter().filter_map(Part::from_api).collect(),
                },
                finish_reason: match c.finish_reason.as_deref() {
                    Some("STOP") | None => FinishReason::Stop,
                    Some("MAX_TOKENS") => FinishReason::MaxTokens,
                    Some("SAFETY") => FinishReason::Safety,
                    Some("RECITATION") => FinishReason::Recitation,
                    Some(_) => FinishReason::Other,
                },
            }
        })
        .collect();

    let usage = api_response.usage_metadata.unwrap_or_default();

    Response {
        model_version: api_response.model_version,
        candidates,
        usage: Usage {
            prompt_tokens: usage.prompt_token_count,
            output_tokens: usage.candidates_token_count,
        },
    }
}

// ============================================================================
// Public types
// ============================================================================

/// A generation request to send to Gemini.
#[derive(Debug, Clone)]
pub struct Request {
    pub model: Option<String>,
    pub system: Option<String>,
    pub contents: Vec<Content>,
    pub temperature: Option<f32>,
    pub max_output_tokens: Option<u32>,
    pub response_schema: Option<serde_json::Value>,
}

impl Request {
    /// Create a new request with the given conversation contents.
    pub fn new(contents: Vec<Content>) -> Self {
        Self {
            model: None,
            system: None,
            contents,
            temperature: None,
            max_output_tokens: None,
            response_schema: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_output_tokens(mut self, max_output_tokens: u32) -> Self {
        self.max_output_tokens = Some(max_output_tokens);
        self
    }

    /// Constrain the reply to JSON matching `schema`.
    pub fn with_response_schema(mut self, schema: serde_json::Value) -> Self {
        self.response_schema = Some(schema);
        self
    }
}

/// One turn of the conversation.
#[derive(Debug, Clone, PartialEq)]
pub struct Content {
    pub role: Role,
    pub parts: Vec<Part>,
}

impl Content {
    /// Create a user turn with text content.
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            parts: vec![Part::Text { text: text.into() }],
        }
    }

    /// Create a model turn with text content.
    pub fn model(text: impl Into<String>) -> Self {
        Self {
            role: Role::Model,
            parts: vec![Part::Text { text: text.into() }],
        }
    }
}

/// The author of a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Model,
}

impl Role {
    fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Model => "model",
        }
    }
}

/// A piece of a turn.
#[derive(Debug, Clone, PartialEq)]
pub enum Part {
    Text { text: String },
    InlineData { mime_type: String, data: String },
}

impl Part {
    /// Extract text from a Text part.
    pub fn as_text(&self) -> Option<&str> {
        if let Part::Text { text } = self {
            Some(text)
        } else {
            None
        }
    }

    fn from_api(part: ApiPart) -> Option<Self> {
        match (part.text, part.inline_data) {
            (Some(text), _) => Some(Part::Text { text }),
            (None, Some(blob)) => Some(Part::InlineData {
                mime_type: blob.mime_type,
                data: blob.data,
            }),
            (None, None) => None,
        }
    }
}

/// A generation response from Gemini.
#[derive(Debug, Clone)]
pub struct Response {
    pub model_version: Option<String>,
    pub candidates: Vec<Candidate>,
    pub usage: Usage,
}

impl Response {
    /// Text of the first candidate, all parts concatenated.
    pub fn text(&self) -> String {
        self.candidates
            .first()
            .map(|c| {
                c.content
                    .parts
                    .iter()
                    .filter_map(Part::as_text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default()
    }

    /// Decode the first candidate's text as JSON.
    pub fn parse_json<T: DeserializeOwned>(&self) -> Result<T, Error> {
        let text = self.text();
        if text.trim().is_empty() {
            let reason = self
                .candidates
                .first()
                .map(|c| format!("{:?}", c.finish_reason))
                .unwrap_or_else(|| "no candidates".to_string());
            return Err(Error::Parse(format!("response contained no text ({reason})")));
        }
        serde_json::from_str(&text).map_err(|e| Error::Parse(e.to_string()))
    }
}

/// A single generated candidate.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub content: Content,
    pub finish_reason: FinishReason,
}

/// Why the model stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    MaxTokens,
    Safety,
    Recitation,
    Other,
}

/// Token usage information.
#[derive(Debug, Clone, Default)]
pub struct Usage {
    pub prompt_tokens: usize,
    pub output_tokens: usize,
}

// ============================================================================
// Internal API types
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ApiRequest {
    contents: Vec<ApiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<ApiContent>,
    generation_config: ApiGenerationConfig,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ApiContent {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<ApiPart>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiPart {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    inline_data: Option<ApiBlob>,
}

impl From<&Part> for ApiPart {
    fn from(part: &Part) -> Self {
        match part {
            Part::Text { text } => ApiPart {
                text: Some(text.clone()),
                inline_data: None,
            },
            Part::InlineData { mime_type, data } => ApiPart {
                text: None,
                inline_data: Some(ApiBlob {
                    mime_type: mime_type.clone(),
                    data: data.clone(),
                }),
            },
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiBlob {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ApiGenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_schema: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiResponse {
    #[serde(default)]
    candidates: Vec<ApiCandidate>,
    #[serde(default)]
    usage_metadata: Option<ApiUsage>,
    #[serde(default)]
    model_version: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiCandidate {
    #[serde(default)]
    content: Option<ApiContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiUsage {
    #[serde(default)]
    prompt_token_count: usize,
    #[serde(default)]
    candidates_token_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = Gemini::new("test-key").unwrap();
        assert_eq!(client.model(), DEFAULT_MODEL);
    }

    #[test]
    fn test_client_rejects_blank_key() {
        assert!(matches!(Gemini::new("   "), Err(Error::NoApiKey)));
    }

    #[test]
    fn test_client_with_model() {
        let client = Gemini::new("test-key").unwrap().with_model("gemini-2.5-pro");
        assert_eq!(client.model(), "gemini-2.5-pro");
    }

    #[test]
    fn test_debug_redacts_key() {
        let client = Gemini::new("super-secret").unwrap();
        let debug = format!("{client:?}");
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn test_request_builder() {
        let request = Request::new(vec![Content::user("Hello")])
            .with_system("You are a dungeon master")
            .with_temperature(2.0)
            .with_max_output_tokens(1000);

        assert_eq!(request.max_output_tokens, Some(1000));
        assert!(request.system.is_some());
        assert_eq!(request.temperature, Some(2.0));
        assert!(request.response_schema.is_none());
    }

    #[test]
    fn test_content_creation() {
        let user = Content::user("Hello");
        assert_eq!(user.role, Role::User);
        assert_eq!(user.parts.len(), 1);

        let model = Content::model("{}");
        assert_eq!(model.role, Role::Model);
        assert_eq!(model.parts[0].as_text(), Some("{}"));
    }

    #[test]
    fn test_api_request_shape() {
        let request = Request::new(vec![Content::user("..."), Content::model("{\"a\":1}")])
            .with_system("rules")
            .with_temperature(1.5)
            .with_response_schema(serde_json::json!({"type": "OBJECT"}));

        let body = serde_json::to_value(build_api_request(&request)).unwrap();

        assert_eq!(body["contents"][0]["role"], "user");
        assert_eq!(body["contents"][1]["role"], "model");
        assert_eq!(body["contents"][1]["parts"][0]["text"], "{\"a\":1}");
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "rules");
        assert!(body["systemInstruction"].get("role").is_none());
        assert_eq!(body["generationConfig"]["temperature"], 1.5);
        assert_eq!(body["generationConfig"]["responseMimeType"], "application/json");
        assert_eq!(body["generationConfig"]["responseSchema"]["type"], "OBJECT");
    }

    #[test]
    fn test_plain_request_has_no_mime_type() {
        let request = Request::new(vec![Content::user("hi")]);
        let body = serde_json::to_value(build_api_request(&request)).unwrap();
        assert!(body["generationConfig"].get("responseMimeType").is_none());
        assert!(body.get("systemInstruction").is_none());
    }

    #[test]
    fn test_parse_response_concatenates_parts() {
        let raw = serde_json::json!({
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": "{\"x\":"}, {"text": "3}"}]},
                "finishReason": "STOP"
            }],
            "usageMetadata": {"promptTokenCount": 12, "candidatesTokenCount": 4},
            "modelVersion": "gemini-flash-latest"
        });
        let api: ApiResponse = serde_json::from_value(raw).unwrap();
        let response = parse_response(api);

        assert_eq!(response.text(), "{\"x\":3}");
        assert_eq!(response.usage.prompt_tokens, 12);
        assert_eq!(response.candidates[0].finish_reason, FinishReason::Stop);

        #[derive(Deserialize)]
        struct X {
            x: i32,
        }
        let parsed: X = response.parse_json().unwrap();
        assert_eq!(parsed.x, 3);
    }

    #[test]
    fn test_parse_json_without_text_is_parse_error() {
        let raw = serde_json::json!({
            "candidates": [{"finishReason": "SAFETY"}]
        });
        let response = parse_response(serde_json::from_value(raw).unwrap());
        let err = response.parse_json::<serde_json::Value>().unwrap_err();
        assert!(matches!(err, Error::Parse(ref m) if m.contains("Safety")));
    }

    #[test]
    fn test_collection_schemas() {
        let schema = <Vec<String>>::response_schema();
        assert_eq!(schema["type"], "ARRAY");
        assert_eq!(schema["items"]["type"], "STRING");

        let optional = <Option<i32>>::response_schema();
        assert_eq!(optional["type"], "INTEGER");
        assert_eq!(optional["nullable"], true);
    }
}
