//! Structured text generation.

use crate::config::GenerationConfig;
use crate::model::{GameState, ValidationError};
use crate::transcript::Turn;
use async_trait::async_trait;
use gemini::{Content, Gemini, Request};
use thiserror::Error;
use tracing::debug;

/// Why a structured request did not produce a usable game state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerationError {
    /// Network or authentication failure.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The reply did not parse into a game state.
    #[error("Schema error: {0}")]
    Schema(String),

    /// The reply parsed but broke a game rule.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl GenerationError {
    /// Text for the "what you need to fix" part of a repair request.
    pub fn fix_hint(&self) -> String {
        match self {
            GenerationError::Validation(e) => e.to_string(),
            other => other.to_string(),
        }
    }
}

impl From<gemini::Error> for GenerationError {
    fn from(err: gemini::Error) -> Self {
        match err {
            gemini::Error::Parse(msg) => GenerationError::Schema(msg),
            other => GenerationError::Transport(other.to_string()),
        }
    }
}

/// Produces the next game state from the conversation so far.
#[async_trait]
pub trait StructuredClient: Send + Sync {
    /// `history` is sent in order; model turns are re-sent as JSON.
    async fn generate(
        &self,
        history: &[Turn],
        config: &GenerationConfig,
    ) -> Result<GameState, GenerationError>;
}

/// [`StructuredClient`] backed by Gemini structured output.
#[derive(Debug, Clone)]
pub struct GeminiTextClient {
    gemini: Gemini,
}

impl GeminiTextClient {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Result<Self, gemini::Error> {
        Ok(Self {
            gemini: Gemini::new(api_key)?.with_model(model),
        })
    }

    pub fn from_client(gemini: Gemini) -> Self {
        Self { gemini }
    }

    pub fn model(&self) -> &str {
        self.gemini.model()
    }
}

/// Map transcript turns onto Gemini contents.
pub fn to_contents(history: &[Turn]) -> Result<Vec<Content>, GenerationError> {
    history
        .iter()
        .map(|turn| match turn {
            Turn::User { text } => Ok(Content::user(text.clone())),
            Turn::Model { game_state } => serde_json::to_string(game_state)
                .map(Content::model)
                .map_err(|e| GenerationError::Schema(e.to_string())),
        })
        .collect()
}

/// Build the request for a history and configuration.
pub fn build_request(
    history: &[Turn],
    config: &GenerationConfig,
) -> Result<Request, GenerationError> {
    let mut request = Request::new(to_contents(history)?)
        .with_system(config.system_instruction.clone())
        .with_temperature(config.temperature)
        .with_response_schema(config.response_schema());
    if let Some(model) = &config.model {
        request = request.with_model(model.clone());
    }
    Ok(request)
}

#[async_trait]
impl StructuredClient for GeminiTextClient {
    async fn generate(
        &self,
        history: &[Turn],
        config: &GenerationConfig,
    ) -> Result<GameState, GenerationError> {
        let request = build_request(history, config)?;
        debug!(turns = history.len(), model = %self.gemini.model(), "sending structured request");

        let response = self.gemini.generate(request).await?;
        debug!(
            prompt_tokens = response.usage.prompt_tokens,
            output_tokens = response.usage.output_tokens,
            "structured response received"
        );
        Ok(response.parse_json::<GameState>()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::sample_game_state;
    use gemini::Role;

    #[test]
    fn test_contents_keep_order_and_roles() {
        let history = vec![
            Turn::user("..."),
            Turn::model(sample_game_state()),
            Turn::user("I have chosen: Enter the woods"),
        ];
        let contents = to_contents(&history).unwrap();

        assert_eq!(contents.len(), 3);
        assert_eq!(contents[0].role, Role::User);
        assert_eq!(contents[1].role, Role::Model);
        assert_eq!(contents[2].role, Role::User);

        let text = contents[1].parts[0].as_text().unwrap();
        let echoed: GameState = serde_json::from_str(text).unwrap();
        assert_eq!(echoed, sample_game_state());
    }

    #[test]
    fn test_request_carries_config() {
        let config = GenerationConfig::new()
            .with_temperature(1.5)
            .with_system_instruction("rules")
            .with_model("gemini-2.5-pro");
        let request = build_request(&[Turn::user("...")], &config).unwrap();

        assert_eq!(request.temperature, Some(1.5));
        assert_eq!(request.system.as_deref(), Some("rules"));
        assert_eq!(request.model.as_deref(), Some("gemini-2.5-pro"));
        assert_eq!(request.response_schema, Some(config.response_schema()));
    }

    #[test]
    fn test_error_mapping() {
        let err: GenerationError = gemini::Error::Parse("bad json".into()).into();
        assert_eq!(err, GenerationError::Schema("bad json".into()));

        let err: GenerationError = gemini::Error::Api {
            status: 401,
            message: "unauthorized".into(),
        }
        .into();
        assert!(matches!(err, GenerationError::Transport(_)));
    }

    #[test]
    fn test_fix_hint() {
        let err = GenerationError::from(ValidationError::EmptyChoices);
        assert_eq!(err.fix_hint(), "Choices are empty");
        assert!(GenerationError::Transport("timeout".into())
            .fix_hint()
            .contains("timeout"));
    }
}
