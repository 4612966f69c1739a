//! Generation settings that travel with a session.

use crate::model::GameState;
use crate::prompts::SYSTEM_INSTRUCTION;
use gemini::ResponseSchema;
use serde::{Deserialize, Serialize};

/// Sampling temperature used unless a session overrides it.
pub const DEFAULT_TEMPERATURE: f32 = 2.0;

/// Per-session generation configuration.
///
/// The response schema is always the [`GameState`] shape, so it is derived
/// from the type rather than stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    /// Sampling temperature.
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Rule set handed to the model as its system instruction.
    pub system_instruction: String,

    /// Text model override. `None` uses the model from [`Settings`](crate::Settings).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

fn default_temperature() -> f32 {
    DEFAULT_TEMPERATURE
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: DEFAULT_TEMPERATURE,
            system_instruction: SYSTEM_INSTRUCTION.to_string(),
            model: None,
        }
    }
}

impl GenerationConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_system_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.system_instruction = instruction.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Schema every structured response must match.
    pub fn response_schema(&self) -> serde_json::Value {
        GameState::response_schema()
    }
}
