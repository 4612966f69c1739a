//! Credentials and model selection.
//!
//! Settings are created once at startup and handed to client construction.
//! They come from a JSON file under the platform config directory, with
//! environment variables (and `.env`) taking precedence.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tracing::debug;

/// Text model used when none is configured.
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-flash-latest";

/// Text models offered for selection.
pub const GEMINI_MODELS: &[&str] = &[
    "gemini-flash-latest",
    "gemini-flash-lite-latest",
    "gemini-2.5-pro",
    "gemini-2.5-flash",
    "gemini-2.5-flash-lite",
    "gemini-2.0-flash",
    "gemini-2.0-flash-lite",
    "gemini-1.5-flash",
    "gemini-1.5-flash-8b",
    "gemini-1.5-pro",
];

pub const GEMINI_API_KEY_VAR: &str = "GEMINI_API_KEY";
pub const TOGETHER_API_KEY_VAR: &str = "TOGETHER_API_KEY";
pub const GEMINI_MODEL_VAR: &str = "GEMINI_MODEL";

/// Errors from loading or checking settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid settings file: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration missing: {0} is not set")]
    ConfigurationMissing(&'static str),
}

/// API keys and the chosen text model.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub gemini_api_key: String,
    pub together_api_key: String,
    pub gemini_model: String,
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn redact(key: &str) -> &'static str {
            if key.trim().is_empty() {
                "<unset>"
            } else {
                "<redacted>"
            }
        }
        f.debug_struct("Settings")
            .field("gemini_api_key", &redact(&self.gemini_api_key))
            .field("together_api_key", &redact(&self.together_api_key))
            .field("gemini_model", &self.gemini_model)
            .finish()
    }
}

impl Settings {
    pub fn new(gemini_api_key: impl Into<String>, together_api_key: impl Into<String>) -> Self {
        Self {
            gemini_api_key: gemini_api_key.into(),
            together_api_key: together_api_key.into(),
            gemini_model: String::new(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.gemini_model = model.into();
        self
    }

    /// `<config dir>/dungeon-master/settings.json`, or the working directory
    /// when the platform has no config dir.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("dungeon-master")
            .join("settings.json")
    }

    /// Read settings from a JSON file.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let content = fs::read_to_string(path).await?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Write settings as JSON, creating parent directories.
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<(), SettingsError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?).await?;
        Ok(())
    }

    /// Settings from the environment only.
    pub fn from_env() -> Self {
        Self::default().with_env()
    }

    /// Load `.env`, then the default settings file if present, then
    /// environment overrides.
    pub async fn discover() -> Result<Self, SettingsError> {
        dotenvy::dotenv().ok();

        let path = Self::default_path();
        let settings = match Self::load(&path).await {
            Ok(settings) => {
                debug!(path = %path.display(), "loaded settings file");
                settings
            }
            Err(SettingsError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                Self::default()
            }
            Err(e) => return Err(e),
        };
        Ok(settings.with_env())
    }

    /// Override fields from process environment variables.
    pub fn with_env(self) -> Self {
        self.with_vars(|name| std::env::var(name).ok())
    }

    /// Override fields from any variable source. Blank values are ignored.
    pub fn with_vars(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        if let Some(key) = var(GEMINI_API_KEY_VAR) {
            self.gemini_api_key = key;
        }
        if let Some(key) = var(TOGETHER_API_KEY_VAR) {
            self.together_api_key = key;
        }
        if let Some(model) = var(GEMINI_MODEL_VAR) {
            self.gemini_model = model;
        }
        self
    }

    /// Text model to use, falling back to [`DEFAULT_GEMINI_MODEL`].
    pub fn model(&self) -> &str {
        let model = self.gemini_model.trim();
        if model.is_empty() {
            DEFAULT_GEMINI_MODEL
        } else {
            model
        }
    }

    pub fn is_known_model(&self) -> bool {
        GEMINI_MODELS.contains(&self.model())
    }

    /// Fail with the first missing credential.
    pub fn require(&self) -> Result<(), SettingsError> {
        if self.gemini_api_key.trim().is_empty() {
            return Err(SettingsError::ConfigurationMissing(GEMINI_API_KEY_VAR));
        }
        if self.together_api_key.trim().is_empty() {
            return Err(SettingsError::ConfigurationMissing(TOGETHER_API_KEY_VAR));
        }
        Ok(())
    }
}
