//! Remote service bindings.
//!
//! The orchestrator only sees the [`StructuredClient`] and [`ImageClient`]
//! traits. The Gemini and together.ai implementations live here too.

pub mod image;
pub mod text;

pub use self::image::{
    fetch_illustration, Illustration, ImageClient, ImageError, TogetherImageClient,
    MAX_IMAGE_ATTEMPTS,
};
pub use self::text::{GeminiTextClient, GenerationError, StructuredClient};

use crate::settings::{Settings, SettingsError};
use std::sync::Arc;
use thiserror::Error;

/// Errors building the live clients.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error("Gemini client: {0}")]
    Gemini(#[from] gemini::Error),

    #[error("together.ai client: {0}")]
    Together(#[from] together::Error),
}

/// The live service binding for one session. Holds no session state.
#[derive(Clone)]
pub struct Clients {
    pub text: Arc<dyn StructuredClient>,
    pub image: Arc<dyn ImageClient>,
}

impl Clients {
    pub fn new(text: Arc<dyn StructuredClient>, image: Arc<dyn ImageClient>) -> Self {
        Self { text, image }
    }

    /// Build Gemini and together.ai clients, failing if a key is missing.
    pub fn from_settings(settings: &Settings) -> Result<Self, ClientError> {
        settings.require()?;
        let text = GeminiTextClient::new(settings.gemini_api_key.clone(), settings.model())?;
        let image = TogetherImageClient::new(settings.together_api_key.clone())?;
        Ok(Self::new(Arc::new(text), Arc::new(image)))
    }
}

impl std::fmt::Debug for Clients {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Clients").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_settings_requires_keys() {
        let err = Clients::from_settings(&Settings::new("", "")).unwrap_err();
        assert!(matches!(
            err,
            ClientError::Settings(SettingsError::ConfigurationMissing(_))
        ));
    }

    #[test]
    fn test_from_settings_builds_clients() {
        assert!(Clients::from_settings(&Settings::new("g", "t")).is_ok());
    }
}
