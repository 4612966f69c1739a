//! Session state: the transcript plus the configuration that produced it.
//!
//! A `Session` never holds a client or a credential. The live service binding
//! is [`Clients`](crate::Clients), handed to the orchestrator separately.

use crate::client::ClientError;
use crate::config::GenerationConfig;
use crate::model::GameState;
use crate::orchestrator::OrchestratorError;
use crate::persist::{self, PersistError, SessionFileKind};
use crate::settings::SettingsError;
use crate::transcript::{Transcript, TurnId};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

pub type SessionId = Uuid;

/// Umbrella error for front ends that drive a whole session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Settings error: {0}")]
    Settings(#[from] SettingsError),

    #[error("Client error: {0}")]
    Client(#[from] ClientError),

    #[error("Persistence error: {0}")]
    Persist(#[from] PersistError),

    #[error("Session error: {0}")]
    Orchestrator(#[from] OrchestratorError),

    #[error("Generation stalled: {0}")]
    Stalled(String),

    #[error("Session task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// An adventure in progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: SessionId,
    pub transcript: Transcript,
    pub config: GenerationConfig,

    /// Where autosaves go. Not written to disk and empty after a load; only a
    /// manual save sets it.
    #[serde(skip)]
    pub autosave_path: Option<PathBuf>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    /// A new game with the default rule set, seeded with the bootstrap turn.
    pub fn new() -> Self {
        Self::with_config(GenerationConfig::default())
    }

    pub fn with_config(config: GenerationConfig) -> Self {
        Self::from_parts(Transcript::bootstrap(), config)
    }

    pub fn from_parts(transcript: Transcript, config: GenerationConfig) -> Self {
        Self {
            id: Uuid::new_v4(),
            transcript,
            config,
            autosave_path: None,
        }
    }

    pub fn latest_game_state(&self) -> Option<(TurnId, &GameState)> {
        self.transcript.latest_game_state()
    }

    /// Load a `.dms` or `.dmt` file. Autosave stays off until a manual save.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, PersistError> {
        Ok(persist::load_session(path).await?.session)
    }

    /// Write this session to `path` as a resumable session file.
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<(), PersistError> {
        persist::save_session(self, path, SessionFileKind::Session).await
    }
}
