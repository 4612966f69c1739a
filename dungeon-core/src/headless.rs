//! Headless game interface for programmatic use.
//!
//! This module provides a simplified interface for running sessions without
//! a UI. It's designed for:
//! - Automated testing with real AI responses
//! - Script-driven game sessions
//! - The line-oriented terminal front end
//!
//! # Example
//!
//! ```ignore
//! use dungeon_core::headless::{HeadlessConfig, HeadlessGame};
//! use dungeon_core::Settings;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let settings = Settings::discover().await?;
//!     let mut game = HeadlessGame::new(HeadlessConfig::new_game(), &settings).await?;
//!
//!     let opening = game.wait_for_turn().await?;
//!     println!("{}", opening.chapter_markdown());
//!
//!     let next = game.choose(0).await?;
//!     println!("HP: {}/{}", next.health, next.max_health);
//!
//!     game.save("my_game.dms").await?;
//!     Ok(())
//! }
//! ```

use crate::client::{Clients, Illustration};
use crate::model::GameState;
use crate::orchestrator::{RepairPolicy, SessionEvent, SessionHandle, SessionOrchestrator, SessionStatus};
use crate::persist::PersistError;
use crate::session::{Session, SessionError};
use crate::settings::Settings;
use crate::template::WorldTemplate;
use crate::transcript::TurnId;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Configuration for a headless game session.
#[derive(Debug, Clone, Default)]
pub struct HeadlessConfig {
    /// Resume from a `.dms` or `.dmt` file instead of starting fresh.
    pub load: Option<PathBuf>,
    /// World template for a fresh game. Ignored when loading.
    pub template: Option<WorldTemplate>,
    /// Directory that receives each illustration as PNG.
    pub image_dir: Option<PathBuf>,
    pub repair_policy: RepairPolicy,
}

impl HeadlessConfig {
    /// A fresh game with the default rule set.
    pub fn new_game() -> Self {
        Self::default()
    }

    /// Resume from a saved session or template.
    pub fn resume(path: impl Into<PathBuf>) -> Self {
        Self {
            load: Some(path.into()),
            ..Self::default()
        }
    }

    pub fn with_template(mut self, template: WorldTemplate) -> Self {
        self.template = Some(template);
        self
    }

    pub fn with_image_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.image_dir = Some(dir.into());
        self
    }

    pub fn with_repair_policy(mut self, policy: RepairPolicy) -> Self {
        self.repair_policy = policy;
        self
    }

    /// The session this configuration starts from.
    pub async fn session(&self) -> Result<Session, PersistError> {
        match (&self.load, &self.template) {
            (Some(path), _) => Session::load(path).await,
            (None, Some(template)) => Ok(template.clone().into_session()),
            (None, None) => Ok(Session::new()),
        }
    }
}

/// A session that can be driven turn by turn from code.
pub struct HeadlessGame {
    handle: SessionHandle,
    events: mpsc::UnboundedReceiver<SessionEvent>,
    task: JoinHandle<Session>,
    latest: Option<(TurnId, GameState)>,
    illustrations: Vec<Illustration>,
    notices: Vec<SessionEvent>,
    image_dir: Option<PathBuf>,
}

impl HeadlessGame {
    /// Start a game with live clients built from `settings`.
    pub async fn new(config: HeadlessConfig, settings: &Settings) -> Result<Self, SessionError> {
        let clients = Clients::from_settings(settings)?;
        Self::with_clients(config, clients).await
    }

    /// Start a game with the given service binding.
    pub async fn with_clients(config: HeadlessConfig, clients: Clients) -> Result<Self, SessionError> {
        let session = config.session().await?;
        if let Some(dir) = &config.image_dir {
            tokio::fs::create_dir_all(dir).await?;
        }
        info!(session = %session.id, turns = session.transcript.len(), "starting headless game");

        let (orchestrator, events) = SessionOrchestrator::new(session, clients);
        let (handle, task) = orchestrator.with_policy(config.repair_policy).spawn();

        Ok(Self {
            handle,
            events,
            task,
            latest: None,
            illustrations: Vec::new(),
            notices: Vec::new(),
            image_dir: config.image_dir,
        })
    }

    /// Wait until the model's next turn is accepted.
    ///
    /// Fails with [`SessionError::Stalled`] when the repair ceiling is reached.
    pub async fn wait_for_turn(&mut self) -> Result<&GameState, SessionError> {
        loop {
            let event = self
                .events
                .recv()
                .await
                .ok_or(crate::OrchestratorError::Closed)?;
            match event {
                SessionEvent::GameStateUpdated { turn, state } => {
                    self.latest = Some((turn, state));
                    break;
                }
                SessionEvent::Stalled { reason } => return Err(SessionError::Stalled(reason)),
                SessionEvent::Closed => return Err(crate::OrchestratorError::Closed.into()),
                other => self.observe(other),
            }
        }
        self.game_state().ok_or(SessionError::Orchestrator(
            crate::OrchestratorError::NoGameState,
        ))
    }

    /// Handle whatever events are already queued, without waiting.
    pub fn poll_events(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            match event {
                SessionEvent::GameStateUpdated { turn, state } => self.latest = Some((turn, state)),
                other => self.observe(other),
            }
        }
    }

    fn observe(&mut self, event: SessionEvent) {
        if let SessionEvent::ImageReady(illustration) = &event {
            if let Some(dir) = &self.image_dir {
                let path = dir.join(format!("turn_{:04}.png", illustration.turn.0));
                // A lost illustration never fails the turn
                match illustration.image.save_with_format(&path, image::ImageFormat::Png) {
                    Ok(()) => debug!(path = %path.display(), "illustration written"),
                    Err(e) => warn!(path = %path.display(), error = %e, "could not write illustration"),
                }
            }
            self.illustrations.push(illustration.clone());
        }
        self.notices.push(event);
    }

    /// Send free text as the player's turn and wait for the reply.
    pub async fn send(&mut self, text: &str) -> Result<&GameState, SessionError> {
        self.poll_events();
        self.handle.submit_choice(text).await?;
        self.wait_for_turn().await
    }

    /// Pick a choice (zero based) and wait for the reply.
    pub async fn choose(&mut self, index: usize) -> Result<&GameState, SessionError> {
        self.poll_events();
        self.handle.choose(index).await?;
        self.wait_for_turn().await
    }

    /// Use an inventory item's option and wait for the reply.
    pub async fn use_item(&mut self, item: &str, option: &str) -> Result<&GameState, SessionError> {
        self.poll_events();
        self.handle.use_item(item, option).await?;
        self.wait_for_turn().await
    }

    /// Resume a stalled session and wait for the reply.
    pub async fn retry(&mut self) -> Result<&GameState, SessionError> {
        self.handle.retry().await?;
        self.wait_for_turn().await
    }

    /// Save and enable autosave to `path`.
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<(), SessionError> {
        Ok(self.handle.save(path.as_ref()).await?)
    }

    pub async fn status(&self) -> Result<SessionStatus, SessionError> {
        Ok(self.handle.status().await?)
    }

    // ========================================================================
    // Game State Queries
    // ========================================================================

    /// The latest accepted game state.
    pub fn game_state(&self) -> Option<&GameState> {
        self.latest.as_ref().map(|(_, state)| state)
    }

    pub fn turn(&self) -> Option<TurnId> {
        self.latest.as_ref().map(|(turn, _)| *turn)
    }

    /// Current and maximum health.
    pub fn health(&self) -> Option<(i32, i32)> {
        self.game_state().map(|s| (s.health, s.max_health))
    }

    /// Texts of the current choices.
    pub fn choices(&self) -> Vec<&str> {
        self.game_state()
            .map(|s| s.choices.iter().map(|c| c.text.as_str()).collect())
            .unwrap_or_default()
    }

    /// Illustrations received so far.
    pub fn illustrations(&self) -> &[Illustration] {
        &self.illustrations
    }

    /// Events other than game state updates seen since the last call.
    pub fn take_notices(&mut self) -> Vec<SessionEvent> {
        std::mem::take(&mut self.notices)
    }

    pub fn handle(&self) -> &SessionHandle {
        &self.handle
    }

    /// Close the session and return its final state.
    pub async fn close(self) -> Result<Session, SessionError> {
        self.handle.close().await;
        Ok(self.task.await?)
    }
}
