//! Session orchestration for an AI narrated text adventure.
//!
//! This crate provides:
//! - The structured game state the model must return on every turn
//! - A transcript of alternating player and model turns
//! - A session orchestrator with repair, autosave and illustrations
//! - Session files (`.dms`) and world templates (`.dmt`)
//!
//! # Quick Start
//!
//! ```ignore
//! use dungeon_core::{Clients, Session, SessionEvent, SessionOrchestrator, Settings};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let settings = Settings::discover().await?;
//!     let clients = Clients::from_settings(&settings)?;
//!
//!     let (orchestrator, mut events) = SessionOrchestrator::new(Session::new(), clients);
//!     let (handle, _task) = orchestrator.spawn();
//!
//!     while let Some(event) = events.recv().await {
//!         if let SessionEvent::GameStateUpdated { state, .. } = event {
//!             println!("{}", state.chapter_markdown());
//!             handle.choose(0).await?;
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod headless;
pub mod model;
pub mod orchestrator;
pub mod persist;
pub mod prompts;
pub mod session;
pub mod settings;
pub mod template;
pub mod testing;
pub mod transcript;

// Re-export for convenience
pub use dungeon_macros::Schema;
pub use gemini::ResponseSchema;

// Primary public API
pub use client::{
    Clients, GenerationError, Illustration, ImageClient, ImageError, StructuredClient,
};
pub use config::GenerationConfig;
pub use headless::{HeadlessConfig, HeadlessGame};
pub use model::{Choice, GameState, InventoryItem, Quest, Stats};
pub use orchestrator::{
    AutosaveStatus, OrchestratorError, Phase, RepairPolicy, SessionEvent, SessionHandle,
    SessionOrchestrator,
};
pub use session::{Session, SessionError};
pub use settings::Settings;
pub use template::WorldTemplate;
pub use testing::{MockImageClient, MockTextClient, TestHarness};
pub use transcript::{Transcript, Turn, TurnId};
