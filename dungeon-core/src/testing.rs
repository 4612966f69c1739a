//! Testing utilities for sessions.
//!
//! This module provides tools for integration testing:
//! - `MockTextClient` for deterministic structured replies without API calls
//! - `MockImageClient` for exercising the illustration retry policy
//! - `TestHarness` for driving a running orchestrator and watching its events
//! - Assertion helpers for verifying session state

use crate::client::{Clients, GenerationError, ImageClient, ImageError, StructuredClient};
use crate::config::GenerationConfig;
use crate::model::{Choice, GameState, InventoryItem, Quest, Stats};
use crate::orchestrator::{Phase, RepairPolicy, SessionEvent, SessionHandle, SessionOrchestrator};
use crate::session::Session;
use crate::transcript::{Turn, TurnId};
use async_trait::async_trait;
use image::DynamicImage;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// How long harness helpers wait for an event before giving up.
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

/// A plausible mid-game state with three choices and an image prompt.
pub fn sample_game_state() -> GameState {
    GameState {
        chapter_text: "## The Whispering Woods\\n\\nDusk settles over the trees. \
                       Lanterns flicker in Oakhaven to the east."
            .to_string(),
        inventory: vec![InventoryItem {
            name: "Health Potion".to_string(),
            options: vec!["use".to_string(), "discard".to_string()],
        }],
        health: 100,
        max_health: 100,
        image_prompt: "A lone traveller at the edge of a dark forest at dusk, \
                       village lanterns glowing in the distance, painterly realism"
            .to_string(),
        choices: vec![
            Choice {
                text: "Enter the woods".to_string(),
            },
            Choice {
                text: "Head to Oakhaven".to_string(),
            },
            Choice {
                text: "Make camp".to_string(),
            },
        ],
        stats: Stats {
            strength: 7,
            agility: 4,
            intelligence: 3,
            charisma: 5,
        },
        current_quest: Quest::default(),
    }
}

/// A scripted structured reply.
pub type MockReply = Result<GameState, GenerationError>;

/// A text client that returns scripted replies in order.
///
/// Every history it is called with is recorded. Once the script runs out,
/// calls never complete, which leaves the session waiting in `Generating`.
#[derive(Debug, Default)]
pub struct MockTextClient {
    replies: Mutex<VecDeque<MockReply>>,
    calls: Mutex<Vec<Vec<Turn>>>,
}

impl MockTextClient {
    pub fn new(replies: Vec<MockReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Add a reply to the end of the script.
    pub fn queue(&self, reply: MockReply) {
        self.replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(reply);
    }

    /// Histories received so far, oldest first.
    pub fn calls(&self) -> Vec<Vec<Turn>> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[async_trait]
impl StructuredClient for MockTextClient {
    async fn generate(
        &self,
        history: &[Turn],
        _config: &GenerationConfig,
    ) -> Result<GameState, GenerationError> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(history.to_vec());
        let reply = self
            .replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        match reply {
            Some(reply) => reply,
            None => std::future::pending().await,
        }
    }
}

/// An image client that fails a set number of times, then succeeds.
#[derive(Debug)]
pub struct MockImageClient {
    failures_left: AtomicU32,
    attempts: AtomicU32,
}

impl Default for MockImageClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MockImageClient {
    /// Always succeeds.
    pub fn new() -> Self {
        Self::failing(0)
    }

    /// Fails the first `failures` calls.
    pub fn failing(failures: u32) -> Self {
        Self {
            failures_left: AtomicU32::new(failures),
            attempts: AtomicU32::new(0),
        }
    }

    pub fn always_failing() -> Self {
        Self::failing(u32::MAX)
    }

    /// Calls made so far.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageClient for MockImageClient {
    async fn generate(&self, _prompt: &str) -> Result<DynamicImage, ImageError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let failed = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            Err(ImageError::Transport("mock failure".to_string()))
        } else {
            Ok(DynamicImage::new_rgb8(4, 3))
        }
    }
}

/// Test harness that runs an orchestrator against mock clients.
pub struct TestHarness {
    pub handle: SessionHandle,
    pub events: mpsc::UnboundedReceiver<SessionEvent>,
    pub text: Arc<MockTextClient>,
    pub image: Arc<MockImageClient>,
    task: JoinHandle<Session>,
}

impl TestHarness {
    /// Start a new game that will receive `replies` in order.
    pub fn new(replies: Vec<MockReply>) -> Self {
        Self::with_session(Session::new(), replies)
    }

    /// Resume `session` with scripted replies and an always-working image client.
    pub fn with_session(session: Session, replies: Vec<MockReply>) -> Self {
        Self::build(
            session,
            MockTextClient::new(replies),
            MockImageClient::new(),
            RepairPolicy::default(),
        )
    }

    pub fn build(
        session: Session,
        text: MockTextClient,
        image: MockImageClient,
        policy: RepairPolicy,
    ) -> Self {
        let text = Arc::new(text);
        let image = Arc::new(image);
        let clients = Clients::new(text.clone(), image.clone());
        let (orchestrator, events) = SessionOrchestrator::new(session, clients);
        let (handle, task) = orchestrator.with_policy(policy).spawn();
        Self {
            handle,
            events,
            text,
            image,
            task,
        }
    }

    /// Next event, or `None` after [`EVENT_TIMEOUT`].
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        tokio::time::timeout(EVENT_TIMEOUT, self.events.recv())
            .await
            .ok()
            .flatten()
    }

    /// Skip events until one matches.
    pub async fn expect_event(
        &mut self,
        mut matches: impl FnMut(&SessionEvent) -> bool,
    ) -> SessionEvent {
        loop {
            match self.next_event().await {
                Some(event) if matches(&event) => return event,
                Some(_) => continue,
                None => panic!("timed out waiting for event"),
            }
        }
    }

    /// Wait for the next accepted game state.
    pub async fn expect_game_state(&mut self) -> (TurnId, GameState) {
        match self
            .expect_event(|e| matches!(e, SessionEvent::GameStateUpdated { .. }))
            .await
        {
            SessionEvent::GameStateUpdated { turn, state } => (turn, state),
            _ => unreachable!(),
        }
    }

    /// Everything already queued, without waiting.
    pub fn drain_events(&mut self) -> Vec<SessionEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }

    pub async fn phase(&self) -> Phase {
        self.handle
            .status()
            .await
            .map(|s| s.phase)
            .unwrap_or(Phase::Closed)
    }

    /// Close the session and return its final state.
    pub async fn finish(self) -> Session {
        self.handle.close().await;
        match self.task.await {
            Ok(session) => session,
            Err(e) => panic!("orchestrator task failed: {e}"),
        }
    }
}

/// Assert that the transcript alternates user and model turns, starting with a user turn.
#[track_caller]
pub fn assert_alternating(session: &Session) {
    for (i, turn) in session.transcript.iter().enumerate() {
        assert_eq!(
            turn.is_user(),
            i % 2 == 0,
            "turn {i} has the wrong role: {turn:?}"
        );
    }
}

/// Assert the number of model turns in a session.
#[track_caller]
pub fn assert_model_turns(session: &Session, expected: usize) {
    assert_eq!(
        session.transcript.model_turn_count(),
        expected,
        "expected {expected} model turns"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_text_client_records_calls() {
        let client = MockTextClient::new(vec![Ok(sample_game_state())]);
        let history = vec![Turn::user("...")];

        let state = client
            .generate(&history, &GenerationConfig::default())
            .await
            .unwrap();
        assert_eq!(state, sample_game_state());
        assert_eq!(client.calls(), vec![history]);
    }

    #[tokio::test]
    async fn test_mock_image_client_counts() {
        let client = MockImageClient::failing(1);
        assert!(client.generate("x").await.is_err());
        assert!(client.generate("x").await.is_ok());
        assert!(client.generate("x").await.is_ok());
        assert_eq!(client.attempts(), 3);
    }

    #[test]
    fn test_sample_state_is_valid() {
        let state = sample_game_state();
        assert!(state.validate().is_ok());
        assert_eq!(state.clone().normalize(), state);
    }

    #[tokio::test]
    async fn test_harness_plays_opening() {
        let mut harness = TestHarness::new(vec![Ok(sample_game_state())]);
        let (turn, state) = harness.expect_game_state().await;
        assert_eq!(turn, TurnId(1));
        assert_eq!(state.choices.len(), 3);

        let session = harness.finish().await;
        assert_alternating(&session);
        assert_model_turns(&session, 1);
    }
}
