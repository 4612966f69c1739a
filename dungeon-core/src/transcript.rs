//! The ordered conversation log that a session is built around.

use crate::model::GameState;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Message that opens every new session so the model writes the first scene.
pub const BOOTSTRAP_MESSAGE: &str = "...";

/// Position of a turn in its transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TurnId(pub usize);

impl fmt::Display for TurnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One exchange unit. Never modified once appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum Turn {
    User {
        text: String,
    },
    Model {
        #[serde(rename = "gameState")]
        game_state: GameState,
    },
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Turn::User { text: text.into() }
    }

    pub fn model(game_state: GameState) -> Self {
        Turn::Model { game_state }
    }

    pub fn is_user(&self) -> bool {
        matches!(self, Turn::User { .. })
    }

    pub fn game_state(&self) -> Option<&GameState> {
        match self {
            Turn::Model { game_state } => Some(game_state),
            Turn::User { .. } => None,
        }
    }
}

/// What the transcript's last turn says about the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscriptPhase {
    /// Nothing has been said yet.
    Empty,
    /// Ends in a user turn: a structured request is owed.
    AwaitingModel,
    /// Ends in a model turn: waiting on the player.
    AwaitingPlayer,
}

/// Append-only ordered log of turns.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Transcript {
    turns: Vec<Turn>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// A transcript holding only the bootstrap user turn.
    pub fn bootstrap() -> Self {
        let mut transcript = Self::new();
        transcript.push_user(BOOTSTRAP_MESSAGE);
        transcript
    }

    pub fn push_user(&mut self, text: impl Into<String>) -> TurnId {
        self.push(Turn::user(text))
    }

    pub fn push_model(&mut self, game_state: GameState) -> TurnId {
        self.push(Turn::model(game_state))
    }

    fn push(&mut self, turn: Turn) -> TurnId {
        self.turns.push(turn);
        TurnId(self.turns.len() - 1)
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Turn> {
        self.turns.iter()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    pub fn get(&self, id: TurnId) -> Option<&Turn> {
        self.turns.get(id.0)
    }

    pub fn phase(&self) -> TranscriptPhase {
        match self.turns.last() {
            None => TranscriptPhase::Empty,
            Some(Turn::User { .. }) => TranscriptPhase::AwaitingModel,
            Some(Turn::Model { .. }) => TranscriptPhase::AwaitingPlayer,
        }
    }

    /// The most recent model turn and its id.
    pub fn latest_game_state(&self) -> Option<(TurnId, &GameState)> {
        self.turns
            .iter()
            .enumerate()
            .rev()
            .find_map(|(i, turn)| turn.game_state().map(|state| (TurnId(i), state)))
    }

    pub fn model_turn_count(&self) -> usize {
        self.turns.iter().filter(|t| !t.is_user()).count()
    }

    pub fn user_turn_count(&self) -> usize {
        self.turns.iter().filter(|t| t.is_user()).count()
    }
}

impl<'a> IntoIterator for &'a Transcript {
    type Item = &'a Turn;
    type IntoIter = std::slice::Iter<'a, Turn>;

    fn into_iter(self) -> Self::IntoIter {
        self.turns.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::sample_game_state;

    #[test]
    fn test_bootstrap_owes_a_request() {
        let transcript = Transcript::bootstrap();
        assert_eq!(transcript.len(), 1);
        assert_eq!(transcript.phase(), TranscriptPhase::AwaitingModel);
        assert_eq!(transcript.last(), Some(&Turn::user(BOOTSTRAP_MESSAGE)));
    }

    #[test]
    fn test_phase_follows_last_turn() {
        let mut transcript = Transcript::new();
        assert_eq!(transcript.phase(), TranscriptPhase::Empty);

        transcript.push_user("...");
        let id = transcript.push_model(sample_game_state());
        assert_eq!(id, TurnId(1));
        assert_eq!(transcript.phase(), TranscriptPhase::AwaitingPlayer);

        transcript.push_user("I have chosen: Enter the woods");
        assert_eq!(transcript.phase(), TranscriptPhase::AwaitingModel);
    }

    #[test]
    fn test_latest_game_state() {
        let mut transcript = Transcript::bootstrap();
        assert!(transcript.latest_game_state().is_none());

        transcript.push_model(sample_game_state());
        let mut second = sample_game_state();
        second.health = 42;
        transcript.push_user("go on");
        transcript.push_model(second);

        let (id, state) = transcript.latest_game_state().unwrap();
        assert_eq!(id, TurnId(3));
        assert_eq!(state.health, 42);
        assert_eq!(transcript.model_turn_count(), 2);
        assert_eq!(transcript.user_turn_count(), 2);
    }

    #[test]
    fn test_turn_serialization() {
        let json = serde_json::to_value(Turn::user("hello")).unwrap();
        assert_eq!(json, serde_json::json!({"role": "user", "text": "hello"}));

        let json = serde_json::to_value(Turn::model(sample_game_state())).unwrap();
        assert_eq!(json["role"], "model");
        assert!(json["gameState"]["chapterText"].is_string());
    }
}
