//! Structured game state produced by the narrator model each turn.
//!
//! These types double as the response schema sent to the model (via
//! `#[derive(Schema)]`), so field names and docs here are what the model sees.

use dungeon_macros::Schema;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// Most choices a single turn may offer.
pub const MAX_CHOICES: usize = 4;

/// Upper bound for quest completion.
pub const MAX_COMPLETION: i32 = 100;

/// A turn's worth of structured model output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Schema)]
#[serde(rename_all = "camelCase")]
pub struct GameState {
    /// Narrative for this chapter, formatted as markdown
    pub chapter_text: String,

    /// Items the player carries, in display order
    pub inventory: Vec<InventoryItem>,

    /// Current health points
    pub health: i32,

    /// Maximum health points
    pub max_health: i32,

    /// Detailed scene description for an image generator; empty for no image
    pub image_prompt: String,

    /// Short options for what the player does next
    #[schema(min_items = 1, max_items = 4)]
    pub choices: Vec<Choice>,

    /// Player attributes, each nominally out of 10
    pub stats: Stats,

    /// Quest currently being tracked
    pub current_quest: Quest,
}

/// An item in the player's inventory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Schema)]
pub struct InventoryItem {
    /// Item name
    pub name: String,
    /// Verbs the player can apply to the item, such as "use" or "discard"
    pub options: Vec<String>,
}

/// One option offered to the player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Schema)]
pub struct Choice {
    /// Brief option text without markdown
    pub text: String,
}

/// The four player attributes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Schema)]
pub struct Stats {
    pub strength: i32,
    pub agility: i32,
    pub intelligence: i32,
    pub charisma: i32,
}

impl Stats {
    pub const NAMES: [&'static str; 4] = ["strength", "agility", "intelligence", "charisma"];

    /// Look up a stat by its lowercase name.
    pub fn get(&self, name: &str) -> Option<i32> {
        match name {
            "strength" => Some(self.strength),
            "agility" => Some(self.agility),
            "intelligence" => Some(self.intelligence),
            "charisma" => Some(self.charisma),
            _ => None,
        }
    }

    /// Stats as `(name, value)` pairs in display order.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, i32)> {
        [self.strength, self.agility, self.intelligence, self.charisma]
            .into_iter()
            .enumerate()
            .map(|(i, value)| (Self::NAMES[i], value))
    }
}

/// The tracked quest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Schema)]
#[serde(rename_all = "camelCase")]
pub struct Quest {
    /// Quest title, "No Quest" when there is none
    pub title: String,
    /// What the quest asks of the player
    pub description: String,
    /// Progress from 0 to 100
    pub completed_percentage: i32,
}

impl Default for Quest {
    fn default() -> Self {
        Self {
            title: "No Quest".to_string(),
            description: "Accept a quest from an NPC, and it will show up here!".to_string(),
            completed_percentage: 0,
        }
    }
}

/// A game state that parsed but breaks a domain rule.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Choices are empty")]
    EmptyChoices,
}

impl GameState {
    /// Chapter text with literal `\n` escapes turned into newlines.
    pub fn chapter_markdown(&self) -> String {
        self.chapter_text.replace("\\n", "\n")
    }

    /// Whether this turn wants an illustration.
    pub fn has_image_prompt(&self) -> bool {
        !self.image_prompt.trim().is_empty()
    }

    /// Check the rules a state must satisfy before it enters the transcript.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.choices.is_empty() {
            return Err(ValidationError::EmptyChoices);
        }
        Ok(())
    }

    /// Clamp numeric fields into range and drop surplus choices.
    ///
    /// Health ends up in `0..=max_health`, quest completion in `0..=100`.
    pub fn normalize(mut self) -> Self {
        if self.max_health < 0 {
            warn!(max_health = self.max_health, "negative max health, clamping to 0");
            self.max_health = 0;
        }
        let health = self.health.clamp(0, self.max_health);
        if health != self.health {
            warn!(
                health = self.health,
                max_health = self.max_health,
                "health out of range, clamping"
            );
            self.health = health;
        }

        let quest = &mut self.current_quest;
        let completed = quest.completed_percentage.clamp(0, MAX_COMPLETION);
        if completed != quest.completed_percentage {
            warn!(
                completed = quest.completed_percentage,
                "quest completion out of range, clamping"
            );
            quest.completed_percentage = completed;
        }

        if self.choices.len() > MAX_CHOICES {
            warn!(count = self.choices.len(), "too many choices, keeping the first {MAX_CHOICES}");
            self.choices.truncate(MAX_CHOICES);
        }
        self
    }

    /// The `index`-th choice, zero based.
    pub fn choice(&self, index: usize) -> Option<&Choice> {
        self.choices.get(index)
    }

    /// Find an inventory item by exact name.
    pub fn item(&self, name: &str) -> Option<&InventoryItem> {
        self.inventory.iter().find(|item| item.name == name)
    }
}

impl InventoryItem {
    pub fn has_option(&self, option: &str) -> bool {
        self.options.iter().any(|o| o == option)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::sample_game_state;
    use gemini::ResponseSchema;

    #[test]
    fn test_chapter_markdown_unescapes_newlines() {
        let mut state = sample_game_state();
        state.chapter_text = "# Chapter 1\\n\\nThe woods are quiet.".to_string();
        assert_eq!(state.chapter_markdown(), "# Chapter 1\n\nThe woods are quiet.");
    }

    #[test]
    fn test_validate_empty_choices() {
        let mut state = sample_game_state();
        assert!(state.validate().is_ok());

        state.choices.clear();
        assert_eq!(state.validate(), Err(ValidationError::EmptyChoices));
        assert_eq!(ValidationError::EmptyChoices.to_string(), "Choices are empty");
    }

    #[test]
    fn test_normalize_clamps_health() {
        let mut state = sample_game_state();
        state.health = 150;
        state.max_health = 100;
        let state = state.normalize();
        assert_eq!((state.health, state.max_health), (100, 100));

        let mut state = sample_game_state();
        state.health = -20;
        assert_eq!(state.normalize().health, 0);
    }

    #[test]
    fn test_normalize_clamps_quest_and_choices() {
        let mut state = sample_game_state();
        state.current_quest.completed_percentage = 140;
        state.choices = (0..6)
            .map(|i| Choice {
                text: format!("option {i}"),
            })
            .collect();

        let state = state.normalize();
        assert_eq!(state.current_quest.completed_percentage, 100);
        assert_eq!(state.choices.len(), MAX_CHOICES);
        assert_eq!(state.choices[3].text, "option 3");
    }

    #[test]
    fn test_wire_field_names() {
        let json = serde_json::to_value(sample_game_state()).unwrap();
        for key in [
            "chapterText",
            "inventory",
            "health",
            "maxHealth",
            "imagePrompt",
            "choices",
            "stats",
            "currentQuest",
        ] {
            assert!(json.get(key).is_some(), "missing {key}");
        }
        assert!(json["currentQuest"].get("completedPercentage").is_some());
        assert!(json["stats"].get("strength").is_some());
    }

    #[test]
    fn test_response_schema_shape() {
        let schema = GameState::response_schema();
        assert_eq!(schema["type"], "OBJECT");
        assert_eq!(schema["properties"]["chapterText"]["type"], "STRING");
        assert_eq!(schema["properties"]["health"]["type"], "INTEGER");
        assert_eq!(schema["properties"]["choices"]["type"], "ARRAY");
        assert_eq!(schema["properties"]["choices"]["maxItems"], 4);
        assert_eq!(
            schema["properties"]["choices"]["items"]["properties"]["text"]["type"],
            "STRING"
        );
        assert_eq!(
            schema["properties"]["currentQuest"]["properties"]["completedPercentage"]["type"],
            "INTEGER"
        );
        assert_eq!(schema["propertyOrdering"][0], "chapterText");

        let required = schema["required"].as_array().unwrap();
        assert_eq!(required.len(), 8);
    }

    #[test]
    fn test_stats_lookup() {
        let stats = Stats {
            strength: 7,
            agility: 3,
            intelligence: 2,
            charisma: 5,
        };
        assert_eq!(stats.get("agility"), Some(3));
        assert_eq!(stats.get("luck"), None);
        let names: Vec<_> = stats.iter().map(|(name, _)| name).collect();
        assert_eq!(names, Stats::NAMES);
    }

    #[test]
    fn test_item_lookup() {
        let state = sample_game_state();
        let potion = state.item("Health Potion").unwrap();
        assert!(potion.has_option("use"));
        assert!(!potion.has_option("throw"));
        assert!(state.item("Sword of Dawn").is_none());
    }
}
