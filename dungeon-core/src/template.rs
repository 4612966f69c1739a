//! World templates (`.dmt` files).
//!
//! A template customises the rule set with a storyline, an opening scene, the
//! selectable characters and the starting items. It is stored as a session
//! whose transcript holds only the bootstrap turn.

use crate::config::GenerationConfig;
use crate::persist::{self, PersistError, SessionFileKind};
use crate::prompts::{SYSTEM_INSTRUCTION, TEMPLATE_APPENDIX};
use crate::session::Session;
use std::path::Path;
use thiserror::Error;

pub const DEFAULT_STORYLINE: &str =
    "The storyline can be imagined. It just needs to have a RPG, medieval, fantasy theme.";

pub const DEFAULT_START_OF_SESSION: &str = "The story starts with the character on the edge of the Whispering Woods, and the sun has just set. To the right, there's the small village of Oakhaven. Forwards, deeper into the woods, there are rustling sounds and a sense of doom.";

pub const DEFAULT_CHARACTERS: &str = "\
1. Grok the Barbarian: A mountain of muscle and fury from the northern wastes. Unmatched in brute strength and combat, though his mind is not his sharpest weapon. He yearns for glory and the thrill of battle.
2. Elara the Shadow Walker: A nimble rogue from the veiled forests of Whisperwood and a master of stealth and deception. She seeks secrets and hidden treasures.
3. Professor Phileas Fogg: A wizened scholar from the Academy of Veritas with a vast store of arcane knowledge. Frail of body, driven by curiosity and the pursuit of forgotten lore.
4. Seraphina the Diplomat: A charismatic noble from the sun-kissed city of Aurelia whose words open doors where force would fail. She strives for peace, though she knows courtly intrigue well.";

pub const DEFAULT_STARTER_ITEMS: &str = "(DEFAULT) Health potion. Can be used or discarded.\n(ONLY FOR Grok) A massive iron mace, with extra fight buffs.";

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("instruction has no ```{0} block")]
    MissingBlock(&'static str),

    #[error("{0} may not contain a ``` fence")]
    FenceInField(&'static str),

    #[error("Persistence error: {0}")]
    Persist(#[from] PersistError),
}

/// The four customisable fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorldTemplate {
    pub storyline: String,
    pub start_of_session: String,
    pub characters: String,
    pub starter_items: String,
}

impl Default for WorldTemplate {
    fn default() -> Self {
        Self {
            storyline: DEFAULT_STORYLINE.to_string(),
            start_of_session: DEFAULT_START_OF_SESSION.to_string(),
            characters: DEFAULT_CHARACTERS.to_string(),
            starter_items: DEFAULT_STARTER_ITEMS.to_string(),
        }
    }
}

/// (placeholder, fence tag, default)
const FIELDS: [(&str, &str, &str); 4] = [
    ("$STORYLINE", "storyline", DEFAULT_STORYLINE),
    ("$START_OF_SESSION", "start_of_session", DEFAULT_START_OF_SESSION),
    ("$CHARACTERS", "characters", DEFAULT_CHARACTERS),
    ("$STARTER_ITEMS", "starter_items", DEFAULT_STARTER_ITEMS),
];

impl WorldTemplate {
    pub fn with_storyline(mut self, storyline: impl Into<String>) -> Self {
        self.storyline = storyline.into();
        self
    }

    pub fn with_start_of_session(mut self, start: impl Into<String>) -> Self {
        self.start_of_session = start.into();
        self
    }

    pub fn with_characters(mut self, characters: impl Into<String>) -> Self {
        self.characters = characters.into();
        self
    }

    pub fn with_starter_items(mut self, items: impl Into<String>) -> Self {
        self.starter_items = items.into();
        self
    }

    fn values(&self) -> [&str; 4] {
        [
            &self.storyline,
            &self.start_of_session,
            &self.characters,
            &self.starter_items,
        ]
    }

    /// The full system instruction: base rules plus the custom-rules appendix.
    ///
    /// Placeholders are filled in one pass, so a value that mentions another
    /// placeholder is kept as written.
    pub fn render(&self) -> String {
        let values = self.values();
        let mut rendered = String::from(SYSTEM_INSTRUCTION);
        let mut rest = TEMPLATE_APPENDIX;

        while let Some((index, at)) = FIELDS
            .iter()
            .enumerate()
            .filter_map(|(i, (placeholder, _, _))| rest.find(placeholder).map(|at| (i, at)))
            .min_by_key(|&(_, at)| at)
        {
            rendered.push_str(&rest[..at]);
            rendered.push_str(values[index].trim());
            rest = &rest[at + FIELDS[index].0.len()..];
        }
        rendered.push_str(rest);
        rendered
    }

    /// Fails if a field would end its fenced block early.
    pub fn validate(&self) -> Result<(), TemplateError> {
        for ((_, tag, _), value) in FIELDS.iter().zip(self.values()) {
            if value.contains("```") {
                return Err(TemplateError::FenceInField(tag));
            }
        }
        Ok(())
    }

    /// Recover a template from a rendered instruction.
    ///
    /// Blocks still holding their `$` placeholder fall back to the default.
    pub fn parse(instruction: &str) -> Result<Self, TemplateError> {
        let field = |index: usize| -> Result<String, TemplateError> {
            let (placeholder, tag, default) = FIELDS[index];
            let block = find_block(instruction, tag).ok_or(TemplateError::MissingBlock(tag))?;
            Ok(if block == placeholder { default } else { block }.to_string())
        };

        Ok(Self {
            storyline: field(0)?,
            start_of_session: field(1)?,
            characters: field(2)?,
            starter_items: field(3)?,
        })
    }

    /// Template behind a session's system instruction.
    pub fn from_session(session: &Session) -> Result<Self, TemplateError> {
        Self::parse(&session.config.system_instruction)
    }

    /// A fresh session that starts from this template.
    pub fn into_session(self) -> Session {
        Session::with_config(GenerationConfig::default().with_system_instruction(self.render()))
    }

    /// Write this template as a `.dmt` file.
    pub async fn save(self, path: impl AsRef<Path>) -> Result<(), TemplateError> {
        self.validate()?;
        persist::save_session(&self.into_session(), path, SessionFileKind::Template).await?;
        Ok(())
    }
}

/// Trimmed contents of the first ```` ```tag ```` fenced block.
fn find_block<'a>(text: &'a str, tag: &str) -> Option<&'a str> {
    let open = format!("```{tag}");
    let start = text.find(&open)? + open.len();
    let rest = &text[start..];
    let end = rest.find("```")?;
    Some(rest[..end].trim())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcript::{TranscriptPhase, BOOTSTRAP_MESSAGE};
    use tempfile::TempDir;

    #[test]
    fn test_render_fills_blocks() {
        let rendered = WorldTemplate::default()
            .with_storyline("A heist in a floating city.")
            .render();

        assert!(rendered.starts_with(SYSTEM_INSTRUCTION));
        assert!(rendered.contains("```storyline\nA heist in a floating city.\n```"));
        assert!(!rendered.contains("$STORYLINE"));
        assert!(!rendered.contains("$STARTER_ITEMS"));
    }

    #[test]
    fn test_parse_recovers_fields() {
        let template = WorldTemplate::default()
            .with_storyline("A heist in a floating city.")
            .with_characters("1. Vex the Locksmith");

        assert_eq!(WorldTemplate::parse(&template.render()).unwrap(), template);
    }

    #[test]
    fn test_parse_maps_placeholders_to_defaults() {
        let raw = format!("{SYSTEM_INSTRUCTION}{TEMPLATE_APPENDIX}");
        assert_eq!(WorldTemplate::parse(&raw).unwrap(), WorldTemplate::default());
    }

    #[test]
    fn test_parse_plain_rules_fails() {
        assert!(matches!(
            WorldTemplate::parse(SYSTEM_INSTRUCTION),
            Err(TemplateError::MissingBlock("storyline"))
        ));
    }

    #[test]
    fn test_placeholder_text_in_value_kept() {
        let template = WorldTemplate::default()
            .with_storyline("A bard sings of $CHARACTERS and $STARTER_ITEMS.");
        let rendered = template.render();

        assert!(rendered.contains("```storyline\nA bard sings of $CHARACTERS and $STARTER_ITEMS.\n```"));
        assert_eq!(rendered.matches(DEFAULT_STARTER_ITEMS).count(), 1);
        assert_eq!(WorldTemplate::parse(&rendered).unwrap(), template);
    }

    #[tokio::test]
    async fn test_fence_in_field_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("broken.dmt");
        let template = WorldTemplate::default().with_characters("1. Vex\n```\n2. Mara");

        assert!(matches!(
            template.validate(),
            Err(TemplateError::FenceInField("characters"))
        ));
        assert!(matches!(
            template.save(&path).await,
            Err(TemplateError::FenceInField("characters"))
        ));
        assert!(!path.exists());
        assert!(WorldTemplate::default().validate().is_ok());
    }

    #[test]
    fn test_into_session() {
        let session = WorldTemplate::default().into_session();
        assert_eq!(session.transcript.len(), 1);
        assert_eq!(session.transcript.phase(), TranscriptPhase::AwaitingModel);
        assert_eq!(
            session.transcript.last().unwrap(),
            &crate::transcript::Turn::user(BOOTSTRAP_MESSAGE)
        );
        assert!(session.config.system_instruction.contains("```characters"));
    }

    #[tokio::test]
    async fn test_save_writes_template_kind() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("world.dmt");

        WorldTemplate::default().save(&path).await.unwrap();

        let saved = persist::load_session(&path).await.unwrap();
        assert_eq!(saved.kind, SessionFileKind::Template);
        assert_eq!(
            WorldTemplate::from_session(&saved.session).unwrap(),
            WorldTemplate::default()
        );
    }
}
