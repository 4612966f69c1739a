//! Session persistence for save/load and autosave.
//!
//! Files are pretty JSON envelopes around a [`Session`]. A session holds no
//! client or credential, so nothing secret can reach disk.

use crate::session::Session;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;

/// Extension for resumable sessions.
pub const SESSION_EXTENSION: &str = "dms";

/// Extension for world templates.
pub const TEMPLATE_EXTENSION: &str = "dmt";

/// Current save file version.
pub const SAVE_VERSION: u32 = 1;

/// Errors from persistence operations.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid save format")]
    InvalidFormat,

    #[error("Version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
}

/// What a file on disk holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionFileKind {
    /// A game in progress.
    Session,
    /// A world template: bootstrap turn plus a custom system instruction.
    Template,
}

impl SessionFileKind {
    pub fn extension(self) -> &'static str {
        match self {
            SessionFileKind::Session => SESSION_EXTENSION,
            SessionFileKind::Template => TEMPLATE_EXTENSION,
        }
    }

    /// Kind implied by a path's extension.
    pub fn from_path(path: impl AsRef<Path>) -> Option<Self> {
        match path.as_ref().extension()?.to_str()? {
            SESSION_EXTENSION => Some(SessionFileKind::Session),
            TEMPLATE_EXTENSION => Some(SessionFileKind::Template),
            _ => None,
        }
    }
}

/// Summary stored beside the session so listings don't decode transcripts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveMetadata {
    /// Number of turns in the transcript.
    pub turns: usize,

    /// Title of the tracked quest, if the story has started.
    pub quest_title: Option<String>,

    /// Health and max health at save time.
    pub health: Option<(i32, i32)>,

    pub saved_at: DateTime<Utc>,
}

impl SaveMetadata {
    fn for_session(session: &Session, saved_at: DateTime<Utc>) -> Self {
        let latest = session.latest_game_state().map(|(_, state)| state);
        Self {
            turns: session.transcript.len(),
            quest_title: latest.map(|s| s.current_quest.title.clone()),
            health: latest.map(|s| (s.health, s.max_health)),
            saved_at,
        }
    }
}

/// The on-disk envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedSession {
    pub version: u32,
    pub saved_at: DateTime<Utc>,
    pub kind: SessionFileKind,
    pub metadata: SaveMetadata,
    pub session: Session,
}

impl SavedSession {
    pub fn new(session: Session, kind: SessionFileKind) -> Self {
        let saved_at = Utc::now();
        Self {
            version: SAVE_VERSION,
            saved_at,
            kind,
            metadata: SaveMetadata::for_session(&session, saved_at),
            session,
        }
    }
}

/// Serialize a session to bytes.
pub fn encode(session: &Session, kind: SessionFileKind) -> Result<Vec<u8>, PersistError> {
    let saved = SavedSession::new(session.clone(), kind);
    Ok(serde_json::to_vec_pretty(&saved)?)
}

/// Deserialize a saved session, checking the format version first.
pub fn decode(bytes: &[u8]) -> Result<SavedSession, PersistError> {
    #[derive(Deserialize)]
    struct Version {
        version: Option<u32>,
    }

    let version: Version = serde_json::from_slice(bytes)?;
    match version.version {
        Some(SAVE_VERSION) => Ok(serde_json::from_slice(bytes)?),
        Some(found) => Err(PersistError::VersionMismatch {
            expected: SAVE_VERSION,
            found,
        }),
        None => Err(PersistError::InvalidFormat),
    }
}

/// Write a session file, replacing any existing file.
pub async fn save_session(
    session: &Session,
    path: impl AsRef<Path>,
    kind: SessionFileKind,
) -> Result<(), PersistError> {
    let bytes = encode(session, kind)?;
    fs::write(path, bytes).await?;
    Ok(())
}

/// Read a session file.
pub async fn load_session(path: impl AsRef<Path>) -> Result<SavedSession, PersistError> {
    let bytes = fs::read(path).await?;
    decode(&bytes)
}

/// Read a file's metadata without decoding the transcript.
pub async fn peek_metadata(path: impl AsRef<Path>) -> Result<SaveMetadata, PersistError> {
    let content = fs::read_to_string(path).await?;

    #[derive(Deserialize)]
    struct Partial {
        version: u32,
        metadata: SaveMetadata,
    }

    let partial: Partial = serde_json::from_str(&content)?;

    if partial.version != SAVE_VERSION {
        return Err(PersistError::VersionMismatch {
            expected: SAVE_VERSION,
            found: partial.version,
        });
    }

    Ok(partial.metadata)
}

/// Information about a save file.
#[derive(Debug, Clone)]
pub struct SaveInfo {
    pub path: PathBuf,
    pub kind: SessionFileKind,
    pub metadata: SaveMetadata,
}

/// List session and template files in a directory, newest first.
///
/// Unreadable or foreign files are skipped.
pub async fn list_saves(dir: impl AsRef<Path>) -> Result<Vec<SaveInfo>, PersistError> {
    let mut saves = Vec::new();
    let mut entries = fs::read_dir(dir).await?;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let Some(kind) = SessionFileKind::from_path(&path) else {
            continue;
        };
        if let Ok(metadata) = peek_metadata(&path).await {
            saves.push(SaveInfo {
                path,
                kind,
                metadata,
            });
        }
    }

    saves.sort_by(|a, b| b.metadata.saved_at.cmp(&a.metadata.saved_at));
    Ok(saves)
}

/// `<dir>/<name>_<timestamp>.dms`, with the name reduced to `[A-Za-z0-9_]`.
pub fn manual_save_path(base_dir: impl AsRef<Path>, name: &str) -> PathBuf {
    let sanitized = name
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect::<String>();
    let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
    base_dir
        .as_ref()
        .join(format!("{sanitized}_{timestamp}.{SESSION_EXTENSION}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::sample_game_state;
    use tempfile::TempDir;

    fn played_session() -> Session {
        let mut session = Session::new();
        session.transcript.push_model(sample_game_state());
        session.transcript.push_user("I have chosen: Enter the woods");
        session
    }

    #[test]
    fn test_round_trip() {
        let session = played_session();
        let bytes = encode(&session, SessionFileKind::Session).unwrap();
        let saved = decode(&bytes).unwrap();

        assert_eq!(saved.session, session);
        assert_eq!(saved.kind, SessionFileKind::Session);
        assert_eq!(saved.metadata.turns, 3);
        assert_eq!(saved.metadata.health, Some((100, 100)));
    }

    #[test]
    fn test_version_mismatch() {
        let mut value: serde_json::Value =
            serde_json::from_slice(&encode(&played_session(), SessionFileKind::Session).unwrap())
                .unwrap();
        value["version"] = serde_json::json!(99);
        let bytes = serde_json::to_vec(&value).unwrap();

        assert!(matches!(
            decode(&bytes),
            Err(PersistError::VersionMismatch {
                expected: 1,
                found: 99
            })
        ));
    }

    #[test]
    fn test_missing_version_is_invalid() {
        assert!(matches!(
            decode(br#"{"session": {}}"#),
            Err(PersistError::InvalidFormat)
        ));
        assert!(matches!(decode(b"not json"), Err(PersistError::Json(_))));
    }

    #[test]
    fn test_file_kind_from_path() {
        assert_eq!(
            SessionFileKind::from_path("saves/run.dms"),
            Some(SessionFileKind::Session)
        );
        assert_eq!(
            SessionFileKind::from_path("worlds/hogwarts.dmt"),
            Some(SessionFileKind::Template)
        );
        assert_eq!(SessionFileKind::from_path("notes.txt"), None);
        assert_eq!(SessionFileKind::from_path("no_extension"), None);
    }

    #[test]
    fn test_manual_save_path_sanitizes() {
        let path = manual_save_path("/saves", "Grok's Quest!");
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("Grok_s_Quest__"));
        assert!(name.ends_with(".dms"));
    }

    #[tokio::test]
    async fn test_save_and_peek() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("run.dms");

        save_session(&played_session(), &path, SessionFileKind::Session)
            .await
            .unwrap();

        let metadata = peek_metadata(&path).await.unwrap();
        assert_eq!(metadata.turns, 3);
        assert_eq!(metadata.quest_title.as_deref(), Some("No Quest"));
    }

    #[tokio::test]
    async fn test_list_saves_filters_extensions() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();

        save_session(&played_session(), dir.join("a.dms"), SessionFileKind::Session)
            .await
            .unwrap();
        save_session(&Session::new(), dir.join("b.dmt"), SessionFileKind::Template)
            .await
            .unwrap();
        tokio::fs::write(dir.join("c.json"), "{}").await.unwrap();
        tokio::fs::write(dir.join("broken.dms"), "garbage").await.unwrap();

        let saves = list_saves(dir).await.unwrap();
        assert_eq!(saves.len(), 2);
        assert!(saves.iter().any(|s| s.kind == SessionFileKind::Template));
        assert!(saves.iter().any(|s| s.metadata.quest_title.is_none()));
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let result = load_session(temp_dir.path().join("nope.dms")).await;
        assert!(matches!(result, Err(PersistError::Io(_))));
    }
}
