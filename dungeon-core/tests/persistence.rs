//! Save/load tests for session files and world templates.

use dungeon_core::persist::{self, SessionFileKind};
use dungeon_core::testing::{assert_model_turns, sample_game_state};
use dungeon_core::{
    Clients, HeadlessConfig, HeadlessGame, MockImageClient, MockTextClient, Session,
    SessionOrchestrator, Settings, WorldTemplate,
};
use std::sync::Arc;
use tempfile::TempDir;

const GEMINI_SECRET: &str = "gm-test-secret-0042";
const TOGETHER_SECRET: &str = "tg-test-secret-0042";

#[tokio::test]
async fn test_saved_file_holds_no_credentials() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("secret.dms");

    let settings = Settings::new(GEMINI_SECRET, TOGETHER_SECRET);
    let clients = Clients::from_settings(&settings).unwrap();

    let mut session = Session::new();
    session.transcript.push_model(sample_game_state());
    let (mut orchestrator, _events) = SessionOrchestrator::new(session.clone(), clients);
    orchestrator.save(&path).await.unwrap();

    let bytes = tokio::fs::read_to_string(&path).await.unwrap();
    assert!(!bytes.contains(GEMINI_SECRET));
    assert!(!bytes.contains(TOGETHER_SECRET));

    let loaded = Session::load(&path).await.unwrap();
    assert_eq!(loaded.transcript, session.transcript);
    assert_eq!(loaded.config, session.config);
}

#[tokio::test]
async fn test_headless_resume_continues_story() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("resume.dms");

    let clients = Clients::new(
        Arc::new(MockTextClient::new(vec![Ok(sample_game_state())])),
        Arc::new(MockImageClient::new()),
    );
    let mut game = HeadlessGame::with_clients(HeadlessConfig::new_game(), clients)
        .await
        .unwrap();
    game.wait_for_turn().await.unwrap();
    game.save(&path).await.unwrap();
    game.close().await.unwrap();

    let mut second = sample_game_state();
    second.health = 42;
    let clients = Clients::new(
        Arc::new(MockTextClient::new(vec![Ok(second)])),
        Arc::new(MockImageClient::new()),
    );
    let mut game = HeadlessGame::with_clients(HeadlessConfig::resume(&path), clients)
        .await
        .unwrap();

    // Resuming on a model turn shows it again without a request.
    game.wait_for_turn().await.unwrap();
    assert_eq!(game.health(), Some((100, 100)));

    game.choose(2).await.unwrap();
    assert_eq!(game.health(), Some((42, 100)));

    // Loading does not turn autosave on.
    let session = game.close().await.unwrap();
    assert_model_turns(&session, 2);
    let saved = Session::load(&path).await.unwrap();
    assert_model_turns(&saved, 1);
}

#[tokio::test]
async fn test_playing_a_template_leaves_it_untouched() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("pirates.dmt");
    WorldTemplate::default()
        .with_storyline("Pirates of the Ember Sea")
        .save(&path)
        .await
        .unwrap();
    let before = tokio::fs::read(&path).await.unwrap();

    let clients = Clients::new(
        Arc::new(MockTextClient::new(vec![Ok(sample_game_state())])),
        Arc::new(MockImageClient::new()),
    );
    let mut game = HeadlessGame::with_clients(HeadlessConfig::resume(&path), clients)
        .await
        .unwrap();
    game.wait_for_turn().await.unwrap();
    assert!(game.status().await.unwrap().autosave_path.is_none());
    game.close().await.unwrap();

    assert_eq!(tokio::fs::read(&path).await.unwrap(), before);
    let saved = persist::load_session(&path).await.unwrap();
    assert_eq!(saved.kind, SessionFileKind::Template);
    assert_eq!(saved.session.transcript.len(), 1);
}

#[tokio::test]
async fn test_manual_save_after_load_enables_autosave() {
    let temp_dir = TempDir::new().unwrap();
    let loaded = temp_dir.path().join("loaded.dms");
    let target = temp_dir.path().join("target.dms");

    let mut session = Session::new();
    session.transcript.push_model(sample_game_state());
    session.save(&loaded).await.unwrap();

    let clients = Clients::new(
        Arc::new(MockTextClient::new(vec![Ok(sample_game_state())])),
        Arc::new(MockImageClient::new()),
    );
    let mut game = HeadlessGame::with_clients(HeadlessConfig::resume(&loaded), clients)
        .await
        .unwrap();
    game.wait_for_turn().await.unwrap();
    game.save(&target).await.unwrap();
    game.choose(0).await.unwrap();
    game.close().await.unwrap();

    assert_model_turns(&Session::load(&target).await.unwrap(), 2);
    assert_model_turns(&Session::load(&loaded).await.unwrap(), 1);
}

#[tokio::test]
async fn test_template_starts_fresh_game() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("pirates.dmt");

    WorldTemplate::default()
        .with_storyline("Pirates of the Ember Sea")
        .save(&path)
        .await
        .unwrap();

    let listed = persist::list_saves(temp_dir.path()).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].kind, SessionFileKind::Template);

    let session = HeadlessConfig::resume(&path).session().await.unwrap();
    assert_eq!(session.transcript.len(), 1);
    assert_eq!(
        WorldTemplate::from_session(&session).unwrap().storyline,
        "Pirates of the Ember Sea"
    );
}
