//! Integration tests that call the real Gemini and together.ai APIs.
//!
//! These tests require GEMINI_API_KEY and TOGETHER_API_KEY to be set (via .env
//! file or environment).
//! Run with: `cargo test -p dungeon-core --test api_integration -- --ignored`
//!
//! These are marked #[ignore] by default to avoid:
//! - API costs in CI
//! - Test failures when no API key is available

use dungeon_core::client::{fetch_illustration, GeminiTextClient, TogetherImageClient};
use dungeon_core::transcript::BOOTSTRAP_MESSAGE;
use dungeon_core::{GenerationConfig, HeadlessConfig, HeadlessGame, Settings, StructuredClient, Turn};

/// Load environment variables from .env file
fn setup() -> Option<Settings> {
    let _ = dotenvy::dotenv();
    let settings = Settings::from_env();
    match settings.require() {
        Ok(()) => Some(settings),
        Err(e) => {
            eprintln!("Skipping test: {e}");
            None
        }
    }
}

#[tokio::test]
#[ignore] // Run with: cargo test -p dungeon-core --test api_integration -- --ignored
async fn test_opening_scene_is_valid() {
    let Some(settings) = setup() else {
        return;
    };

    let client = GeminiTextClient::new(&settings.gemini_api_key, settings.model())
        .expect("Failed to create client");
    let state = client
        .generate(&[Turn::user(BOOTSTRAP_MESSAGE)], &GenerationConfig::default())
        .await
        .expect("Generation failed");

    println!("{}", state.chapter_markdown());
    let state = state.normalize();
    assert!(state.validate().is_ok(), "opening scene had no choices");
}

#[tokio::test]
#[ignore]
async fn test_illustration_decodes() {
    let Some(settings) = setup() else {
        return;
    };

    let client =
        TogetherImageClient::new(&settings.together_api_key).expect("Failed to create client");
    let image = fetch_illustration(&client, "A lighthouse on a cliff at dawn, oil painting")
        .await
        .expect("No illustration");
    assert!(image.width() > 0);
}

#[tokio::test]
#[ignore]
async fn test_headless_two_turns() {
    let Some(settings) = setup() else {
        return;
    };

    let mut game = HeadlessGame::new(HeadlessConfig::new_game(), &settings)
        .await
        .expect("Failed to create game");

    let opening = game.wait_for_turn().await.expect("No opening scene");
    println!("{}", opening.chapter_markdown());

    let next = game.choose(0).await.expect("No second scene");
    println!("{}", next.chapter_markdown());
    assert!(!next.choices.is_empty());

    let session = game.close().await.expect("Close failed");
    assert_eq!(session.transcript.model_turn_count(), 2);
}
