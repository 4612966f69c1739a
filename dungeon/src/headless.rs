//! Line-oriented game loop.
//!
//! Protocol:
//! - A bare number picks that choice (1 based)
//! - Lines starting with `#` are commands (use, save, status, inventory, retry, quit)
//! - Any other line is sent as free text
//! - Output lines are tagged `[DM]`, `[CHOICES]`, `[ERROR]`, `[SAVED]` and so on

use dungeon_core::headless::{HeadlessConfig, HeadlessGame};
use dungeon_core::{AutosaveStatus, GameState, SessionError, SessionEvent, Settings};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use tracing::info;

/// Command line options.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct CliOptions {
    pub load: Option<PathBuf>,
    pub images: Option<PathBuf>,
    pub model: Option<String>,
    pub write_template: Option<PathBuf>,
}

impl CliOptions {
    pub fn into_config(self) -> HeadlessConfig {
        let mut config = match self.load {
            Some(path) => HeadlessConfig::resume(path),
            None => HeadlessConfig::new_game(),
        };
        if let Some(dir) = self.images {
            config = config.with_image_dir(dir);
        }
        config
    }
}

/// Parse options from `std::env::args()`.
pub fn parse_args(args: &[String]) -> Result<CliOptions, String> {
    let mut options = CliOptions::default();
    let mut iter = args.iter().skip(1);

    while let Some(arg) = iter.next() {
        let mut value = || {
            iter.next()
                .cloned()
                .ok_or_else(|| format!("{arg} needs a value"))
        };
        match arg.as_str() {
            "--load" => options.load = Some(value()?.into()),
            "--images" => options.images = Some(value()?.into()),
            "--model" => options.model = Some(value()?),
            "--write-template" => options.write_template = Some(value()?.into()),
            other => return Err(format!("unknown argument: {other}")),
        }
    }

    Ok(options)
}

/// A parsed input line.
#[derive(Debug, PartialEq, Eq)]
pub enum Input<'a> {
    Choice(usize),
    Text(&'a str),
    UseItem { item: &'a str, option: &'a str },
    Save(&'a str),
    Status,
    Inventory,
    Retry,
    Help,
    Quit,
    Unknown,
}

pub fn parse_input(line: &str) -> Input<'_> {
    let line = line.trim();
    let Some(command) = line.strip_prefix('#') else {
        return match line.parse::<usize>() {
            Ok(n) if n >= 1 => Input::Choice(n - 1),
            _ => Input::Text(line),
        };
    };

    let (name, rest) = command
        .split_once(char::is_whitespace)
        .map(|(name, rest)| (name, rest.trim()))
        .unwrap_or((command, ""));

    match name {
        "quit" | "exit" => Input::Quit,
        "help" => Input::Help,
        "status" => Input::Status,
        "inventory" | "inv" => Input::Inventory,
        "retry" => Input::Retry,
        "save" if !rest.is_empty() => Input::Save(rest),
        "use" => match rest.split_once('|') {
            Some((item, option)) if !item.trim().is_empty() && !option.trim().is_empty() => {
                Input::UseItem {
                    item: item.trim(),
                    option: option.trim(),
                }
            }
            _ => Input::Unknown,
        },
        _ => Input::Unknown,
    }
}

/// Run the game over stdin and stdout.
pub async fn run_headless(config: HeadlessConfig, settings: &Settings) -> Result<(), SessionError> {
    let mut game = HeadlessGame::new(config, settings).await?;

    println!("=== Dungeon Master ===");
    print_help();
    println!();

    print!("[LOADING]");
    io::stdout().flush().ok();
    let opening = game.wait_for_turn().await.cloned();
    clear_indicator();
    match opening {
        Ok(state) => print_state(&state),
        Err(e) => println!("[ERROR] {e}"),
    }
    print_notices(&mut game);

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = match line {
            Ok(l) => l,
            Err(e) => {
                eprintln!("Error reading input: {e}");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        game.poll_events();
        print_notices(&mut game);

        let outcome = match parse_input(&line) {
            Input::Quit => {
                println!("Goodbye!");
                break;
            }
            Input::Help => {
                print_help();
                continue;
            }
            Input::Unknown => {
                println!("[ERROR] Unknown command. Type #help for help.");
                continue;
            }
            Input::Status => {
                print_status(&game).await;
                continue;
            }
            Input::Inventory => {
                print_inventory(game.game_state());
                continue;
            }
            Input::Save(path) => {
                match game.save(path).await {
                    Ok(()) => println!("[SAVED] Game saved to {path}, autosave on"),
                    Err(e) => println!("[ERROR] Save failed: {e}"),
                }
                continue;
            }
            Input::Choice(index) => {
                print!("[PROCESSING]");
                io::stdout().flush().ok();
                game.choose(index).await.cloned()
            }
            Input::UseItem { item, option } => {
                print!("[PROCESSING]");
                io::stdout().flush().ok();
                game.use_item(item, option).await.cloned()
            }
            Input::Retry => {
                print!("[PROCESSING]");
                io::stdout().flush().ok();
                game.retry().await.cloned()
            }
            Input::Text(text) => {
                print!("[PROCESSING]");
                io::stdout().flush().ok();
                game.send(text).await.cloned()
            }
        };

        clear_indicator();
        print_notices(&mut game);
        match outcome {
            Ok(state) => print_state(&state),
            Err(SessionError::Stalled(reason)) => {
                println!("[STALLED] {reason}");
                println!("Type #retry to try again.");
            }
            Err(e) => println!("[ERROR] {e}"),
        }
    }

    let session = game.close().await?;
    info!(session = %session.id, turns = session.transcript.len(), "session ended");
    Ok(())
}

fn clear_indicator() {
    print!("\r            \r");
    io::stdout().flush().ok();
}

fn print_help() {
    println!("[HELP]");
    println!("  <number>               - Pick that choice");
    println!("  #use <item> | <option> - Use an inventory item");
    println!("  #save <path>           - Save the game and autosave there");
    println!("  #status                - Show session status");
    println!("  #inventory             - Show inventory");
    println!("  #retry                 - Retry after the narrator stalls");
    println!("  #quit                  - Exit the game");
    println!("  (anything else is sent as free text)");
}

fn print_state(state: &GameState) {
    println!("[DM]");
    for para in state.chapter_markdown().split("\n\n") {
        println!("{para}");
    }
    println!();
    println!(
        "[HP] {}/{}  [QUEST] {} ({}%)",
        state.health,
        state.max_health,
        state.current_quest.title,
        state.current_quest.completed_percentage
    );
    let stats: Vec<String> = state
        .stats
        .iter()
        .map(|(name, value)| format!("{name} {value}"))
        .collect();
    println!("[STATS] {}", stats.join(", "));
    println!("[CHOICES]");
    for (i, choice) in state.choices.iter().enumerate() {
        println!("  {}. {}", i + 1, choice.text);
    }
}

fn print_inventory(state: Option<&GameState>) {
    let Some(state) = state else {
        println!("[ERROR] The story has not started yet");
        return;
    };
    println!("[INVENTORY]");
    if state.inventory.is_empty() {
        println!("  (empty)");
    }
    for item in &state.inventory {
        println!("  {} [{}]", item.name, item.options.join(", "));
    }
}

async fn print_status(game: &HeadlessGame) {
    match game.status().await {
        Ok(status) => {
            println!("[STATUS]");
            println!("  Session: {}", status.id);
            println!("  Phase: {:?}", status.phase);
            println!("  Turns: {}", status.turns);
            match &status.autosave_path {
                Some(path) => println!("  Autosave: {}", path.display()),
                None => println!("  Autosave: off"),
            }
            if let Some((_, state)) = &status.latest {
                println!("  Quest: {}", state.current_quest.title);
                println!("  {}", state.current_quest.description);
            }
        }
        Err(e) => println!("[ERROR] {e}"),
    }
}

fn print_notices(game: &mut HeadlessGame) {
    for event in game.take_notices() {
        match event {
            SessionEvent::GenerationFailed {
                reason,
                attempt,
                will_retry,
            } => {
                let next = if will_retry { "repairing" } else { "giving up" };
                println!("[REPAIR] attempt {attempt}: {reason} ({next})");
            }
            SessionEvent::AutosaveStatusChanged(AutosaveStatus::Failed(e)) => {
                println!("[AUTOSAVE] failed: {e}");
            }
            SessionEvent::ImageReady(illustration) => {
                println!("[IMAGE] illustration ready for turn {}", illustration.turn);
            }
            _ => {}
        }
    }
}
