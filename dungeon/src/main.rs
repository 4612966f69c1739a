//! Dungeon Master terminal front end.
//!
//! Plays a session over stdin/stdout using a line-oriented protocol:
//!
//! ```bash
//! cargo run -p dungeon -- --load saves/run.dms --images ./art
//! ```

mod headless;

use dungeon_core::settings::{GEMINI_API_KEY_VAR, TOGETHER_API_KEY_VAR};
use dungeon_core::{Settings, WorldTemplate};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Logs go to stderr so stdout stays protocol-only
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("dungeon=info,dungeon_core=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_help();
        return Ok(());
    }

    let options = headless::parse_args(&args)?;

    if let Some(path) = &options.write_template {
        WorldTemplate::default().save(path).await?;
        println!("Template written to {}", path.display());
        return Ok(());
    }

    let mut settings = Settings::discover().await?;
    if let Some(model) = &options.model {
        settings = settings.with_model(model.clone());
    }
    if let Err(e) = settings.require() {
        eprintln!("Error: {e}");
        eprintln!(
            "Set {GEMINI_API_KEY_VAR} and {TOGETHER_API_KEY_VAR} in a .env file, the environment, or {}",
            Settings::default_path().display()
        );
        std::process::exit(1);
    }

    headless::run_headless(options.into_config(), &settings)
        .await
        .map_err(|e| e.into())
}

fn print_help() {
    println!("Dungeon Master - an AI narrated text adventure");
    println!();
    println!("USAGE:");
    println!("    dungeon [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    -h, --help                  Print this help message");
    println!("    --load <file>               Resume a .dms session or start from a .dmt template");
    println!("    --images <dir>              Write each illustration to <dir> as PNG");
    println!("    --model <name>              Gemini model to narrate with");
    println!("    --write-template <file>     Write the default world template and exit");
    println!();
    println!("ENVIRONMENT:");
    println!("    {GEMINI_API_KEY_VAR}       Key for the narrator");
    println!("    {TOGETHER_API_KEY_VAR}     Key for illustrations");
    println!("    RUST_LOG                    Log filter, logs go to stderr");
    println!();
    println!("In game, type #help for commands.");
}
