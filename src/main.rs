//! # Whisper Scribe - Application Entry Point
//!
//! ## Commands:
//! - `serve`: run the HTTP transcription service
//! - `transcribe <audio>`: transcribe a file in-process or through a running server
//! - `format <transcript>`: reformat a transcript into a dialogue with a local LLM
//!
//! ## Key Rust Concepts Used:
//! - **clap derive**: the command line is declared as plain structs and enums
//! - **async/await**: every command runs on the Actix (Tokio) runtime
//! - **Result<T, E>**: any failure bubbles up to `main` and exits non-zero

use anyhow::Result;
use clap::Parser;
use tracing::info;
use whisper_scribe::cli::{self, Cli, Command};
use whisper_scribe::config::AppConfig;
use whisper_scribe::{init_tracing, server};

/// The main application entry point.
///
/// ## What this function does:
/// 1. **Parses the command line**
/// 2. **Loads configuration** from files and environment variables
/// 3. **Sets up logging**
/// 4. **Dispatches** to the chosen command
#[actix_web::main]
async fn main() -> Result<()> {
    // .ok() because a missing .env file is fine
    dotenv::dotenv().ok();

    let cli = Cli::parse();
    init_tracing()?;

    let config = AppConfig::load_from(&cli.config)?;

    match cli.command {
        Command::Serve(args) => {
            let mut config = config;
            args.apply(&mut config);
            config.validate()?;

            info!("Starting whisper-scribe v{}", env!("CARGO_PKG_VERSION"));
            info!(
                "Configuration loaded: {}:{} (default model {}, device {:?})",
                config.server.host,
                config.server.port,
                config.models.default_model,
                config.models.device
            );
            server::run(config).await
        }
        Command::Transcribe(args) => cli::transcribe(config, args).await,
        Command::Format(args) => cli::format(config, args).await,
    }
}
