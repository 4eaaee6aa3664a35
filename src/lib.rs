//! # Whisper Scribe
//!
//! Speech-to-text with OpenAI Whisper models running on Candle, served over
//! HTTP or used directly from the command line.
//!
//! ## Application Architecture:
//! - **config**: layered configuration (TOML file + `APP_*` environment variables)
//! - **transcription**: the Whisper backend and the per-model load cache
//! - **audio**: decoding uploads to 16 kHz mono PCM and computing mel spectrograms
//! - **handlers / health / server**: the Actix-web service
//! - **client**: one transcription interface with local and remote variants
//! - **formatter**: LLM reformatting of transcripts through Ollama
//! - **export**: plain-text and SRT output files

pub mod audio;
pub mod cli;
pub mod client;
pub mod config;
pub mod device;
pub mod error;
pub mod export;
pub mod formatter;
pub mod handlers;
pub mod health;
pub mod middleware;
pub mod server;
pub mod state;
pub mod transcription;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize structured logging.
///
/// ## Environment Variables:
/// - `RUST_LOG`: log filter, defaults to `"whisper_scribe=debug,actix_web=info"`
///
/// Logs go to stderr so transcripts printed by the CLI stay clean on stdout.
pub fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "whisper_scribe=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()?;

    Ok(())
}
