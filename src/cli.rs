//! # Command-Line Front End
//!
//! Argument definitions and the `transcribe` / `format` commands. `serve` goes
//! straight to [`crate::server::run`].
//!
//! ## Output files (for `transcribe clip.mp3`):
//! - `clip.txt`: plain transcript, always written
//! - `clip.srt`: subtitles, with `--srt`
//! - `clip_formatted.txt`: LLM-formatted dialogue, with `--format`

use crate::client;
use crate::config::AppConfig;
use crate::export;
use crate::formatter::{formatted_output_path, TranscriptFormatter};
use crate::transcription::{Task, TranscribeOptions};
use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "whisper-scribe", version, about = "Whisper transcription service and CLI")]
pub struct Cli {
    /// Configuration file (TOML, extension optional)
    #[arg(long, global = true, default_value = "config")]
    pub config: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the HTTP transcription service
    Serve(ServeArgs),
    /// Transcribe an audio file locally or through a remote service
    Transcribe(TranscribeArgs),
    /// Reformat a transcript into a dialogue script with a local LLM
    Format(FormatArgs),
}

#[derive(Debug, Args)]
pub struct ServeArgs {
    #[arg(long)]
    pub host: Option<String>,
    #[arg(long)]
    pub port: Option<u16>,
    /// Models to load at startup (comma separated)
    #[arg(long, value_delimiter = ',')]
    pub preload: Vec<String>,
}

#[derive(Debug, Args)]
pub struct TranscribeArgs {
    /// Audio file (anything ffmpeg can read)
    pub audio: PathBuf,

    /// Initial prompt: names, vocabulary or style to prime the model with
    #[arg(short, long)]
    pub prompt: Option<String>,

    /// "transcribe" or "translate" (to English)
    #[arg(long, default_value = "transcribe")]
    pub task: Task,

    /// Model identifier (tiny, base, small, medium, large, turbo, or a HF repo)
    #[arg(short, long)]
    pub model: Option<String>,

    /// Send the audio to a running server
    #[arg(long, conflicts_with = "local")]
    pub remote: bool,

    /// Run the model in this process
    #[arg(long)]
    pub local: bool,

    /// Remote server host
    #[arg(long)]
    pub host: Option<String>,

    /// Remote server port
    #[arg(long)]
    pub port: Option<u16>,

    /// Where to write output files (defaults to the audio's directory)
    #[arg(short = 'd', long)]
    pub output_dir: Option<PathBuf>,

    /// Also write SRT subtitles
    #[arg(long)]
    pub srt: bool,

    /// Also write an LLM-formatted transcript
    #[arg(long)]
    pub format: bool,
}

#[derive(Debug, Args)]
pub struct FormatArgs {
    /// Transcript text file
    pub input: PathBuf,

    /// Output path (defaults to `<input>_formatted.<ext>`)
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

impl ServeArgs {
    pub fn apply(&self, config: &mut AppConfig) {
        if let Some(host) = &self.host {
            config.server.host = host.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if !self.preload.is_empty() {
            config.models.preload = self.preload.clone();
        }
    }
}

impl TranscribeArgs {
    /// Fold command-line overrides into the client configuration.
    pub fn apply(&self, config: &mut AppConfig) {
        if self.remote {
            config.client.remote = true;
        }
        if self.local {
            config.client.remote = false;
        }
        if let Some(host) = &self.host {
            config.client.host = host.clone();
        }
        if let Some(port) = self.port {
            config.client.port = port;
        }
        if let Some(model) = &self.model {
            config.client.model_name = model.clone();
        }
    }

    /// Output path for `ext`, next to the audio or under `--output-dir`.
    pub fn output_path(&self, ext: &str) -> PathBuf {
        output_path(&self.audio, self.output_dir.as_deref(), ext)
    }
}

fn output_path(audio: &Path, output_dir: Option<&Path>, ext: &str) -> PathBuf {
    let stem = audio
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "transcript".to_string());
    let dir = output_dir
        .map(Path::to_path_buf)
        .or_else(|| audio.parent().map(Path::to_path_buf))
        .unwrap_or_default();
    dir.join(format!("{}.{}", stem, ext))
}

/// `whisper-scribe transcribe`
pub async fn transcribe(mut config: AppConfig, args: TranscribeArgs) -> Result<()> {
    args.apply(&mut config);
    config.validate()?;

    if !args.audio.is_file() {
        bail!("Audio file not found: {}", args.audio.display());
    }
    if let Some(dir) = &args.output_dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("cannot create output directory {}", dir.display()))?;
    }

    let transcriber = client::from_config(&config)?;
    let options = TranscribeOptions::new(args.prompt.clone(), args.task);
    let text_path = args.output_path("txt");

    let result = transcriber
        .process_audio(&args.audio, &options, Some(&text_path))
        .await?;
    println!("{}", result.text.trim());
    eprintln!("Transcript saved to {}", text_path.display());

    if args.srt {
        let srt_path = args.output_path("srt");
        export::write_srt(&srt_path, &result.segments)
            .with_context(|| format!("cannot write {}", srt_path.display()))?;
        eprintln!("Subtitles saved to {}", srt_path.display());
    }

    if args.format {
        let formatted_path = formatted_output_path(&text_path);
        format_text(&config, &result.text, &formatted_path).await?;
    }

    Ok(())
}

/// `whisper-scribe format`
pub async fn format(config: AppConfig, args: FormatArgs) -> Result<()> {
    config.validate()?;
    let raw = std::fs::read_to_string(&args.input)
        .with_context(|| format!("cannot read {}", args.input.display()))?;
    let output = args
        .output
        .unwrap_or_else(|| formatted_output_path(&args.input));

    format_text(&config, &raw, &output).await
}

async fn format_text(config: &AppConfig, raw: &str, output: &Path) -> Result<()> {
    let formatter = TranscriptFormatter::from_config(&config.formatter)?;
    info!(model = %config.formatter.model, attempts = formatter.policy().max_attempts, "Formatting transcript");

    let formatted = formatter.format(raw).await?;
    export::write_text(output, &formatted)
        .with_context(|| format!("cannot write {}", output.display()))?;
    eprintln!("Formatted transcript saved to {}", output.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transcribe_args() {
        let cli = Cli::try_parse_from([
            "whisper-scribe",
            "transcribe",
            "talks/keynote.mp3",
            "--task",
            "translate",
            "-m",
            "small",
            "--remote",
            "--port",
            "8000",
            "--srt",
        ])
        .unwrap();

        let Command::Transcribe(args) = cli.command else {
            panic!("expected transcribe");
        };
        assert_eq!(args.task, Task::Translate);
        assert!(args.srt);

        let mut config = AppConfig::default();
        args.apply(&mut config);
        assert!(config.client.remote);
        assert_eq!(config.client.port, 8000);
        assert_eq!(config.client.model_name, "small");
        assert_eq!(args.output_path("txt"), PathBuf::from("talks/keynote.txt"));
    }

    #[test]
    fn test_remote_and_local_conflict() {
        assert!(Cli::try_parse_from(["whisper-scribe", "transcribe", "a.mp3", "--remote", "--local"]).is_err());
        assert!(Cli::try_parse_from(["whisper-scribe", "transcribe", "a.mp3", "--task", "dance"]).is_err());
    }

    #[test]
    fn test_output_paths() {
        assert_eq!(
            output_path(Path::new("/data/clip.wav"), Some(Path::new("/out")), "srt"),
            PathBuf::from("/out/clip.srt")
        );
        assert_eq!(output_path(Path::new("clip.wav"), None, "txt"), PathBuf::from("clip.txt"));
    }

    #[test]
    fn test_serve_args() {
        let cli = Cli::try_parse_from([
            "whisper-scribe",
            "serve",
            "--port",
            "9000",
            "--preload",
            "base,turbo",
        ])
        .unwrap();
        let Command::Serve(args) = cli.command else {
            panic!("expected serve");
        };

        let mut config = AppConfig::default();
        args.apply(&mut config);
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.models.preload, vec!["base".to_string(), "turbo".to_string()]);
    }

    #[tokio::test]
    async fn test_missing_audio_is_reported() {
        let args = TranscribeArgs {
            audio: PathBuf::from("/nope/missing.mp3"),
            prompt: None,
            task: Task::Transcribe,
            model: None,
            remote: false,
            local: false,
            host: None,
            port: None,
            output_dir: None,
            srt: false,
            format: false,
        };
        let err = transcribe(AppConfig::default(), args).await.unwrap_err();
        assert!(err.to_string().contains("Audio file not found"));
    }
}
