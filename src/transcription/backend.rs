//! # Transcription Backend Contract
//!
//! Defines the types every speech-to-text backend speaks: the task mode,
//! per-request options, timed segments, and the result handed back to callers.
//!
//! ## Key Rust Concepts Used:
//! - **Trait objects**: `Arc<dyn Backend>` lets the cache hold any backend
//! - **Send + Sync**: backends are shared between request handlers on many threads
//! - **thiserror**: typed error enums with `Display` derived from attributes
//!
//! ## Blocking model:
//! Both [`Backend::transcribe`] and [`BackendLoader::load`] are synchronous and
//! long-running. Async callers must run them through `tokio::task::spawn_blocking`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// What the model should do with the audio.
///
/// ## Variants:
/// - `Transcribe`: write down the speech in its original language
/// - `Translate`: write down the speech translated into English
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Task {
    #[default]
    Transcribe,
    Translate,
}

impl Task {
    pub fn as_str(&self) -> &'static str {
        match self {
            Task::Transcribe => "transcribe",
            Task::Translate => "translate",
        }
    }
}

impl std::str::FromStr for Task {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "transcribe" => Ok(Task::Transcribe),
            "translate" => Ok(Task::Translate),
            other => Err(format!(
                "Unknown task '{}'. Use 'transcribe' or 'translate'",
                other
            )),
        }
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-request transcription options.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TranscribeOptions {
    /// Text hint fed to the decoder before the audio (names, vocabulary, style)
    pub initial_prompt: Option<String>,
    pub task: Task,
}

impl TranscribeOptions {
    pub fn new(initial_prompt: Option<String>, task: Task) -> Self {
        // An empty hint means "no hint"
        let initial_prompt = initial_prompt.filter(|p| !p.trim().is_empty());
        Self { initial_prompt, task }
    }
}

/// A timed span of transcribed text, offsets in seconds from the start of the audio.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

/// Full output of one transcription request.
///
/// ## Wire format:
/// This struct is serialized as-is in the `POST /transcribe/` response:
/// ```json
/// {"text": " Hello there.", "segments": [{"start": 0.0, "end": 1.5, "text": " Hello there."}]}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptionResult {
    pub text: String,
    #[serde(default)]
    pub segments: Vec<Segment>,
}

/// Errors a backend can raise while transcribing.
///
/// Kept separate so the HTTP layer can answer a corrupt upload differently
/// from a model failure.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// The audio could not be read or decoded into PCM samples
    #[error("could not decode audio: {0}")]
    Decode(String),

    /// The model failed while running inference
    #[error("inference failed: {0}")]
    Inference(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<candle_core::Error> for BackendError {
    fn from(err: candle_core::Error) -> Self {
        BackendError::Inference(err.to_string())
    }
}

/// A loaded speech model for one identifier.
pub trait Backend: Send + Sync {
    /// Identifier this backend was loaded for
    fn model_name(&self) -> &str;

    /// Transcribe the audio file at `audio_path`.
    ///
    /// Blocks the calling thread for the duration of inference.
    fn transcribe(
        &self,
        audio_path: &Path,
        options: &TranscribeOptions,
    ) -> Result<TranscriptionResult, BackendError>;
}

/// Builds a [`Backend`] for a model identifier.
///
/// The model cache calls this at most once per identifier until it succeeds.
pub trait BackendLoader: Send + Sync {
    fn load(&self, model: &str) -> anyhow::Result<Arc<dyn Backend>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_parsing() {
        assert_eq!("transcribe".parse::<Task>().unwrap(), Task::Transcribe);
        assert_eq!("Translate".parse::<Task>().unwrap(), Task::Translate);
        assert!("summarize".parse::<Task>().is_err());
        assert_eq!(Task::default(), Task::Transcribe);
    }

    #[test]
    fn test_empty_prompt_is_dropped() {
        let options = TranscribeOptions::new(Some("   ".to_string()), Task::Translate);
        assert_eq!(options.initial_prompt, None);
        assert_eq!(options.task, Task::Translate);

        let options = TranscribeOptions::new(Some("Peter, Sarah".to_string()), Task::Transcribe);
        assert_eq!(options.initial_prompt.as_deref(), Some("Peter, Sarah"));
    }

    #[test]
    fn test_result_deserializes_without_segments() {
        let result: TranscriptionResult = serde_json::from_str(r#"{"text": "hi"}"#).unwrap();
        assert_eq!(result.text, "hi");
        assert!(result.segments.is_empty());
    }
}
