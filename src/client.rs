//! # Transcription Client
//!
//! One contract for "turn this audio file into text", whether the model runs
//! in this process or behind the HTTP service on another machine.
//!
//! ## Variants:
//! - **LocalTranscriber**: owns a [`ModelCache`] and runs Whisper in-process
//! - **RemoteTranscriber**: uploads the file to `POST /transcribe/` as multipart form data
//!
//! ## Key Rust Concepts Used:
//! - **async_trait**: async methods callable through `Arc<dyn AudioTranscriber>`
//! - **Default trait methods**: `process_audio` is written once on top of `transcribe`
//! - **spawn_blocking**: inference is CPU/GPU-bound and must not stall the async runtime
//!
//! Which variant the CLI uses is decided by configuration (`client.remote`,
//! or `USE_REMOTE_TRANSCRIBER`), see [`from_config`].

use crate::config::AppConfig;
use crate::transcription::{
    BackendError, ModelCache, ResolveError, TranscribeOptions, TranscriptionResult, WhisperLoader,
};
use anyhow::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Why a transcription request did not produce a result.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("request to transcription service failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("transcription service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid response from transcription service: {0}")]
    Decode(String),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),
}

/// Something that can transcribe an audio file on disk.
#[async_trait]
pub trait AudioTranscriber: Send + Sync {
    /// Human-readable description for logs ("local model 'turbo'", a URL, ...)
    fn describe(&self) -> String;

    async fn transcribe(
        &self,
        audio_path: &Path,
        options: &TranscribeOptions,
    ) -> Result<TranscriptionResult, ClientError>;

    /// Transcribe, then write the plain text to `output_text_path` when given.
    async fn process_audio(
        &self,
        audio_path: &Path,
        options: &TranscribeOptions,
        output_text_path: Option<&Path>,
    ) -> Result<TranscriptionResult, ClientError> {
        info!(
            audio = %audio_path.display(),
            transcriber = %self.describe(),
            task = %options.task,
            "Transcribing audio"
        );
        let result = self.transcribe(audio_path, options).await?;

        if let Some(path) = output_text_path {
            tokio::fs::write(path, &result.text).await?;
            info!(output = %path.display(), "Transcript saved");
        }

        Ok(result)
    }
}

/// Runs Whisper in this process.
pub struct LocalTranscriber {
    models: Arc<ModelCache>,
    model_name: String,
}

impl LocalTranscriber {
    pub fn new(models: Arc<ModelCache>, model_name: impl Into<String>) -> Self {
        Self {
            models,
            model_name: model_name.into(),
        }
    }
}

#[async_trait]
impl AudioTranscriber for LocalTranscriber {
    fn describe(&self) -> String {
        format!("local model '{}'", self.model_name)
    }

    async fn transcribe(
        &self,
        audio_path: &Path,
        options: &TranscribeOptions,
    ) -> Result<TranscriptionResult, ClientError> {
        let backend = self.models.resolve(&self.model_name).await?;
        let path = audio_path.to_path_buf();
        let options = options.clone();

        let result = tokio::task::spawn_blocking(move || backend.transcribe(&path, &options))
            .await
            .map_err(|e| BackendError::Inference(format!("transcription task failed: {}", e)))??;
        Ok(result)
    }
}

/// Sends audio to a running `whisper-scribe serve` instance.
pub struct RemoteTranscriber {
    client: reqwest::Client,
    endpoint: String,
    model_name: String,
}

impl RemoteTranscriber {
    /// `endpoint` is the full URL, e.g. `http://gpu-box:9911/transcribe/`.
    pub fn new(endpoint: impl Into<String>, model_name: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            model_name: model_name.into(),
        })
    }
}

#[async_trait]
impl AudioTranscriber for RemoteTranscriber {
    fn describe(&self) -> String {
        format!("{} (model '{}')", self.endpoint, self.model_name)
    }

    async fn transcribe(
        &self,
        audio_path: &Path,
        options: &TranscribeOptions,
    ) -> Result<TranscriptionResult, ClientError> {
        let bytes = tokio::fs::read(audio_path).await?;
        let file_name = audio_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("audio")
            .to_string();
        debug!(file = %file_name, bytes = bytes.len(), endpoint = %self.endpoint, "Uploading audio");

        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(file_name)
            .mime_str(mime_for(audio_path))?;

        let mut form = reqwest::multipart::Form::new()
            .part("audio", part)
            .text("task", options.task.as_str())
            .text("model_name", self.model_name.clone());
        if let Some(prompt) = &options.initial_prompt {
            form = form.text("initial_prompt", prompt.clone());
        }

        let response = self.client.post(&self.endpoint).multipart(form).send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(ClientError::Status {
                status: status.as_u16(),
                body,
            });
        }

        serde_json::from_str(&body).map_err(|e| ClientError::Decode(e.to_string()))
    }
}

/// Content type sent with the upload, guessed from the extension.
fn mime_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "m4a" | "mp4" => "audio/mp4",
        "ogg" | "oga" | "opus" => "audio/ogg",
        "flac" => "audio/flac",
        "webm" => "audio/webm",
        _ => "application/octet-stream",
    }
}

/// Pick the transcriber the configuration asks for.
pub fn from_config(config: &AppConfig) -> Result<Arc<dyn AudioTranscriber>> {
    let client = &config.client;
    if client.remote {
        let remote = RemoteTranscriber::new(
            client.endpoint(),
            client.model_name.clone(),
            Duration::from_secs(client.timeout_secs),
        )?;
        return Ok(Arc::new(remote));
    }

    let loader = WhisperLoader {
        device: config.models.device,
        cache_dir: config.models.cache_dir.as_ref().map(PathBuf::from),
        language: config.models.language.clone(),
    };
    let models = Arc::new(ModelCache::new(Arc::new(loader)));
    Ok(Arc::new(LocalTranscriber::new(models, client.model_name.clone())))
}
