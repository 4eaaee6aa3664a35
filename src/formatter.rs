//! # Transcript Formatter
//!
//! Turns a raw Whisper transcript into a readable dialogue script by asking a
//! local LLM (Ollama) to add speaker labels, punctuation and line breaks
//! without changing the wording.
//!
//! ## Key Rust Concepts Used:
//! - **async_trait**: async methods on a trait object (`Arc<dyn ChatBackend>`)
//! - **thiserror**: typed errors whose `Display` is the user-facing message
//! - **Duration arithmetic**: backoff delays computed with saturating math
//!
//! ## Retry Behavior:
//! Each attempt is independent. A transport failure, a non-2xx status or an
//! empty reply all count as a failed attempt. After `max_attempts` failures the
//! formatter gives up with [`FormatError::Exhausted`], whose message is the
//! fixed text in [`EXHAUSTED_MESSAGE`].

use crate::config::FormatterConfig;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// What callers see when every attempt failed.
pub const EXHAUSTED_MESSAGE: &str = "Error: Unable to format transcript after multiple attempts.";

/// Wait between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Retry immediately
    None,
    /// Same delay before every retry
    Fixed(Duration),
    /// Double the delay after each failure, capped at `max`
    Exponential { initial: Duration, max: Duration },
}

/// How many times to try, and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff::None,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            max_attempts,
            backoff,
        }
    }

    /// Build a policy from flat configuration values.
    ///
    /// ## Errors:
    /// - zero attempts
    /// - a backoff name other than `none`, `fixed` or `exponential`
    /// - an exponential cap below its initial delay
    pub fn from_settings(
        max_attempts: u32,
        backoff: &str,
        initial_ms: u64,
        max_ms: u64,
    ) -> Result<Self> {
        if max_attempts == 0 {
            return Err(anyhow!("max_attempts must be at least 1"));
        }

        let initial = Duration::from_millis(initial_ms);
        let max = Duration::from_millis(max_ms);
        let backoff = match backoff.trim().to_lowercase().as_str() {
            "none" | "" => Backoff::None,
            "fixed" => Backoff::Fixed(initial),
            "exponential" => {
                if max < initial {
                    return Err(anyhow!(
                        "backoff_max_ms ({}) is below backoff_initial_ms ({})",
                        max_ms,
                        initial_ms
                    ));
                }
                Backoff::Exponential { initial, max }
            }
            other => {
                return Err(anyhow!(
                    "Unknown backoff '{}'. Use 'none', 'fixed', or 'exponential'",
                    other
                ))
            }
        };

        Ok(Self::new(max_attempts, backoff))
    }

    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::None => Duration::ZERO,
            Backoff::Fixed(delay) => delay,
            Backoff::Exponential { initial, max } => {
                let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
                initial.saturating_mul(factor).min(max)
            }
        }
    }
}

/// A failed chat call.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("server returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("model returned an empty response")]
    EmptyResponse,
}

/// Anything that can answer a single-turn chat prompt.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn chat(&self, prompt: &str) -> Result<String, ChatError>;
}

/// Sampling options sent with every Ollama request.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct OllamaOptions {
    pub temperature: f32,
    pub top_p: f32,
    pub num_ctx: u32,
    pub repeat_penalty: f32,
    pub stop: Vec<String>,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
    options: &'a OllamaOptions,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: String,
}

/// Ollama's `/api/chat` endpoint, non-streaming.
pub struct OllamaChat {
    client: reqwest::Client,
    url: String,
    model: String,
    options: OllamaOptions,
}

impl OllamaChat {
    pub fn new(config: &FormatterConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            url: format!("{}/api/chat", config.base_url.trim_end_matches('/')),
            model: config.model.clone(),
            options: OllamaOptions {
                temperature: config.temperature,
                top_p: config.top_p,
                num_ctx: config.num_ctx,
                repeat_penalty: config.repeat_penalty,
                stop: vec!["</s>".to_string()],
            },
        })
    }
}

#[async_trait]
impl ChatBackend for OllamaChat {
    async fn chat(&self, prompt: &str) -> Result<String, ChatError> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            stream: false,
            options: &self.options,
        };

        let response = self.client.post(&self.url).json(&request).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChatError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let reply: ChatResponse = response.json().await?;
        Ok(reply.message.content)
    }
}

/// Formatting gave up.
#[derive(Debug, thiserror::Error)]
pub enum FormatError {
    #[error("Error: Unable to format transcript after multiple attempts.")]
    Exhausted { attempts: u32, last_error: String },
}

/// Build the instruction sent to the LLM for `raw_text`.
pub fn build_prompt(raw_text: &str) -> String {
    format!(
        "You are an assistant that formats raw audio transcripts into clean, readable dialogue scripts.
Your task is to improve readability by:
- Clearly labelling each speaker (e.g., Peter, Sarah, Narrator)
- Applying correct punctuation and line breaks
- Italicising all narration or non-verbal elements (e.g., [laughter], Narrator: You now have 30 seconds...)

Important guidelines:
- Do not paraphrase, rewrite, or shorten the text
- Do not summarise or turn the content into test questions
- Preserve the exact original wording
- Only enhance formatting and clarity

The result should look like a dialogue or script, similar to a screenplay or play format.

Transcript:
{}
",
        raw_text
    )
}

/// Where `format` writes when no output path is given: `notes.txt` → `notes_formatted.txt`.
pub fn formatted_output_path(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match input.extension() {
        Some(ext) => format!("{}_formatted.{}", stem, ext.to_string_lossy()),
        None => format!("{}_formatted", stem),
    };
    input.with_file_name(name)
}

/// Reformats transcripts through a [`ChatBackend`] under a [`RetryPolicy`].
pub struct TranscriptFormatter {
    backend: Arc<dyn ChatBackend>,
    policy: RetryPolicy,
}

impl TranscriptFormatter {
    pub fn new(backend: Arc<dyn ChatBackend>, policy: RetryPolicy) -> Self {
        Self { backend, policy }
    }

    /// Ollama-backed formatter from configuration.
    pub fn from_config(config: &FormatterConfig) -> Result<Self> {
        let policy = config.retry_policy()?;
        let backend = Arc::new(OllamaChat::new(config)?);
        Ok(Self::new(backend, policy))
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Format `raw_text`, retrying per the policy. The result is trimmed.
    pub async fn format(&self, raw_text: &str) -> Result<String, FormatError> {
        let prompt = build_prompt(raw_text);
        let mut last_error = String::new();

        for attempt in 1..=self.policy.max_attempts {
            debug!(attempt, max_attempts = self.policy.max_attempts, "Requesting transcript formatting");
            match self.backend.chat(&prompt).await {
                Ok(reply) if !reply.trim().is_empty() => {
                    info!(attempt, chars = reply.len(), "Transcript formatted");
                    return Ok(reply.trim().to_string());
                }
                Ok(_) => last_error = ChatError::EmptyResponse.to_string(),
                Err(e) => last_error = e.to_string(),
            }

            warn!(attempt, error = %last_error, "Formatting attempt failed");
            if attempt < self.policy.max_attempts {
                let delay = self.policy.delay_after(attempt);
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }
        }

        Err(FormatError::Exhausted {
            attempts: self.policy.max_attempts,
            last_error,
        })
    }

    /// Like [`format`](Self::format), but collapses failure into its message text.
    pub async fn format_or_message(&self, raw_text: &str) -> String {
        match self.format(raw_text).await {
            Ok(text) => text,
            Err(e) => e.to_string(),
        }
    }
}
