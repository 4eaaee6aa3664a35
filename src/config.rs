//! # Configuration Management
//!
//! This module handles loading and managing application configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! ## Key Rust Concepts Used:
//! - **Serde**: Serialization/deserialization library for converting between Rust structs and data formats
//! - **derive macros**: Automatically generate code for common traits (Debug, Clone, Serialize, Deserialize)
//! - **Option<T>**: Settings that may be left unset (language, cache directory)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Deployment variables (HOST, PORT, USE_REMOTE_TRANSCRIBER)
//! 2. Environment variables (APP_SERVER__PORT, APP_CLIENT__REMOTE, etc.)
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impl)

use crate::device::DevicePreference;
use crate::formatter::RetryPolicy;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;

/// Main application configuration that contains all settings.
///
/// ## Sections:
/// - **server**: where the HTTP service listens
/// - **models**: which Whisper models to load and where to run them
/// - **upload**: limits on incoming audio
/// - **client**: how the CLI reaches a transcriber (local or remote)
/// - **formatter**: the Ollama chat backend used to reformat transcripts
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub models: ModelsConfig,
    pub upload: UploadConfig,
    pub client: ClientConfig,
    pub formatter: FormatterConfig,
}

/// Server-specific configuration settings.
///
/// ## Common values:
/// - `host = "127.0.0.1"`: Only accept connections from localhost (development)
/// - `host = "0.0.0.0"`: Accept connections from any IP address (production)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Whisper model settings.
///
/// ## Fields:
/// - `default_model`: used when a request names no model ("tiny" .. "large", "turbo")
/// - `preload`: models loaded at startup so the first request doesn't pay for it
/// - `device`: "auto", "cpu", "cuda" or "metal"
/// - `language`: force a language code (e.g. "en") instead of detecting it
/// - `cache_dir`: where downloaded weights live (defaults to the HuggingFace cache)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelsConfig {
    pub default_model: String,
    pub preload: Vec<String>,
    pub device: DevicePreference,
    pub language: Option<String>,
    pub cache_dir: Option<String>,
}

/// Incoming audio limits.
///
/// Uploads are streamed to a temporary file in `temp_dir` (the system temp
/// directory when unset) and deleted once the request finishes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UploadConfig {
    pub max_file_size_mb: usize,
    pub temp_dir: Option<String>,
}

impl UploadConfig {
    pub fn max_file_size_bytes(&self) -> usize {
        self.max_file_size_mb * 1024 * 1024
    }
}

/// Where the CLI sends audio.
///
/// With `remote = false` the model runs in-process; otherwise the file is
/// uploaded to `http://{host}:{port}/transcribe/`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientConfig {
    pub remote: bool,
    pub host: String,
    pub port: u16,
    pub model_name: String,
    pub timeout_secs: u64,
}

impl ClientConfig {
    pub fn endpoint(&self) -> String {
        format!("http://{}:{}/transcribe/", self.host, self.port)
    }
}

/// Ollama chat backend and retry settings for transcript formatting.
///
/// ## Backoff:
/// `backoff` is one of `"none"`, `"fixed"` or `"exponential"`. Delays start at
/// `backoff_initial_ms`; exponential backoff doubles up to `backoff_max_ms`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FormatterConfig {
    pub base_url: String,
    pub model: String,
    pub max_attempts: u32,
    pub backoff: String,
    pub backoff_initial_ms: u64,
    pub backoff_max_ms: u64,
    pub temperature: f32,
    pub top_p: f32,
    pub num_ctx: u32,
    pub repeat_penalty: f32,
    pub timeout_secs: u64,
}

impl FormatterConfig {
    /// Build the retry policy these settings describe.
    pub fn retry_policy(&self) -> Result<RetryPolicy> {
        RetryPolicy::from_settings(
            self.max_attempts,
            &self.backoff,
            self.backoff_initial_ms,
            self.backoff_max_ms,
        )
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 9911,
            },
            models: ModelsConfig {
                default_model: "turbo".to_string(),
                preload: Vec::new(),
                device: DevicePreference::Auto,
                language: None,
                cache_dir: None,
            },
            upload: UploadConfig {
                max_file_size_mb: 200,
                temp_dir: None,
            },
            client: ClientConfig {
                remote: false,
                host: "localhost".to_string(),
                port: 9911,
                model_name: "turbo".to_string(),
                timeout_secs: 600,   // Large models on CPU are slow
            },
            formatter: FormatterConfig {
                base_url: "http://localhost:11434/".to_string(),
                model: "gemma3:12b".to_string(),
                max_attempts: 3,
                backoff: "none".to_string(),
                backoff_initial_ms: 500,
                backoff_max_ms: 8000,
                temperature: 0.7,
                top_p: 0.9,
                num_ctx: 4096,
                repeat_penalty: 1.1,
                timeout_secs: 300,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Configuration Loading Process:
    /// 1. Start with built-in defaults
    /// 2. Override with values from config.toml (if it exists)
    /// 3. Override with environment variables prefixed with APP_
    /// 4. Handle special cases for HOST, PORT and USE_REMOTE_TRANSCRIBER
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__PORT=3000`: Override server port
    /// - `APP_MODELS__DEFAULT_MODEL=large`: Override the default model
    /// - `APP_MODELS__PRELOAD=base,turbo`: Preload two models
    /// - `APP_FORMATTER__MAX_ATTEMPTS=5`: More formatting retries
    /// - `USE_REMOTE_TRANSCRIBER=true`: Send CLI audio to the HTTP service
    pub fn load() -> Result<Self> {
        Self::load_from("config")
    }

    /// Same as [`AppConfig::load`] with an explicit config file (extension optional).
    pub fn load_from(file: &str) -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name(file).required(false))
            // Double underscore separates sections so field names keep their own underscores
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("models.preload"),
            );

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        if let Ok(remote) = env::var("USE_REMOTE_TRANSCRIBER") {
            settings = settings.set_override("client.remote", parse_flag(&remote))?;
        }

        let config = settings
            .build()?
            .try_deserialize()
            .context("invalid configuration")?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// ## What this checks:
    /// - Server and client ports are not 0
    /// - Upload limit is greater than 0
    /// - Default model is not blank
    /// - The formatter retry policy is well-formed (at least one attempt, known backoff)
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.client.port == 0 {
            return Err(anyhow::anyhow!("Client port cannot be 0"));
        }

        if self.upload.max_file_size_mb == 0 {
            return Err(anyhow::anyhow!("Upload size limit must be greater than 0"));
        }

        if self.models.default_model.trim().is_empty() {
            return Err(anyhow::anyhow!("Default model cannot be empty"));
        }

        self.formatter
            .retry_policy()
            .context("Invalid formatter retry policy")?;

        Ok(())
    }
}

/// Interpret common spellings of a boolean environment flag.
fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    /// Test that the default configuration is valid and has expected values.
    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 9911);
        assert_eq!(config.models.default_model, "turbo");
        assert_eq!(config.formatter.max_attempts, 3);
        assert!(!config.client.remote);
        assert!(config.validate().is_ok());
    }

    /// Test that validation catches invalid configurations.
    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.upload.max_file_size_mb = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.formatter.max_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.formatter.backoff = "sometimes".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_client_endpoint() {
        let config = AppConfig::default();
        assert_eq!(config.client.endpoint(), "http://localhost:9911/transcribe/");
        assert_eq!(config.upload.max_file_size_bytes(), 200 * 1024 * 1024);
    }

    #[test]
    fn test_flag_parsing() {
        assert!(parse_flag("true"));
        assert!(parse_flag(" YES "));
        assert!(parse_flag("1"));
        assert!(!parse_flag("false"));
        assert!(!parse_flag(""));
    }

    /// Values from a TOML file override defaults, untouched sections keep theirs.
    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scribe.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
[models]
default_model = "base"
preload = ["tiny", "base"]
device = "cpu"
language = "de"

[formatter]
max_attempts = 5
backoff = "exponential"
"#
        )
        .unwrap();

        let config = AppConfig::load_from(path.to_str().unwrap()).unwrap();
        assert_eq!(config.models.default_model, "base");
        assert_eq!(config.models.preload, vec!["tiny".to_string(), "base".to_string()]);
        assert_eq!(config.models.device, DevicePreference::Cpu);
        assert_eq!(config.models.language.as_deref(), Some("de"));
        assert_eq!(config.formatter.max_attempts, 5);
        assert_eq!(config.formatter.model, "gemma3:12b");
        assert_eq!(config.upload.max_file_size_mb, 200);
        assert!(config.validate().is_ok());
    }
}
