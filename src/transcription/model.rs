//! # Whisper Model Backend
//!
//! Runs OpenAI Whisper checkpoints in-process with Candle-rs. This is the local
//! [`Backend`] the model cache hands out.
//!
//! ## Model Loading Process:
//! 1. Map the identifier ("base", "turbo", ...) to a HuggingFace repository
//! 2. Download `config.json`, `tokenizer.json` and `model.safetensors` (cached locally)
//! 3. Memory-map the weights onto the selected device
//! 4. Build the mel filter bank for the model's `num_mel_bins`
//!
//! ## Decoding:
//! Audio is processed in 30-second windows. Each window is greedily decoded with
//! timestamp tokens enabled, and the timestamps split the output into segments.
//! When a window ends mid-sentence the next window restarts at the last closed
//! timestamp. Text from earlier windows (and the initial prompt) is fed back as
//! `<|startofprev|>` context.
//!
//! ## Thread Safety:
//! Candle's decoder keeps a key/value cache and needs `&mut` access, so the model
//! sits behind a `Mutex`. Requests for the same model are serialized; different
//! models run in parallel.

use crate::audio::{self, SAMPLE_RATE};
use crate::device::{select_device, DevicePreference};
use crate::transcription::backend::{
    Backend, BackendError, BackendLoader, Segment, Task, TranscribeOptions, TranscriptionResult,
};
use anyhow::{anyhow, Context, Result};
use candle_core::{Device, IndexOp, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::whisper::{self as m, Config};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokenizers::Tokenizer;

/// Seconds per timestamp token.
const TIMESTAMP_STEP: f64 = 0.02;

/// Mel frames per timestamp token (100 frames per second).
const FRAMES_PER_TIMESTAMP: usize = 2;

/// Latest timestamp the first token of a window may carry (1.0s).
const MAX_INITIAL_TIMESTAMP: u32 = 50;

/// Language codes in Whisper's token order.
const LANGUAGES: &[&str] = &[
    "en", "zh", "de", "es", "ru", "ko", "fr", "ja", "pt", "tr", "pl", "ca", "nl", "ar", "sv",
    "it", "id", "hi", "fi", "vi", "he", "uk", "el", "ms", "cs", "ro", "da", "hu", "ta", "no",
    "th", "ur", "hr", "bg", "lt", "la", "mi", "ml", "cy", "sk", "te", "fa", "lv", "bn", "sr",
    "az", "sl", "kn", "et", "mk", "br", "eu", "is", "hy", "ne", "mn", "bs", "kk", "sq", "sw",
    "gl", "mr", "pa", "si", "km", "sn", "yo", "so", "af", "oc", "ka", "be", "tg", "sd", "gu",
    "am", "yi", "lo", "uz", "fo", "ht", "ps", "tk", "nn", "mt", "sa", "lb", "my", "bo", "tl",
    "mg", "as", "tt", "haw", "ln", "ha", "ba", "jw", "su", "yue",
];

/// Identifiers accepted besides raw `owner/repo` names.
pub const KNOWN_MODELS: &[&str] = &[
    "tiny", "tiny.en", "base", "base.en", "small", "small.en", "medium", "medium.en", "large",
    "large-v1", "large-v2", "large-v3", "turbo", "large-v3-turbo",
];

/// Map a model identifier to the HuggingFace repository holding its weights.
///
/// ## Rules:
/// - Known sizes map to the `openai/whisper-*` repositories
/// - `large` means the newest large checkpoint (v3)
/// - Anything containing `/` is taken as a repository id verbatim
pub fn repo_for(model: &str) -> Option<String> {
    if model.contains('/') {
        return Some(model.to_string());
    }
    let repo = match model.to_lowercase().as_str() {
        "tiny" => "openai/whisper-tiny",
        "tiny.en" => "openai/whisper-tiny.en",
        "base" => "openai/whisper-base",
        "base.en" => "openai/whisper-base.en",
        "small" => "openai/whisper-small",
        "small.en" => "openai/whisper-small.en",
        "medium" => "openai/whisper-medium",
        "medium.en" => "openai/whisper-medium.en",
        "large" | "large-v3" => "openai/whisper-large-v3",
        "large-v1" => "openai/whisper-large",
        "large-v2" => "openai/whisper-large-v2",
        "turbo" | "large-v3-turbo" => "openai/whisper-large-v3-turbo",
        _ => return None,
    };
    Some(repo.to_string())
}

/// Builds [`WhisperModel`]s for the model cache.
#[derive(Debug, Clone)]
pub struct WhisperLoader {
    pub device: DevicePreference,
    /// Overrides the HuggingFace cache location
    pub cache_dir: Option<PathBuf>,
    /// Force a language (ISO 639-1) instead of detecting it per file
    pub language: Option<String>,
}

impl BackendLoader for WhisperLoader {
    fn load(&self, model: &str) -> Result<Arc<dyn Backend>> {
        let repo = repo_for(model).ok_or_else(|| {
            anyhow!(
                "unknown model '{}'; expected one of {} or a HuggingFace repo id",
                model,
                KNOWN_MODELS.join(", ")
            )
        })?;
        let device = select_device(self.device);
        let backend = WhisperModel::load(model, &repo, device, self)?;
        Ok(Arc::new(backend))
    }
}

/// Token ids the decoder needs, looked up from the tokenizer.
#[derive(Debug, Clone, Copy)]
struct SpecialTokens {
    sot: u32,
    eot: u32,
    transcribe: u32,
    translate: u32,
    sot_prev: Option<u32>,
    timestamp_begin: u32,
}

/// A Whisper checkpoint loaded onto a device.
pub struct WhisperModel {
    name: String,
    model: Mutex<m::model::Whisper>,
    config: Config,
    tokenizer: Tokenizer,
    mel_filters: Vec<f32>,
    device: Device,
    tokens: SpecialTokens,
    /// Forced language token, if configured
    language_token: Option<u32>,
    multilingual: bool,
}

impl WhisperModel {
    /// Download (or reuse from cache) and load the weights for `repo`.
    pub fn load(name: &str, repo: &str, device: Device, loader: &WhisperLoader) -> Result<Self> {
        let start = Instant::now();
        tracing::info!(model = %name, repo = %repo, device = crate::device::device_label(&device), "Loading Whisper model");

        let mut builder = hf_hub::api::sync::ApiBuilder::new().with_progress(false);
        if let Some(dir) = &loader.cache_dir {
            builder = builder.with_cache_dir(dir.clone());
        } else if let Ok(cache_dir) = std::env::var("HF_HUB_CACHE") {
            builder = builder.with_cache_dir(cache_dir.into());
        } else if let Ok(hf_home) = std::env::var("HF_HOME") {
            builder = builder.with_cache_dir(PathBuf::from(hf_home).join("hub"));
        }
        if let Ok(token) = std::env::var("HF_TOKEN") {
            builder = builder.with_token(Some(token));
        }
        let api = builder.build().context("failed to create HuggingFace client")?;
        let files = api.model(repo.to_string());

        let config_path = files
            .get("config.json")
            .with_context(|| format!("failed to fetch config.json from {}", repo))?;
        let tokenizer_path = files
            .get("tokenizer.json")
            .with_context(|| format!("failed to fetch tokenizer.json from {}", repo))?;
        let weights_path = files
            .get("model.safetensors")
            .with_context(|| format!("failed to fetch model.safetensors from {}", repo))?;

        let config: Config = serde_json::from_reader(std::fs::File::open(&config_path)?)
            .context("invalid model config.json")?;
        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow!("failed to load tokenizer: {}", e))?;

        // SAFETY: the file is in the read-only HF cache and outlives the mapping
        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[weights_path], m::DTYPE, &device)? };
        let model = m::model::Whisper::load(&vb, config.clone())?;

        let tokens = SpecialTokens {
            sot: token_id(&tokenizer, m::SOT_TOKEN)?,
            eot: token_id(&tokenizer, m::EOT_TOKEN)?,
            transcribe: token_id(&tokenizer, m::TRANSCRIBE_TOKEN)?,
            translate: token_id(&tokenizer, m::TRANSLATE_TOKEN)?,
            sot_prev: tokenizer.token_to_id("<|startofprev|>"),
            timestamp_begin: token_id(&tokenizer, m::NO_TIMESTAMPS_TOKEN)? + 1,
        };

        // Multilingual checkpoints carry the full 51865+ token vocabulary
        let multilingual = config.vocab_size >= 51865;
        let language_token = match (&loader.language, multilingual) {
            (Some(code), true) => Some(token_id(&tokenizer, &format!("<|{}|>", code.to_lowercase()))?),
            (Some(code), false) => {
                tracing::warn!(model = %name, language = %code, "English-only model, ignoring language setting");
                None
            }
            (None, _) => None,
        };

        let mel_filters = audio::mel_filter_bank(SAMPLE_RATE, config.num_mel_bins);

        tracing::info!(
            model = %name,
            elapsed_s = start.elapsed().as_secs_f64(),
            multilingual,
            "Whisper model ready"
        );

        Ok(Self {
            name: name.to_string(),
            model: Mutex::new(model),
            config,
            tokenizer,
            mel_filters,
            device,
            tokens,
            language_token,
            multilingual,
        })
    }

    fn encode(&self, text: &str) -> Result<Vec<u32>, BackendError> {
        let encoding = self
            .tokenizer
            .encode(text, false)
            .map_err(|e| BackendError::Inference(format!("tokenizer encode error: {}", e)))?;
        Ok(encoding.get_ids().to_vec())
    }

    fn decode(&self, tokens: &[u32]) -> Result<String, BackendError> {
        self.tokenizer
            .decode(tokens, true)
            .map_err(|e| BackendError::Inference(format!("tokenizer decode error: {}", e)))
    }

    /// Ask the decoder which language token follows `<|startoftranscript|>`.
    fn detect_language(
        &self,
        model: &mut m::model::Whisper,
        audio_features: &Tensor,
    ) -> Result<u32, BackendError> {
        let candidates: Vec<u32> = LANGUAGES
            .iter()
            .filter_map(|code| self.tokenizer.token_to_id(&format!("<|{}|>", code)))
            .collect();

        let tokens_t = Tensor::new(&[self.tokens.sot], &self.device)?.unsqueeze(0)?;
        let ys = model.decoder.forward(&tokens_t, audio_features, true)?;
        let logits: Vec<f32> = model.decoder.final_linear(&ys.i(..1)?)?.i(0)?.i(0)?.to_vec1()?;

        let best = candidates
            .into_iter()
            .filter(|id| (*id as usize) < logits.len())
            .max_by(|a, b| logits[*a as usize].total_cmp(&logits[*b as usize]))
            .ok_or_else(|| BackendError::Inference("tokenizer has no language tokens".to_string()))?;

        tracing::debug!(model = %self.name, language = ?self.tokenizer.id_to_token(best), "Detected language");
        Ok(best)
    }

    /// Greedy decode of one window; returns the sampled tokens (timestamps included, no EOT).
    fn decode_window(
        &self,
        model: &mut m::model::Whisper,
        audio_features: &Tensor,
        context: &[u32],
        language_token: Option<u32>,
        task: Task,
    ) -> Result<Vec<u32>, BackendError> {
        let max_positions = self.config.max_target_positions;
        let mut tokens = Vec::new();

        if let (Some(sot_prev), false) = (self.tokens.sot_prev, context.is_empty()) {
            let keep = max_positions / 2 - 1;
            tokens.push(sot_prev);
            tokens.extend_from_slice(&context[context.len().saturating_sub(keep)..]);
        }

        tokens.push(self.tokens.sot);
        if self.multilingual {
            if let Some(language) = language_token {
                tokens.push(language);
            }
            tokens.push(match task {
                Task::Transcribe => self.tokens.transcribe,
                Task::Translate => self.tokens.translate,
            });
        }

        let sample_begin = tokens.len();
        for i in 0..max_positions / 2 {
            let tokens_t = Tensor::new(tokens.as_slice(), &self.device)?.unsqueeze(0)?;
            let ys = model.decoder.forward(&tokens_t, audio_features, i == 0)?;
            let (_, seq_len, _) = ys.dims3()?;
            let mut logits: Vec<f32> = model
                .decoder
                .final_linear(&ys.i((..1, seq_len - 1..))?)?
                .i(0)?
                .i(0)?
                .to_vec1()?;

            for &id in &self.config.suppress_tokens {
                if let Some(logit) = logits.get_mut(id as usize) {
                    *logit = f32::NEG_INFINITY;
                }
            }
            apply_timestamp_rules(
                &mut logits,
                &tokens[sample_begin..],
                self.tokens.eot,
                self.tokens.timestamp_begin,
            );

            let next = argmax(&logits);
            if next == self.tokens.eot || logits[next as usize] == f32::NEG_INFINITY {
                break;
            }
            tokens.push(next);
            if tokens.len() >= max_positions {
                break;
            }
        }

        Ok(tokens.split_off(sample_begin))
    }
}

impl Backend for WhisperModel {
    fn model_name(&self) -> &str {
        &self.name
    }

    fn transcribe(
        &self,
        audio_path: &Path,
        options: &TranscribeOptions,
    ) -> Result<TranscriptionResult, BackendError> {
        let start = Instant::now();
        let pcm = audio::load_pcm(audio_path)?;
        let audio_seconds = pcm.len() as f64 / SAMPLE_RATE as f64;
        tracing::debug!(model = %self.name, audio_seconds, task = %options.task, "Starting transcription");

        if pcm.is_empty() {
            return Ok(TranscriptionResult {
                text: String::new(),
                segments: Vec::new(),
            });
        }

        if !self.multilingual && options.task == Task::Translate {
            tracing::warn!(model = %self.name, "English-only model cannot translate, transcribing instead");
        }

        let n_mels = self.config.num_mel_bins;
        let mel = m::audio::pcm_to_mel(&self.config, &pcm, &self.mel_filters);
        let mel_frames = mel.len() / n_mels;
        let mel = Tensor::from_vec(mel, (1, n_mels, mel_frames), &self.device)?;
        let content_frames = (pcm.len() / m::HOP_LENGTH).min(mel_frames);

        let mut model = self
            .model
            .lock()
            .map_err(|_| BackendError::Inference("model lock poisoned".to_string()))?;

        let mut context = match &options.initial_prompt {
            Some(prompt) => self.encode(&format!(" {}", prompt.trim()))?,
            None => Vec::new(),
        };
        let mut language_token = self.language_token;
        let mut segments = Vec::new();
        let mut seek = 0;

        while seek < content_frames {
            let segment_frames = (content_frames - seek).min(m::N_FRAMES);
            let window = mel.narrow(2, seek, (mel_frames - seek).min(m::N_FRAMES))?;
            let offset = seek as f64 * m::HOP_LENGTH as f64 / SAMPLE_RATE as f64;

            let audio_features = model.encoder.forward(&window, true)?;
            if self.multilingual && language_token.is_none() {
                language_token = Some(self.detect_language(&mut model, &audio_features)?);
            }

            let sampled =
                self.decode_window(&mut model, &audio_features, &context, language_token, options.task)?;
            let output = split_window(
                &sampled,
                self.tokens.timestamp_begin,
                offset,
                segment_frames,
                |tokens| self.decode(tokens),
            )?;

            context.extend_from_slice(&output.text_tokens);
            segments.extend(output.segments);
            seek += output.consumed_frames;
        }

        let text: String = segments.iter().map(|s| s.text.as_str()).collect();
        tracing::info!(
            model = %self.name,
            audio_seconds,
            segments = segments.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Transcription completed"
        );

        Ok(TranscriptionResult { text, segments })
    }
}

fn token_id(tokenizer: &Tokenizer, token: &str) -> Result<u32> {
    tokenizer
        .token_to_id(token)
        .ok_or_else(|| anyhow!("tokenizer has no '{}' token", token))
}

fn argmax(logits: &[f32]) -> u32 {
    logits
        .iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| a.total_cmp(b))
        .map(|(i, _)| i as u32)
        .unwrap_or(0)
}

fn mask(logits: &mut [f32], from: usize, to: usize) {
    let to = to.min(logits.len());
    if from < to {
        logits[from..to].fill(f32::NEG_INFINITY);
    }
}

/// Constrain the next token so timestamps come in well-formed, increasing pairs.
///
/// ## Rules:
/// - Special tokens between EOT and the first timestamp are never sampled
/// - A window must open with a timestamp no later than 1.0s
/// - After a lone timestamp comes another timestamp or EOT; after a pair comes text
/// - Timestamps never go backwards
/// - If timestamps are jointly more likely than any single text token, emit a timestamp
fn apply_timestamp_rules(logits: &mut [f32], sampled: &[u32], eot: u32, timestamp_begin: u32) {
    let eot = eot as usize;
    let ts_begin = timestamp_begin as usize;
    mask(logits, eot + 1, ts_begin);

    if sampled.is_empty() {
        mask(logits, 0, ts_begin);
        mask(logits, ts_begin + MAX_INITIAL_TIMESTAMP as usize + 1, logits.len());
        return;
    }

    let is_ts = |t: u32| t >= timestamp_begin;
    let last_was_ts = sampled.last().is_some_and(|&t| is_ts(t));
    let penultimate_was_ts = sampled.len() < 2 || is_ts(sampled[sampled.len() - 2]);

    if last_was_ts {
        if penultimate_was_ts {
            mask(logits, ts_begin, logits.len());
        } else {
            mask(logits, 0, eot);
        }
    }

    if let Some(&last_ts) = sampled.iter().rev().find(|&&t| is_ts(t)) {
        let floor = if last_was_ts && !penultimate_was_ts {
            last_ts as usize
        } else {
            last_ts as usize + 1
        };
        mask(logits, ts_begin, floor);
    }

    // Compare the total timestamp probability mass against the best text token
    let max_logit = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    if max_logit == f32::NEG_INFINITY || ts_begin >= logits.len() {
        return;
    }
    let log_norm = max_logit
        + logits
            .iter()
            .map(|l| (l - max_logit).exp())
            .sum::<f32>()
            .ln();
    let ts_max = logits[ts_begin..].iter().copied().fold(f32::NEG_INFINITY, f32::max);
    if ts_max == f32::NEG_INFINITY {
        return;
    }
    let ts_logprob = ts_max
        + logits[ts_begin..]
            .iter()
            .map(|l| (l - ts_max).exp())
            .sum::<f32>()
            .ln()
        - log_norm;
    let text_logprob = logits[..ts_begin]
        .iter()
        .copied()
        .fold(f32::NEG_INFINITY, f32::max)
        - log_norm;
    if ts_logprob > text_logprob {
        mask(logits, 0, ts_begin);
    }
}

/// Segments recovered from one decoded window.
#[derive(Debug, PartialEq)]
struct WindowOutput {
    segments: Vec<Segment>,
    /// Text tokens of the kept segments, used as context for the next window
    text_tokens: Vec<u32>,
    /// How far to advance the window, in mel frames
    consumed_frames: usize,
}

/// Split sampled tokens into timed segments.
///
/// A segment is text enclosed by two timestamps. Trailing text without a
/// closing timestamp is either dropped (and re-decoded from the last closed
/// timestamp) or, when nothing was closed, kept as a segment ending at the
/// window's end.
fn split_window(
    sampled: &[u32],
    timestamp_begin: u32,
    offset: f64,
    segment_frames: usize,
    decode: impl Fn(&[u32]) -> Result<String, BackendError>,
) -> Result<WindowOutput, BackendError> {
    let seconds = |ts: u32| offset + ts as f64 * TIMESTAMP_STEP;
    let mut segments = Vec::new();
    let mut text_tokens = Vec::new();
    let mut start: Option<u32> = None;
    let mut pending: Vec<u32> = Vec::new();
    let mut last_closed: Option<u32> = None;

    for &token in sampled {
        if token < timestamp_begin {
            pending.push(token);
            continue;
        }
        let ts = token - timestamp_begin;
        match start {
            Some(begin) if !pending.is_empty() => {
                segments.push(Segment {
                    start: seconds(begin),
                    end: seconds(ts),
                    text: decode(&pending)?,
                });
                text_tokens.append(&mut pending);
                start = None;
                last_closed = Some(ts);
            }
            _ => start = Some(ts),
        }
    }

    let mut consumed_frames = segment_frames;
    if !pending.is_empty() {
        match last_closed {
            Some(end) if end > 0 => {
                consumed_frames = (end as usize * FRAMES_PER_TIMESTAMP).min(segment_frames);
            }
            _ => {
                let begin = start.or(last_closed).unwrap_or(0);
                segments.push(Segment {
                    start: seconds(begin),
                    end: offset + segment_frames as f64 * m::HOP_LENGTH as f64 / SAMPLE_RATE as f64,
                    text: decode(&pending)?,
                });
                text_tokens.append(&mut pending);
            }
        }
    }

    segments.retain(|s| !s.text.trim().is_empty());
    Ok(WindowOutput {
        segments,
        text_tokens,
        consumed_frames: consumed_frames.max(1),
    })
}
