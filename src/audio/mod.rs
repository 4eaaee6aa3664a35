//! # Audio Loading
//!
//! Turns an audio file on disk into what Whisper consumes: mono 32-bit float
//! samples at 16kHz, plus the log-mel filter bank used to build spectrograms.
//!
//! ## Decoding Strategy:
//! - **16kHz WAV**: read directly with the `wav` crate, no external tools
//! - **Everything else** (mp3, m4a, ogg, flac, webm, resampled WAV...): piped
//!   through `ffmpeg`, which must be on `PATH` (or set via `FFMPEG_BIN`)
//!
//! ## Audio Format Requirements (output):
//! - **Sample Rate**: 16kHz (16,000 Hz)
//! - **Channels**: Mono (1 channel)
//! - **Range**: [-1.0, 1.0]

pub mod decode;   // File → PCM samples
pub mod mel;      // Mel filter bank construction

pub use decode::{load_pcm, SAMPLE_RATE};
pub use mel::mel_filter_bank;
