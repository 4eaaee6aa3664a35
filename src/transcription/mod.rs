//! # Transcription Module
//!
//! Speech-to-text using Whisper models run through the Candle-rs framework.
//! Pure Rust, no FFI bindings to whisper.cpp.
//!
//! ## Key Components:
//! - **Backend contract**: the trait every speech model implements, plus its result types
//! - **Model cache**: loads each model once and hands out shared instances
//! - **Whisper model**: the Candle implementation of the backend
//!
//! ## Whisper Model Sizes:
//! - **tiny**: ~39MB, fastest but least accurate
//! - **base**: ~74MB, good balance for development
//! - **small**: ~244MB, better accuracy
//! - **medium**: ~769MB, good technical vocabulary
//! - **large**: ~1550MB, best accuracy but slowest
//! - **turbo**: large-v3 with a pruned decoder, near-large accuracy at a fraction of the cost

pub mod backend;     // Backend trait, options and result types
pub mod cache;       // Per-identifier model cache
pub mod model;       // Candle Whisper backend

#[cfg(test)]
pub(crate) mod testing;

pub use backend::{
    Backend, BackendError, BackendLoader, Segment, Task, TranscribeOptions, TranscriptionResult,
};
pub use cache::{CacheStatus, ModelCache, ResolveError};
pub use model::{WhisperLoader, WhisperModel};
