//! Test doubles for the backend traits.

use crate::transcription::backend::{
    Backend, BackendError, BackendLoader, Segment, TranscribeOptions, TranscriptionResult,
};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Backend that echoes its inputs back as a transcript.
///
/// Records every audio path it was handed so tests can check temp-file cleanup.
pub struct FakeBackend {
    model: String,
    fail_with: Option<fn() -> BackendError>,
    panics: bool,
    pub seen_paths: Mutex<Vec<PathBuf>>,
}

impl FakeBackend {
    pub fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            fail_with: None,
            panics: false,
            seen_paths: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(model: &str, fail_with: fn() -> BackendError) -> Self {
        Self {
            fail_with: Some(fail_with),
            ..Self::new(model)
        }
    }

    /// Panics mid-transcription, after recording the path.
    pub fn panicking(model: &str) -> Self {
        Self {
            panics: true,
            ..Self::new(model)
        }
    }

    pub fn seen_paths(&self) -> Vec<PathBuf> {
        self.seen_paths.lock().unwrap().clone()
    }
}

impl Backend for FakeBackend {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn transcribe(
        &self,
        audio_path: &Path,
        options: &TranscribeOptions,
    ) -> Result<TranscriptionResult, BackendError> {
        self.seen_paths.lock().unwrap().push(audio_path.to_path_buf());
        assert!(audio_path.exists(), "audio file must exist during transcription");

        if self.panics {
            panic!("inference blew up on {}", audio_path.display());
        }
        if let Some(fail) = self.fail_with {
            return Err(fail());
        }

        let bytes = std::fs::read(audio_path)?;
        let text = format!(
            "{} {} bytes via {} ({})",
            options.task,
            bytes.len(),
            self.model,
            options.initial_prompt.as_deref().unwrap_or("no prompt")
        );
        Ok(TranscriptionResult {
            text: text.clone(),
            segments: vec![Segment {
                start: 0.0,
                end: 1.5,
                text,
            }],
        })
    }
}

/// Loader producing [`FakeBackend`]s, counting calls and failing on request.
pub struct FakeLoader {
    calls: AtomicUsize,
    failing: HashSet<String>,
    fail_first: usize,
    delay: Option<Duration>,
    backend: Option<Arc<FakeBackend>>,
}

impl FakeLoader {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            failing: HashSet::new(),
            fail_first: 0,
            delay: None,
            backend: None,
        }
    }

    pub fn failing(models: &[&str]) -> Self {
        Self {
            failing: models.iter().map(|m| m.to_string()).collect(),
            ..Self::new()
        }
    }

    /// Fail the first `n` loads of any model, then succeed.
    pub fn failing_first(n: usize) -> Self {
        Self {
            fail_first: n,
            ..Self::new()
        }
    }

    /// Hand out this exact backend for every successful load.
    pub fn serving(backend: Arc<FakeBackend>) -> Self {
        Self {
            backend: Some(backend),
            ..Self::new()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl BackendLoader for FakeLoader {
    fn load(&self, model: &str) -> anyhow::Result<Arc<dyn Backend>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        if call < self.fail_first {
            anyhow::bail!("download of '{}' interrupted", model);
        }
        if self.failing.contains(model) {
            anyhow::bail!("no weights found for '{}'", model);
        }
        let backend: Arc<dyn Backend> = match &self.backend {
            Some(backend) => backend.clone(),
            None => Arc::new(FakeBackend::new(model)),
        };
        Ok(backend)
    }
}
