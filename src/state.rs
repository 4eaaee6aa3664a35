//! # Application State Management
//!
//! Shared state that every HTTP request handler can reach: configuration, the
//! model cache, and request metrics.
//!
//! ## Key Rust Concepts (IMPORTANT for beginners):
//!
//! ### Arc (Atomically Reference Counted)
//! - **Purpose**: Allows multiple parts of the program to safely share ownership of data
//! - **Why needed**: Multiple HTTP requests run simultaneously and all need access to the same state
//!
//! ### RwLock (Reader-Writer Lock)
//! - **Purpose**: Allows multiple readers OR one writer at a time (but not both)
//! - **Used for**: metrics, which every request updates
//!
//! ### What is NOT behind a lock
//! - **config**: read-only after startup, so a plain `Arc<AppConfig>` is enough
//! - **models**: `ModelCache` does its own per-model locking internally
//!
//! ### Lock poisoning
//! A thread that panics while holding a lock "poisons" it. Metrics are plain
//! counters, so we keep using the data (`PoisonError::into_inner`) instead of
//! failing every later request.

use crate::config::AppConfig;
use crate::transcription::ModelCache;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockWriteGuard};
use std::time::Instant;

/// The main application state that's shared across all HTTP request handlers.
///
/// `Clone` is cheap: every field is an `Arc` or `Copy`.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Application configuration, fixed at startup
    pub config: Arc<AppConfig>,

    /// Performance metrics (constantly being updated by requests)
    pub metrics: Arc<RwLock<AppMetrics>>,

    /// Loaded Whisper models, keyed by identifier
    pub models: Arc<ModelCache>,

    /// When the server started
    pub start_time: Instant,
}

/// Performance metrics collected across all HTTP requests.
///
/// ## Why these metrics matter:
/// - **request_count**: Total requests processed (for load monitoring)
/// - **error_count**: Total errors (for reliability monitoring)
/// - **active_transcriptions**: Requests currently running inference (for capacity planning)
/// - **completed_transcriptions**: Successful transcriptions since start
/// - **endpoint_metrics**: Per-endpoint statistics (for performance optimization)
#[derive(Debug, Default, Clone)]
pub struct AppMetrics {
    pub request_count: u64,
    pub error_count: u64,
    pub active_transcriptions: u32,
    pub completed_transcriptions: u64,

    /// Key: route pattern (e.g., "POST /transcribe/")
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

/// Detailed performance metrics for a specific API endpoint.
///
/// ## Performance calculations:
/// - **Average response time**: total_duration_ms / request_count
/// - **Error rate**: error_count / request_count
#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

impl AppState {
    /// Create a new AppState around an already-built model cache.
    ///
    /// The cache is passed in (rather than built here) so tests can hand in a
    /// cache backed by a fake loader.
    pub fn new(config: AppConfig, models: Arc<ModelCache>) -> Self {
        Self {
            config: Arc::new(config),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            models,
            start_time: Instant::now(),
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    fn metrics_mut(&self) -> RwLockWriteGuard<'_, AppMetrics> {
        self.metrics.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Increment the total request counter (called by middleware for every request).
    pub fn increment_request_count(&self) {
        self.metrics_mut().request_count += 1;
    }

    /// Increment the total error counter (any 4xx or 5xx response).
    pub fn increment_error_count(&self) {
        self.metrics_mut().error_count += 1;
    }

    /// Record detailed metrics for a specific endpoint.
    ///
    /// ## HashMap operations:
    /// The first time we see an endpoint, we create a new EndpointMetric with default values.
    /// Subsequent requests update the existing metrics for that endpoint.
    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics_mut();
        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();

        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;

        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// Count a transcription as running until the returned guard is dropped.
    ///
    /// ## Rust Concepts:
    /// - **RAII**: the guard's `Drop` impl decrements the counter, so the count
    ///   is correct on every exit path, including `?` early returns
    pub fn track_transcription(&self) -> TranscriptionGuard {
        self.metrics_mut().active_transcriptions += 1;
        TranscriptionGuard {
            metrics: self.metrics.clone(),
            completed: false,
        }
    }

    /// Get a snapshot of current metrics (used for the /metrics endpoint).
    ///
    /// Cloning releases the lock before the response is serialized.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        self.metrics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

/// Marks one in-flight transcription. See [`AppState::track_transcription`].
pub struct TranscriptionGuard {
    metrics: Arc<RwLock<AppMetrics>>,
    completed: bool,
}

impl TranscriptionGuard {
    /// Mark the transcription as successful before the guard drops.
    pub fn complete(mut self) {
        self.completed = true;
    }
}

impl Drop for TranscriptionGuard {
    fn drop(&mut self) {
        let mut metrics = self.metrics.write().unwrap_or_else(PoisonError::into_inner);
        metrics.active_transcriptions = metrics.active_transcriptions.saturating_sub(1);
        if self.completed {
            metrics.completed_transcriptions += 1;
        }
    }
}

impl EndpointMetric {
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    /// Error rate as a fraction (0.0 to 1.0).
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}
