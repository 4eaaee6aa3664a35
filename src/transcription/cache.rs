//! # Model Cache
//!
//! Memoizes loaded speech models by identifier so each model is read from disk
//! (and pushed onto the compute device) once per process.
//!
//! ## Behavior:
//! - **Hit**: the cached backend is returned as-is. No TTL, no health check.
//! - **Miss**: the loader builds a backend; on success it is stored, on failure
//!   nothing is stored and the next request tries again.
//! - **Current model**: every call records the requested identifier, whether or
//!   not the load succeeds. `last_loaded` only moves on success.
//! - **No eviction**: entries live until the process exits. Fine for the handful
//!   of model sizes an operator runs; not for arbitrary user-supplied names.
//!
//! ## Concurrency:
//! Each identifier gets its own `tokio::sync::OnceCell`. Concurrent first
//! requests for the same identifier wait on one load instead of racing to build
//! duplicate multi-gigabyte models. Requests for different identifiers load in
//! parallel. The map lock is only held to look up or insert a cell, never
//! across an `.await`.
//!
//! A failed load leaves its cell empty but in place. A caller already waiting
//! on that cell then runs the load itself, and whatever it produces lands in
//! the one cell every later request sees. Empty cells never count as loaded.

use crate::transcription::backend::{Backend, BackendLoader};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Instant;
use tokio::sync::OnceCell;
use tracing::{error, info, warn};

type Slot = Arc<OnceCell<Arc<dyn Backend>>>;

/// A failed model resolution.
#[derive(Debug, Clone, thiserror::Error)]
#[error("failed to load model '{model}': {cause}")]
pub struct ResolveError {
    /// The identifier that was requested
    pub model: String,
    /// Why the loader gave up
    pub cause: String,
}

/// Point-in-time view of the cache for status endpoints.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CacheStatus {
    pub current_model: Option<String>,
    pub last_loaded: Option<String>,
    pub loaded_models: Vec<String>,
}

/// Lazily populated map from model identifier to loaded backend.
pub struct ModelCache {
    loader: Arc<dyn BackendLoader>,
    slots: Mutex<HashMap<String, Slot>>,
    current_model: RwLock<Option<String>>,
    last_loaded: RwLock<Option<String>>,
}

impl ModelCache {
    pub fn new(loader: Arc<dyn BackendLoader>) -> Self {
        Self {
            loader,
            slots: Mutex::new(HashMap::new()),
            current_model: RwLock::new(None),
            last_loaded: RwLock::new(None),
        }
    }

    /// Return the backend for `model`, loading it on first use.
    ///
    /// ## Returns:
    /// - **Ok(backend)**: the cached instance, or a freshly loaded one now cached
    /// - **Err(ResolveError)**: loading failed; the cache is unchanged
    pub async fn resolve(&self, model: &str) -> Result<Arc<dyn Backend>, ResolveError> {
        *self
            .current_model
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(model.to_string());

        let slot = self.slot_for(model);
        if let Some(backend) = slot.get() {
            return Ok(backend.clone());
        }

        let loader = self.loader.clone();
        let name = model.to_string();
        let outcome = slot
            .get_or_try_init(|| async move {
                let start = Instant::now();
                info!(model = %name, "Loading model");
                let result = tokio::task::spawn_blocking(move || loader.load(&name))
                    .await
                    .map_err(|e| anyhow::anyhow!("model loader task aborted: {}", e))?;
                if result.is_ok() {
                    info!(elapsed_s = start.elapsed().as_secs_f64(), "Model loaded");
                }
                result
            })
            .await;

        match outcome {
            Ok(backend) => {
                *self
                    .last_loaded
                    .write()
                    .unwrap_or_else(PoisonError::into_inner) = Some(model.to_string());
                Ok(backend.clone())
            }
            Err(e) => {
                error!(model = %model, error = %e, "Model load failed");
                Err(ResolveError {
                    model: model.to_string(),
                    cause: format!("{:#}", e),
                })
            }
        }
    }

    /// Load each identifier up front. Failures are logged, not fatal.
    pub async fn preload(&self, models: &[String]) {
        for model in models {
            if let Err(e) = self.resolve(model).await {
                warn!(model = %model, error = %e, "Preload failed, will retry on first request");
            }
        }
    }

    /// Most recently requested identifier, successful or not.
    pub fn current_model(&self) -> Option<String> {
        self.current_model
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Most recently resolved identifier that produced a backend.
    pub fn last_loaded(&self) -> Option<String> {
        self.last_loaded
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Identifiers with a loaded backend, sorted.
    pub fn loaded_models(&self) -> Vec<String> {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = slots
            .iter()
            .filter(|(_, slot)| slot.initialized())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    pub fn contains(&self, model: &str) -> bool {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.get(model).is_some_and(|slot| slot.initialized())
    }

    /// Number of loaded backends.
    pub fn len(&self) -> usize {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.values().filter(|slot| slot.initialized()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn status(&self) -> CacheStatus {
        CacheStatus {
            current_model: self.current_model(),
            last_loaded: self.last_loaded(),
            loaded_models: self.loaded_models(),
        }
    }

    fn slot_for(&self, model: &str) -> Slot {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots
            .entry(model.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone()
    }
}

impl std::fmt::Debug for ModelCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelCache")
            .field("loaded_models", &self.loaded_models())
            .field("current_model", &self.current_model())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcription::testing::FakeLoader;
    use std::time::Duration;

    #[tokio::test]
    async fn test_fresh_model_adds_one_entry() {
        let loader = Arc::new(FakeLoader::new());
        let cache = ModelCache::new(loader.clone());
        assert!(cache.is_empty());

        let backend = cache.resolve("tiny").await.unwrap();
        assert_eq!(backend.model_name(), "tiny");
        assert_eq!(cache.len(), 1);
        assert!(cache.contains("tiny"));
        assert_eq!(loader.calls(), 1);
        assert_eq!(cache.current_model().as_deref(), Some("tiny"));
        assert_eq!(cache.last_loaded().as_deref(), Some("tiny"));
    }

    #[tokio::test]
    async fn test_failed_load_adds_nothing_and_is_retried() {
        let loader = Arc::new(FakeLoader::failing(&["huge"]));
        let cache = ModelCache::new(loader.clone());
        cache.resolve("base").await.unwrap();

        let err = cache.resolve("huge").await.err().unwrap();
        assert_eq!(err.model, "huge");
        assert!(err.cause.contains("huge"));
        assert_eq!(cache.len(), 1);
        assert!(!cache.contains("huge"));
        assert_eq!(cache.loaded_models(), vec!["base".to_string()]);

        // Requested, even though it failed
        assert_eq!(cache.current_model().as_deref(), Some("huge"));
        assert_eq!(cache.last_loaded().as_deref(), Some("base"));

        // No negative caching
        assert!(cache.resolve("huge").await.is_err());
        assert_eq!(loader.calls(), 3);
    }

    #[tokio::test]
    async fn test_cached_model_is_reused() {
        let loader = Arc::new(FakeLoader::new());
        let cache = ModelCache::new(loader.clone());

        let first = cache.resolve("small").await.unwrap();
        let second = cache.resolve("small").await.unwrap();
        let third = cache.resolve("small").await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert!(Arc::ptr_eq(&second, &third));
        assert_eq!(cache.len(), 1);
        assert_eq!(loader.calls(), 1);
    }

    #[tokio::test]
    async fn test_current_model_follows_requests() {
        let cache = ModelCache::new(Arc::new(FakeLoader::new()));
        assert_eq!(cache.status().current_model, None);

        cache.resolve("tiny").await.unwrap();
        cache.resolve("turbo").await.unwrap();
        cache.resolve("tiny").await.unwrap();

        let status = cache.status();
        assert_eq!(status.current_model.as_deref(), Some("tiny"));
        assert_eq!(status.loaded_models, vec!["tiny".to_string(), "turbo".to_string()]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_requests_load_once() {
        let loader = Arc::new(FakeLoader::new().with_delay(Duration::from_millis(100)));
        let cache = Arc::new(ModelCache::new(loader.clone()));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.resolve("medium").await })
            })
            .collect();

        let mut backends = Vec::new();
        for handle in handles {
            backends.push(handle.await.unwrap().unwrap());
        }

        assert_eq!(loader.calls(), 1);
        assert_eq!(cache.len(), 1);
        assert!(backends.windows(2).all(|pair| Arc::ptr_eq(&pair[0], &pair[1])));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_waiter_retry_after_failed_load_is_cached() {
        let loader = Arc::new(FakeLoader::failing_first(1).with_delay(Duration::from_millis(200)));
        let cache = Arc::new(ModelCache::new(loader.clone()));

        let first = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.resolve("turbo").await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        let second = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.resolve("turbo").await })
        };

        assert!(first.await.unwrap().is_err());
        let backend = second.await.unwrap().unwrap();
        assert_eq!(loader.calls(), 2);
        assert_eq!(cache.len(), 1);
        assert!(cache.contains("turbo"));

        let again = cache.resolve("turbo").await.unwrap();
        assert!(Arc::ptr_eq(&backend, &again));
        assert_eq!(loader.calls(), 2);
    }

    #[tokio::test]
    async fn test_preload_tolerates_failures() {
        let loader = Arc::new(FakeLoader::failing(&["broken"]));
        let cache = ModelCache::new(loader.clone());

        cache
            .preload(&["base".to_string(), "broken".to_string(), "turbo".to_string()])
            .await;

        assert_eq!(cache.loaded_models(), vec!["base".to_string(), "turbo".to_string()]);
        assert_eq!(loader.calls(), 3);
    }
}
