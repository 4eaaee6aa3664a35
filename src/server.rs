//! # HTTP Server
//!
//! Wires configuration, the model cache, middleware and routes into an
//! Actix-web server, and stops it gracefully on SIGINT/SIGTERM.
//!
//! ## Routes:
//! - `GET  /`                 status and current model
//! - `POST /transcribe/`      multipart upload → transcript (also without the trailing slash)
//! - `GET  /models`           cached, current and known models
//! - `GET  /health`           health summary (also under `/api/v1`)
//! - `GET  /api/v1/metrics`   per-endpoint request metrics
//!
//! ## Key Rust Concepts Used:
//! - **static AtomicBool**: a process-wide shutdown flag any task can set
//! - **tokio::select!**: race the server against the shutdown signal
//! - **move closures**: `HttpServer::new` builds one `App` per worker thread

use crate::config::AppConfig;
use crate::state::AppState;
use crate::transcription::{ModelCache, WhisperLoader};
use crate::{handlers, health, middleware};
use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Result;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info};
use tracing_actix_web::TracingLogger;

/// Global shutdown signal, set by the signal handler task.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

/// Register every route on `cfg`. Shared by [`run`] and handler tests.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/", web::get().to(health::root))
        .route("/transcribe/", web::post().to(handlers::transcribe))
        .route("/transcribe", web::post().to(handlers::transcribe))
        .route("/models", web::get().to(health::list_models))
        .route("/health", web::get().to(health::health_check))
        .service(
            web::scope("/api/v1")
                .route("/health", web::get().to(health::health_check))
                .route("/metrics", web::get().to(health::detailed_metrics)),
        );
}

/// The model cache the server uses in production: Whisper through Candle.
pub fn whisper_cache(config: &AppConfig) -> Arc<ModelCache> {
    let loader = WhisperLoader {
        device: config.models.device,
        cache_dir: config.models.cache_dir.as_ref().map(PathBuf::from),
        language: config.models.language.clone(),
    };
    Arc::new(ModelCache::new(Arc::new(loader)))
}

/// Run the HTTP server until it fails or a shutdown signal arrives.
///
/// ## What this function does:
/// 1. **Creates shared application state** around a fresh model cache
/// 2. **Preloads** configured models (failures are logged, not fatal)
/// 3. **Configures the HTTP server** with middleware and routes
/// 4. **Handles graceful shutdown** when receiving system signals
pub async fn run(config: AppConfig) -> Result<()> {
    let models = whisper_cache(&config);
    let app_state = AppState::new(config.clone(), models.clone());
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    if !config.models.preload.is_empty() {
        info!(models = ?config.models.preload, "Preloading models");
        models.preload(&config.models.preload).await;
    }

    setup_signal_handlers();

    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        // Middleware executes in reverse order of registration for requests
        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(cors)
            .wrap(TracingLogger::default())
            .wrap(middleware::MetricsMiddleware)
            .wrap(middleware::RequestLogging)
            .configure(configure)
    })
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(Err(e)) => error!("Server error: {}", e),
                Err(e) => error!("Server task error: {}", e),
                Ok(Ok(())) => {}
            }
        }
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;
        }
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// Listen for SIGTERM and SIGINT and raise the shutdown flag on the first one.
fn setup_signal_handlers() {
    tokio::spawn(async {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};

            let (mut sigterm, mut sigint) =
                match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                    (Ok(term), Ok(int)) => (term, int),
                    (Err(e), _) | (_, Err(e)) => {
                        error!("Failed to install signal handlers: {}", e);
                        return;
                    }
                };

            tokio::select! {
                _ = sigterm.recv() => info!("Received SIGTERM"),
                _ = sigint.recv() => info!("Received SIGINT"),
            }
        }

        #[cfg(not(unix))]
        {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for Ctrl+C: {}", e);
                return;
            }
            info!("Received Ctrl+C");
        }

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

/// Poll the shutdown flag every 100ms.
async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcription::testing::FakeLoader;
    use actix_web::http::StatusCode;
    use actix_web::test;

    #[actix_web::test]
    async fn test_full_middleware_stack() {
        let state = AppState::new(
            AppConfig::default(),
            Arc::new(ModelCache::new(Arc::new(FakeLoader::new()))),
        );
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .wrap(TracingLogger::default())
                .wrap(middleware::MetricsMiddleware)
                .wrap(middleware::RequestLogging)
                .configure(configure),
        )
        .await;

        let response = test::call_service(&app, test::TestRequest::get().uri("/").to_request()).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));

        // GET on the upload route is not allowed
        let response =
            test::call_service(&app, test::TestRequest::get().uri("/transcribe/").to_request()).await;
        assert!(response.status().is_client_error());

        let metrics = state.get_metrics_snapshot();
        assert_eq!(metrics.request_count, 2);
        assert_eq!(metrics.error_count, 1);
    }

    #[actix_web::test]
    async fn test_whisper_cache_starts_empty() {
        let cache = whisper_cache(&AppConfig::default());
        assert!(cache.is_empty());
        assert_eq!(cache.current_model(), None);
    }
}
