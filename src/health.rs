use crate::state::AppState;
use crate::transcription::model::KNOWN_MODELS;
use actix_web::{web, HttpResponse};
use serde_json::json;
use std::process;

/// `GET /` liveness probe, also reporting the most recently requested model.
pub async fn root(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "status": "ok",
        "current_model": state.models.current_model()
    }))
}

pub async fn list_models(state: web::Data<AppState>) -> HttpResponse {
    let status = state.models.status();

    HttpResponse::Ok().json(json!({
        "default_model": state.config.models.default_model,
        "current_model": status.current_model,
        "last_loaded": status.last_loaded,
        "loaded_models": status.loaded_models,
        "known_models": KNOWN_MODELS,
        "device": state.config.models.device
    }))
}

pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let config = state.config();
    let models = state.models.status();

    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": state.get_uptime_seconds(),
        "service": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "host": config.server.host,
            "port": config.server.port
        },
        "metrics": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "error_rate": if metrics.request_count > 0 {
                metrics.error_count as f64 / metrics.request_count as f64
            } else {
                0.0
            },
            "active_transcriptions": metrics.active_transcriptions,
            "completed_transcriptions": metrics.completed_transcriptions
        },
        "memory": get_memory_info(),
        "models": {
            "default": config.models.default_model,
            "current": models.current_model,
            "last_loaded": models.last_loaded,
            "loaded": models.loaded_models,
            "device": config.models.device
        }
    }))
}

pub async fn detailed_metrics(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let uptime_seconds = state.get_uptime_seconds();

    let mut endpoint_stats: Vec<_> = metrics.endpoint_metrics.iter().collect();
    endpoint_stats.sort_by(|a, b| a.0.cmp(b.0));
    let endpoint_stats: Vec<_> = endpoint_stats
        .into_iter()
        .map(|(endpoint, metric)| {
            json!({
                "endpoint": endpoint,
                "request_count": metric.request_count,
                "error_count": metric.error_count,
                "error_rate": metric.error_rate(),
                "average_duration_ms": metric.average_duration_ms(),
                "total_duration_ms": metric.total_duration_ms
            })
        })
        .collect();

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "overall": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "error_rate": if metrics.request_count > 0 {
                metrics.error_count as f64 / metrics.request_count as f64
            } else {
                0.0
            },
            "active_transcriptions": metrics.active_transcriptions,
            "completed_transcriptions": metrics.completed_transcriptions,
            "requests_per_second": if uptime_seconds > 0 {
                metrics.request_count as f64 / uptime_seconds as f64
            } else {
                0.0
            }
        },
        "endpoints": endpoint_stats,
        "memory": get_memory_info(),
        "models": {
            "loaded": state.models.len(),
            "max_upload_mb": state.config.upload.max_file_size_mb
        }
    }))
}

fn get_memory_info() -> serde_json::Value {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string(format!("/proc/{}/status", process::id())) {
            let read_kb = |key: &str| {
                status
                    .lines()
                    .find(|line| line.starts_with(key))
                    .and_then(|line| line.split_whitespace().nth(1))
                    .and_then(|kb| kb.parse::<u64>().ok())
                    .unwrap_or(0)
                    * 1024
            };

            return json!({
                "resident_memory_bytes": read_kb("VmRSS:"),
                "virtual_memory_bytes": read_kb("VmSize:"),
                "available": true
            });
        }
    }

    json!({
        "resident_memory_bytes": 0,
        "virtual_memory_bytes": 0,
        "available": false,
        "pid": process::id()
    })
}

#[cfg(test)]
mod tests {
    use crate::config::AppConfig;
    use crate::state::AppState;
    use crate::transcription::testing::FakeLoader;
    use crate::transcription::ModelCache;
    use actix_web::{test, web, App};
    use std::sync::Arc;

    fn state() -> AppState {
        AppState::new(
            AppConfig::default(),
            Arc::new(ModelCache::new(Arc::new(FakeLoader::failing(&["huge"])))),
        )
    }

    #[actix_web::test]
    async fn test_root_reports_current_model() {
        let state = state();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .configure(crate::server::configure),
        )
        .await;

        let body: serde_json::Value =
            test::call_and_read_body_json(&app, test::TestRequest::get().uri("/").to_request()).await;
        assert_eq!(body["status"], "ok");
        assert!(body["current_model"].is_null());

        state.models.resolve("base").await.unwrap();
        let _ = state.models.resolve("huge").await;

        let body: serde_json::Value =
            test::call_and_read_body_json(&app, test::TestRequest::get().uri("/").to_request()).await;
        assert_eq!(body["current_model"], "huge");

        let body: serde_json::Value =
            test::call_and_read_body_json(&app, test::TestRequest::get().uri("/models").to_request())
                .await;
        assert_eq!(body["last_loaded"], "base");
        assert_eq!(body["loaded_models"], serde_json::json!(["base"]));
        assert_eq!(body["default_model"], "turbo");
    }

    #[actix_web::test]
    async fn test_health_endpoints() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state()))
                .configure(crate::server::configure),
        )
        .await;

        for uri in ["/health", "/api/v1/health"] {
            let body: serde_json::Value =
                test::call_and_read_body_json(&app, test::TestRequest::get().uri(uri).to_request())
                    .await;
            assert_eq!(body["status"], "healthy");
            assert_eq!(body["service"]["name"], "whisper-scribe");
        }

        let body: serde_json::Value = test::call_and_read_body_json(
            &app,
            test::TestRequest::get().uri("/api/v1/metrics").to_request(),
        )
        .await;
        assert!(body["endpoints"].is_array());
    }
}
