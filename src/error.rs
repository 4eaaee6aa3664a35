//! # Error Handling
//!
//! This module defines the errors the HTTP layer can return and how they become
//! JSON responses.
//!
//! ## Key Rust Concepts for Error Handling:
//!
//! ### Result<T, E> Type
//! - **Purpose**: Forces you to handle both success and failure cases
//! - **No exceptions**: Rust doesn't have try/catch, it uses Result instead
//!
//! ### Traits for Error Conversion
//! - **From trait**: lets `?` turn a backend or cache error into an `AppError`
//! - **ResponseError trait**: Converts errors to HTTP responses
//! - **Display trait**: Defines how errors are formatted as strings
//!
//! ## Response Body:
//! Every error answers with a flat JSON object whose `error` field is a
//! human-readable string, so a client only needs `body["error"]`:
//! ```json
//! {
//!   "error": "failed to load model 'huge': unknown model 'huge'",
//!   "type": "model_unavailable",
//!   "timestamp": "2025-01-01T12:00:00Z"
//! }
//! ```

use crate::transcription::{BackendError, ResolveError};
use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

/// Errors returned by HTTP handlers.
///
/// ## Error Categories:
/// - **BadRequest**: malformed form, missing audio, unknown task (400)
/// - **PayloadTooLarge**: upload over the configured limit (413)
/// - **AudioDecode**: the upload is not audio we can read (422)
/// - **ModelUnavailable**: the requested model could not be loaded (500)
/// - **Transcription**: the model failed mid-inference (500)
/// - **Internal**: anything else on our side (500)
#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    PayloadTooLarge(String),
    AudioDecode(String),
    ModelUnavailable { model: String, cause: String },
    Transcription(String),
    Internal(String),
}

impl AppError {
    /// Machine-readable tag sent as the `type` field.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::BadRequest(_) => "bad_request",
            AppError::PayloadTooLarge(_) => "payload_too_large",
            AppError::AudioDecode(_) => "audio_decode_error",
            AppError::ModelUnavailable { .. } => "model_unavailable",
            AppError::Transcription(_) => "transcription_error",
            AppError::Internal(_) => "internal_error",
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::PayloadTooLarge(msg) => write!(f, "Payload too large: {}", msg),
            AppError::AudioDecode(msg) => write!(f, "Could not decode audio: {}", msg),
            AppError::ModelUnavailable { model, cause } => {
                write!(f, "failed to load model '{}': {}", model, cause)
            }
            AppError::Transcription(msg) => write!(f, "Transcription failed: {}", msg),
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::AudioDecode(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::ModelUnavailable { .. }
            | AppError::Transcription(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let mut body = json!({
            "error": self.to_string(),
            "type": self.kind(),
            "timestamp": chrono::Utc::now().to_rfc3339()
        });
        if let AppError::ModelUnavailable { model, .. } = self {
            body["model"] = json!(model);
        }

        HttpResponse::build(self.status_code()).json(body)
    }
}

impl From<ResolveError> for AppError {
    fn from(err: ResolveError) -> Self {
        AppError::ModelUnavailable {
            model: err.model,
            cause: err.cause,
        }
    }
}

/// Decode problems are the client's audio; everything else is ours.
impl From<BackendError> for AppError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Decode(msg) => AppError::AudioDecode(msg),
            BackendError::Inference(msg) => AppError::Transcription(msg),
            BackendError::Io(e) => AppError::Internal(format!("I/O error: {}", e)),
        }
    }
}

impl From<actix_multipart::MultipartError> for AppError {
    fn from(err: actix_multipart::MultipartError) -> Self {
        AppError::BadRequest(format!("Multipart error: {}", err))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal(format!("I/O error: {}", err))
    }
}

impl From<actix_web::error::BlockingError> for AppError {
    fn from(err: actix_web::error::BlockingError) -> Self {
        AppError::Internal(format!("worker thread failed: {}", err))
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// Shorthand for `Result<T, AppError>`.
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::body::to_bytes;

    async fn body_json(err: AppError) -> (StatusCode, serde_json::Value) {
        let response = err.error_response();
        let status = response.status();
        let bytes = to_bytes(response.into_body()).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[actix_web::test]
    async fn test_model_failure_body() {
        let err = AppError::from(ResolveError {
            model: "huge".to_string(),
            cause: "no weights".to_string(),
        });
        let (status, body) = body_json(err).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "failed to load model 'huge': no weights");
        assert_eq!(body["type"], "model_unavailable");
        assert_eq!(body["model"], "huge");
    }

    #[actix_web::test]
    async fn test_backend_errors_map_to_statuses() {
        let (status, body) = body_json(BackendError::Decode("bad header".into()).into()).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["error"].as_str().unwrap().contains("bad header"));

        let (status, _) = body_json(BackendError::Inference("nan".into()).into()).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);

        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        let (status, body) = body_json(BackendError::Io(io).into()).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["type"], "internal_error");
    }

    #[test]
    fn test_client_errors() {
        assert_eq!(AppError::BadRequest("x".into()).status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            AppError::PayloadTooLarge("x".into()).status_code(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
    }
}
