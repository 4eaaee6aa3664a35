//! Upload-and-transcribe endpoint.

use crate::error::{AppError, AppResult};
use crate::state::AppState;
use crate::transcription::{Task, TranscribeOptions};
use actix_multipart::{Field, Multipart};
use actix_web::{web, HttpResponse};
use futures_util::stream::StreamExt;
use std::io::Write;
use std::path::Path;
use std::time::Instant;
use tempfile::NamedTempFile;
use tracing::info;

/// Text fields are short; anything bigger is not a prompt.
const MAX_TEXT_FIELD_BYTES: usize = 64 * 1024;

/// An uploaded audio file, streamed to disk.
///
/// The temp file is deleted when this value is dropped, so every exit path
/// (success, model failure, `?` on a bad form) cleans up after itself.
struct UploadedAudio {
    file: NamedTempFile,
    filename: String,
    size: usize,
}

#[derive(Default)]
struct TranscribeForm {
    audio: Option<UploadedAudio>,
    initial_prompt: Option<String>,
    task: Option<String>,
    model_name: Option<String>,
}

/// Transcribe an uploaded audio file.
///
/// ## Endpoint: `POST /transcribe/`
///
/// ## Request:
/// Multipart form data:
/// - `audio` (file, required): any format ffmpeg understands
/// - `initial_prompt` (text, optional): vocabulary or style hint
/// - `task` (text, optional): `transcribe` (default) or `translate`
/// - `model_name` (text, optional): defaults to `models.default_model`
///
/// ## Response:
/// ```json
/// {
///   "text": " Hello, this is a test.",
///   "segments": [{"start": 0.0, "end": 2.4, "text": " Hello, this is a test."}]
/// }
/// ```
///
/// A model that fails to load answers 500 with `{"error": "failed to load model ..."}`.
pub async fn transcribe(
    state: web::Data<AppState>,
    mut payload: Multipart,
) -> AppResult<HttpResponse> {
    let start = Instant::now();
    let upload = &state.config.upload;
    let form = read_form(&mut payload, upload.max_file_size_bytes(), upload.temp_dir.as_deref()).await?;

    let audio = form.audio.ok_or_else(|| {
        AppError::BadRequest("No audio file provided (expected form field 'audio')".to_string())
    })?;

    let task = match form.task.as_deref().map(str::trim) {
        Some(task) if !task.is_empty() => task.parse::<Task>().map_err(AppError::BadRequest)?,
        _ => Task::default(),
    };
    let options = TranscribeOptions::new(form.initial_prompt, task);
    let model = form
        .model_name
        .map(|m| m.trim().to_string())
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| state.config.models.default_model.clone());

    info!(
        model = %model,
        task = %options.task,
        filename = %audio.filename,
        bytes = audio.size,
        has_prompt = options.initial_prompt.is_some(),
        "Transcription requested"
    );

    let backend = state.models.resolve(&model).await?;
    let activity = state.track_transcription();

    let UploadedAudio { file, .. } = audio;
    let result = web::block(move || {
        let result = backend.transcribe(file.path(), &options);
        drop(file);
        result
    })
    .await??;
    activity.complete();

    info!(
        model = %model,
        segments = result.segments.len(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Transcription finished"
    );

    Ok(HttpResponse::Ok().json(result))
}

async fn read_form(
    payload: &mut Multipart,
    max_audio_bytes: usize,
    temp_dir: Option<&str>,
) -> AppResult<TranscribeForm> {
    let mut form = TranscribeForm::default();

    while let Some(item) = payload.next().await {
        let mut field: Field = item?;
        let name = field
            .content_disposition()
            .and_then(|cd| cd.get_name())
            .map(str::to_string)
            .unwrap_or_default();

        match name.as_str() {
            "audio" => {
                let filename = field
                    .content_disposition()
                    .and_then(|cd| cd.get_filename())
                    .unwrap_or("audio")
                    .to_string();
                form.audio = Some(save_upload(&mut field, filename, max_audio_bytes, temp_dir).await?);
            }
            "initial_prompt" => form.initial_prompt = Some(read_text(&mut field, &name).await?),
            "task" => form.task = Some(read_text(&mut field, &name).await?),
            "model_name" => form.model_name = Some(read_text(&mut field, &name).await?),
            _ => {
                // Unknown field, skip its content
                while let Some(chunk) = field.next().await {
                    chunk?;
                }
            }
        }
    }

    Ok(form)
}

async fn save_upload(
    field: &mut Field,
    filename: String,
    max_bytes: usize,
    temp_dir: Option<&str>,
) -> AppResult<UploadedAudio> {
    // Keep the extension so the decoder can tell the container apart
    let suffix = Path::new(&filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e))
        .unwrap_or_default();

    let mut builder = tempfile::Builder::new();
    builder.prefix("whisper-upload-").suffix(&suffix);
    let mut file = match temp_dir {
        Some(dir) => builder.tempfile_in(dir)?,
        None => builder.tempfile()?,
    };

    let mut size = 0;
    while let Some(chunk) = field.next().await {
        let chunk = chunk?;
        size += chunk.len();
        if size > max_bytes {
            return Err(AppError::PayloadTooLarge(format!(
                "audio exceeds {} MB limit",
                max_bytes / (1024 * 1024)
            )));
        }
        file.write_all(&chunk)?;
    }
    file.flush()?;

    Ok(UploadedAudio {
        file,
        filename,
        size,
    })
}

async fn read_text(field: &mut Field, name: &str) -> AppResult<String> {
    let mut bytes = Vec::new();
    while let Some(chunk) = field.next().await {
        let chunk = chunk?;
        if bytes.len() + chunk.len() > MAX_TEXT_FIELD_BYTES {
            return Err(AppError::BadRequest(format!("Field '{}' is too long", name)));
        }
        bytes.extend_from_slice(&chunk);
    }
    String::from_utf8(bytes)
        .map_err(|_| AppError::BadRequest(format!("Field '{}' is not valid UTF-8", name)))
}
