use axum::{
    extract::{DefaultBodyLimit, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};

use crate::capture::{AudioBlock, VideoFrame};
use crate::config::{ArchiveConfig, Category};
use crate::constants::DATA_FILE_DOWNLOAD_NAME;
use crate::encode::{encode_media, EncodeOutcome};
use crate::error::{ArchiveError, ArchiveResult, ValidationError};
use crate::ingest::{record_upload, store_upload, UploadKind};
use crate::recorder::{
    record_submission, ContentPresence, SubmissionForm, SubmissionLog, SubmissionRecord,
};
use crate::session::SessionStore;
use crate::storage::StoragePaths;

// Shared state for the archive API handlers
pub struct AppState {
    pub paths: StoragePaths,
    pub log: SubmissionLog,
    pub sessions: SessionStore,
}

impl AppState {
    /// Resolve storage under `data_dir`, creating the content directories
    pub fn prepare(data_dir: impl AsRef<std::path::Path>) -> ArchiveResult<Self> {
        let paths = StoragePaths::prepare(data_dir)?;
        let log = SubmissionLog::new(paths.data_file.clone());
        Ok(Self {
            paths,
            log,
            sessions: SessionStore::new(),
        })
    }
}

impl IntoResponse for ArchiveError {
    fn into_response(self) -> Response {
        let status = match &self {
            ArchiveError::Validation(_) | ArchiveError::Encode(_) => StatusCode::BAD_REQUEST,
            ArchiveError::SessionNotFound(_) => StatusCode::NOT_FOUND,
            ArchiveError::CaptureNotStarted(_) => StatusCode::CONFLICT,
            ArchiveError::Io { .. }
            | ArchiveError::Csv(_)
            | ArchiveError::LogHeader { .. }
            | ArchiveError::Config(_)
            | ArchiveError::Worker(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!("Request failed: {}", self);
        }
        (
            status,
            Json(serde_json::json!({"error": self.to_string()})),
        )
            .into_response()
    }
}

/// Build the API router; `max_body_bytes` caps uploads and capture pushes
pub fn build_router(state: Arc<AppState>, max_body_bytes: usize) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/api/categories", get(categories_handler))
        .route("/api/sessions", post(create_session_handler))
        .route(
            "/api/sessions/{session_id}",
            get(session_handler).delete(end_session_handler),
        )
        .route(
            "/api/sessions/{session_id}/capture/start",
            post(start_capture_handler),
        )
        .route(
            "/api/sessions/{session_id}/capture/video",
            post(video_frame_handler),
        )
        .route(
            "/api/sessions/{session_id}/capture/audio",
            post(audio_block_handler),
        )
        .route(
            "/api/sessions/{session_id}/recording",
            post(save_recording_handler),
        )
        .route(
            "/api/sessions/{session_id}/uploads/{kind}",
            post(upload_handler),
        )
        .route(
            "/api/sessions/{session_id}/artifacts/{artifact}",
            get(artifact_handler),
        )
        .route("/api/sessions/{session_id}/submit", post(submit_handler))
        .route("/api/submissions.csv", get(download_log_handler))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(cors)
        .with_state(state)
}

/// Periodically drop sessions that have been idle for longer than `idle`
pub fn spawn_session_sweeper(state: Arc<AppState>, idle: Duration) -> tokio::task::JoinHandle<()> {
    let period = (idle / 2).clamp(Duration::from_millis(10), Duration::from_secs(60));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            let evicted = state.sessions.evict_idle(idle);
            if evicted > 0 {
                info!(
                    "Evicted {} idle session(s), {} still active",
                    evicted,
                    state.sessions.len()
                );
            }
        }
    })
}

/// Run blocking disk work off the async workers
async fn run_blocking<T, F>(task: F) -> ArchiveResult<T>
where
    F: FnOnce() -> ArchiveResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|e| ArchiveError::Worker(e.to_string()))?
}

/// Run the archive API server until the process is stopped
pub fn serve_archive(config: ArchiveConfig) -> Result<(), Box<dyn std::error::Error>> {
    let state = Arc::new(AppState::prepare(&config.data_dir)?);

    println!("Starting archive server");
    println!("Data directory: {}", config.data_dir.display());
    println!("Submission log: {}", state.log.path().display());
    println!(
        "Listening on: http://{}:{}",
        config.bind_address, config.api_port
    );
    println!("Endpoints:");
    println!("  GET  /health  - Health check");
    println!("  GET  /api/categories  - Submission categories");
    println!("  POST /api/sessions  - Start a session");
    println!("  POST /api/sessions/:id/capture/start  - Begin a capture session");
    println!("  POST /api/sessions/:id/capture/video  - Push a BGR24 frame");
    println!("  POST /api/sessions/:id/capture/audio  - Push an audio block");
    println!("  POST /api/sessions/:id/recording  - Save the recording");
    println!("  POST /api/sessions/:id/uploads/:kind  - Upload audio/video/image/text");
    println!("  GET  /api/sessions/:id/artifacts/:artifact  - Download last audio/video");
    println!("  POST /api/sessions/:id/submit  - Submit the entry");
    println!("  GET  /api/submissions.csv  - Download the full dataset");

    let idle = config.session_idle_timeout();
    let sweeper_state = state.clone();
    let app = build_router(state, config.max_upload_bytes());
    let addr = format!("{}:{}", config.bind_address, config.api_port);

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async move {
        let _sweeper = spawn_session_sweeper(sweeper_state, idle);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        info!("Archive server bound to {}", addr);
        axum::serve(listener, app).await
    })?;

    Ok(())
}

// Health check endpoint - returns 200 OK if server is running
async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn categories_handler() -> impl IntoResponse {
    Json(Category::ALL)
}

#[derive(Serialize)]
struct CreatedSession {
    session_id: String,
    user_id: String,
}

async fn create_session_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let (session_id, user_id) = state.sessions.create();
    info!("Session started for user {}", user_id);
    (
        StatusCode::CREATED,
        Json(CreatedSession {
            session_id,
            user_id,
        }),
    )
}

async fn session_handler(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ArchiveError> {
    let view = state
        .sessions
        .with_slot(&session_id, |slot| slot.session.view())?;
    Ok(Json(view))
}

async fn end_session_handler(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ArchiveError> {
    if !state.sessions.remove(&session_id) {
        return Err(ArchiveError::SessionNotFound(session_id));
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn start_capture_handler(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ArchiveError> {
    state.sessions.with_slot(&session_id, |slot| {
        slot.start_capture();
    })?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct VideoFrameQuery {
    width: u32,
    height: u32,
}

async fn video_frame_handler(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    Query(query): Query<VideoFrameQuery>,
    body: Bytes,
) -> Result<impl IntoResponse, ArchiveError> {
    let frame = VideoFrame::new(query.width, query.height, body.to_vec())?;
    let sink = state
        .sessions
        .with_slot(&session_id, |slot| slot.capture.as_ref().map(|c| c.sink()))?
        .ok_or_else(|| ArchiveError::CaptureNotStarted(session_id.clone()))?;
    sink.push_video_frame(frame);
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
enum SampleFormat {
    #[default]
    F32le,
    S16le,
}

fn default_channels() -> u16 {
    1
}

#[derive(Deserialize)]
struct AudioBlockQuery {
    #[serde(default = "default_channels")]
    channels: u16,
    #[serde(default)]
    format: SampleFormat,
}

async fn audio_block_handler(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    Query(query): Query<AudioBlockQuery>,
    body: Bytes,
) -> Result<impl IntoResponse, ArchiveError> {
    let block = match query.format {
        SampleFormat::F32le => AudioBlock::from_f32le(query.channels, &body)?,
        SampleFormat::S16le => AudioBlock::from_s16le(query.channels, &body)?,
    };
    let sink = state
        .sessions
        .with_slot(&session_id, |slot| slot.capture.as_ref().map(|c| c.sink()))?
        .ok_or_else(|| ArchiveError::CaptureNotStarted(session_id.clone()))?;
    sink.push_audio_block(block);
    Ok(StatusCode::NO_CONTENT)
}

async fn save_recording_handler(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ArchiveError> {
    // Drain under the session lock, encode outside it
    let media = state
        .sessions
        .with_slot(&session_id, |slot| slot.capture.as_ref().map(|c| c.drain()))?;
    let Some(media) = media else {
        info!("Save requested without a capture session, nothing to encode");
        return Ok(Json(EncodeOutcome::default()));
    };

    let worker_state = state.clone();
    let outcome = run_blocking(move || encode_media(&worker_state.paths, &media)).await?;

    state
        .sessions
        .with_slot(&session_id, |slot| outcome.apply_to(&mut slot.session))?;
    Ok(Json(outcome))
}

#[derive(Deserialize)]
struct UploadQuery {
    filename: String,
}

#[derive(Serialize)]
struct StoredUpload {
    kind: UploadKind,
    path: PathBuf,
    bytes: usize,
}

async fn upload_handler(
    State(state): State<Arc<AppState>>,
    Path((session_id, kind)): Path<(String, UploadKind)>,
    Query(query): Query<UploadQuery>,
    body: Bytes,
) -> Result<impl IntoResponse, ArchiveError> {
    // Fail fast on an unknown session, then copy outside the session lock
    state.sessions.with_slot(&session_id, |_| ())?;
    let worker_state = state.clone();
    let worker_body = body.clone();
    let path = run_blocking(move || {
        store_upload(&worker_state.paths, kind, &query.filename, &worker_body[..])
    })
    .await?;

    let recorded = path.clone();
    state
        .sessions
        .with_slot(&session_id, |slot| record_upload(&mut slot.session, kind, recorded))?;
    Ok((
        StatusCode::CREATED,
        Json(StoredUpload {
            kind,
            path,
            bytes: body.len(),
        }),
    ))
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
enum ArtifactKind {
    Audio,
    Video,
}

async fn artifact_handler(
    State(state): State<Arc<AppState>>,
    Path((session_id, artifact)): Path<(String, ArtifactKind)>,
) -> Result<Response, ArchiveError> {
    let path = state.sessions.with_slot(&session_id, |slot| match artifact {
        ArtifactKind::Audio => slot.session.last_audio_path().map(|p| p.to_path_buf()),
        ArtifactKind::Video => slot.session.last_video_path().map(|p| p.to_path_buf()),
    })?;
    let Some(path) = path else {
        return Ok((
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": "no artifact recorded yet"})),
        )
            .into_response());
    };

    let data = tokio::fs::read(&path)
        .await
        .map_err(|e| ArchiveError::io(&path, e))?;

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    let (content_type, download_name) = match (artifact, extension.as_str()) {
        (ArtifactKind::Audio, _) => ("audio/wav", "recorded_audio.wav"),
        (ArtifactKind::Video, "mp4") => ("video/mp4", "recorded_video.mp4"),
        (ArtifactKind::Video, _) => ("video/x-matroska", "recorded_video.mkv"),
    };

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", download_name),
            ),
        ],
        data,
    )
        .into_response())
}

#[derive(Deserialize)]
struct SubmitRequest {
    name: String,
    category: String,
    #[serde(default)]
    english_prompt: String,
    #[serde(default)]
    telugu_response: String,
}

async fn submit_handler(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    Json(request): Json<SubmitRequest>,
) -> Result<Json<SubmissionRecord>, ArchiveError> {
    let category: Category = request.category.parse().map_err(|e: ValidationError| {
        warn!("Rejected submission with category '{}'", request.category);
        ArchiveError::from(e)
    })?;
    let form = SubmissionForm {
        name: request.name,
        category,
        english_prompt: request.english_prompt,
        telugu_response: request.telugu_response,
    };

    // Snapshot under the lock, rewrite the log outside it
    let submitted = state
        .sessions
        .with_slot(&session_id, |slot| slot.session.clone())?;
    let presence = ContentPresence {
        image_uploaded: submitted.has_staged_image(),
        text_uploaded: submitted.has_staged_text(),
    };

    let worker_state = state.clone();
    let snapshot = submitted.clone();
    let record =
        run_blocking(move || record_submission(&worker_state.log, &snapshot, &form, presence))
            .await?;

    if let Err(e) = state
        .sessions
        .with_slot(&session_id, |slot| slot.session.clear_submitted(&submitted))
    {
        warn!("Submission saved but its session is gone: {}", e);
    }
    Ok(Json(record))
}

async fn download_log_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Response, ArchiveError> {
    match state.log.download()? {
        Some(bytes) => Ok((
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, "text/csv".to_string()),
                (
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"{}\"", DATA_FILE_DOWNLOAD_NAME),
                ),
            ],
            bytes,
        )
            .into_response()),
        None => Ok((
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": "no submissions yet"})),
        )
            .into_response()),
    }
}
