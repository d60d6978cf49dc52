use axum::{
    extract::{rejection::JsonRejection, Multipart, Path, State},
    http::StatusCode,
    response::Json,
    Extension,
};
use std::sync::Arc;

use crate::error::UploadError;
use crate::middleware::LargeUpload;
use crate::models::{
    AbortResponse, ChunkCompleteResponse, ChunkProgressResponse, ChunkUploadResponse, ErrorResponse,
    MultipartChunkFields, RawChunkRequest,
};
use crate::reassembler::SubmitOutcome;
use crate::registry::{ChunkSubmission, UploadProgress};
use crate::state::AppState;

pub type ApiError = (StatusCode, Json<ErrorResponse>);

// log an upload error and turn it into a json error response
fn reject(err: UploadError) -> ApiError {
    let status = err.status_code();
    if status.is_server_error() {
        tracing::error!("Chunk upload failed: {}", err);
    } else {
        tracing::warn!("Rejected chunk upload request: {}", err);
    }
    (status, Json(ErrorResponse::from(&err)))
}

async fn submit(
    state: &AppState,
    submission: ChunkSubmission,
    large: Option<Extension<LargeUpload>>,
) -> Result<Json<ChunkUploadResponse>, ApiError> {
    if let Some(Extension(LargeUpload { content_length })) = large {
        tracing::warn!(
            "Chunk {} of upload {} arrived in a {} byte request, above the chunked upload threshold",
            submission.chunk_index,
            submission.upload_id,
            content_length
        );
    }

    let outcome = state.reassembler.submit_chunk(submission).await.map_err(reject)?;
    Ok(Json(match outcome {
        SubmitOutcome::Progress(progress) => ChunkUploadResponse::Progress(ChunkProgressResponse::from(progress)),
        SubmitOutcome::Completed(file) => ChunkUploadResponse::Complete(ChunkCompleteResponse::from(file)),
    }))
}

// accept one base64-encoded chunk as json
pub async fn upload_chunk(
    State(state): State<Arc<AppState>>,
    large: Option<Extension<LargeUpload>>,
    payload: Result<Json<RawChunkRequest>, JsonRejection>,
) -> Result<Json<ChunkUploadResponse>, ApiError> {
    let Json(payload) = payload.map_err(|e| reject(UploadError::MalformedBody(e.body_text())))?;
    let submission = payload.into_submission().map_err(reject)?;
    submit(&state, submission, large).await
}

// accept one chunk as multipart form data, the chunk itself as a binary part
pub async fn upload_chunk_form(
    State(state): State<Arc<AppState>>,
    large: Option<Extension<LargeUpload>>,
    mut multipart: Multipart,
) -> Result<Json<ChunkUploadResponse>, ApiError> {
    let mut fields = MultipartChunkFields::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| reject(e.into()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        tracing::trace!("Reading multipart field: {}", name);
        match name.as_str() {
            "chunk" => fields.chunk = Some(field.bytes().await.map_err(|e| reject(e.into()))?),
            "uploadId" => fields.upload_id = Some(field.text().await.map_err(|e| reject(e.into()))?),
            "chunkIndex" => fields.chunk_index = Some(field.text().await.map_err(|e| reject(e.into()))?),
            "totalChunks" => fields.total_chunks = Some(field.text().await.map_err(|e| reject(e.into()))?),
            "filename" => fields.filename = Some(field.text().await.map_err(|e| reject(e.into()))?),
            other => tracing::debug!("Ignoring unexpected multipart field: {}", other),
        }
    }

    let submission = fields.into_submission().map_err(reject)?;
    submit(&state, submission, large).await
}

// progress of an upload still in flight
pub async fn upload_status(
    State(state): State<Arc<AppState>>,
    Path(upload_id): Path<String>,
) -> Result<Json<UploadProgress>, ApiError> {
    tracing::trace!("Status lookup for upload {}", upload_id);
    match state.status_batcher.add(upload_id.clone()).await {
        Ok(Some(progress)) => Ok(Json(progress)),
        Ok(None) => Err(reject(UploadError::UnknownUpload(upload_id))),
        Err(e) => {
            tracing::error!("Status lookup for {} failed: {}", upload_id, e);
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: "status_unavailable".to_string(),
                    message: e.to_string(),
                }),
            ))
        }
    }
}

// discard an upload and everything buffered for it
pub async fn abort_upload(
    State(state): State<Arc<AppState>>,
    Path(upload_id): Path<String>,
) -> Result<Json<AbortResponse>, ApiError> {
    let session = state
        .registry
        .abort(&upload_id)
        .ok_or_else(|| reject(UploadError::UnknownUpload(upload_id.clone())))?;

    tracing::info!(
        "🗑️  Aborted upload {} ({} of {} chunks, {} bytes discarded)",
        upload_id,
        session.received_count(),
        session.total_chunks,
        session.buffered_bytes()
    );

    Ok(Json(AbortResponse {
        success: true,
        upload_id,
        discarded_chunks: session.received_count(),
    }))
}

// health check endpoint
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "tango-uploads",
        "activeUploads": state.registry.len(),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}
