use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{Result, UploadError};
use crate::reassembler::CompletedFile;
use crate::registry::{ChunkProgress, ChunkSubmission};

/// Chunk payload as it arrives over JSON. Every field is optional here so a
/// missing one becomes a `MissingField` error instead of a generic parse failure.
#[derive(Serialize, Deserialize, Debug, Default, Clone)]
#[serde(rename_all = "camelCase")]
pub struct RawChunkRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_index: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_chunks: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    /// base64-encoded chunk bytes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk: Option<String>,
}

impl RawChunkRequest {
    /// validate required fields and decode the chunk payload
    pub fn into_submission(self) -> Result<ChunkSubmission> {
        let upload_id = require_text("uploadId", self.upload_id)?;
        let chunk_index = self.chunk_index.ok_or(UploadError::MissingField("chunkIndex"))?;
        let total_chunks = self.total_chunks.ok_or(UploadError::MissingField("totalChunks"))?;
        let filename = require_text("filename", self.filename)?;
        let encoded = self.chunk.ok_or(UploadError::MissingField("chunk"))?;

        let (chunk_index, total_chunks) = check_indices(chunk_index, total_chunks)?;
        let bytes = Bytes::from(STANDARD.decode(encoded.trim())?);

        Ok(ChunkSubmission {
            upload_id,
            chunk_index,
            total_chunks,
            filename,
            bytes,
        })
    }
}

/// Fields collected from a multipart chunk upload, before validation.
#[derive(Debug, Default)]
pub struct MultipartChunkFields {
    pub upload_id: Option<String>,
    pub chunk_index: Option<String>,
    pub total_chunks: Option<String>,
    pub filename: Option<String>,
    pub chunk: Option<Bytes>,
}

impl MultipartChunkFields {
    pub fn into_submission(self) -> Result<ChunkSubmission> {
        let upload_id = require_text("uploadId", self.upload_id)?;
        let chunk_index = parse_integer("chunkIndex", self.chunk_index)?;
        let total_chunks = parse_integer("totalChunks", self.total_chunks)?;
        let filename = require_text("filename", self.filename)?;
        let bytes = self.chunk.ok_or(UploadError::MissingField("chunk"))?;

        let (chunk_index, total_chunks) = check_indices(chunk_index, total_chunks)?;

        Ok(ChunkSubmission {
            upload_id,
            chunk_index,
            total_chunks,
            filename,
            bytes,
        })
    }
}

fn require_text(field: &'static str, value: Option<String>) -> Result<String> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(UploadError::MissingField(field)),
    }
}

fn parse_integer(field: &'static str, value: Option<String>) -> Result<i64> {
    let text = require_text(field, value)?;
    text.trim().parse().map_err(|e| UploadError::InvalidField {
        field,
        reason: format!("{} ({:?})", e, text),
    })
}

fn check_indices(chunk_index: i64, total_chunks: i64) -> Result<(usize, usize)> {
    if total_chunks <= 0 {
        return Err(UploadError::InvalidField {
            field: "totalChunks",
            reason: format!("must be greater than zero, got {}", total_chunks),
        });
    }
    if chunk_index < 0 {
        return Err(UploadError::InvalidField {
            field: "chunkIndex",
            reason: format!("must not be negative, got {}", chunk_index),
        });
    }
    let total = usize::try_from(total_chunks).map_err(|_| UploadError::InvalidField {
        field: "totalChunks",
        reason: format!("{} is too large", total_chunks),
    })?;
    let index = usize::try_from(chunk_index).map_err(|_| UploadError::InvalidField {
        field: "chunkIndex",
        reason: format!("{} is too large", chunk_index),
    })?;
    if index >= total {
        return Err(UploadError::ChunkIndexOutOfRange { index, total });
    }
    Ok((index, total))
}

// progress acknowledgement for a chunk that did not finish the upload
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChunkProgressResponse {
    pub success: bool,
    pub chunk_index: usize,
    pub received: usize,
    pub total: usize,
}

impl From<ChunkProgress> for ChunkProgressResponse {
    fn from(progress: ChunkProgress) -> Self {
        Self {
            success: true,
            chunk_index: progress.chunk_index,
            received: progress.received,
            total: progress.total_chunks,
        }
    }
}

// response for the chunk that completed an upload
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ChunkCompleteResponse {
    pub success: bool,
    pub filename: String,
    pub path: String,
    pub size: u64,
    pub sha256: String,
}

impl From<CompletedFile> for ChunkCompleteResponse {
    fn from(file: CompletedFile) -> Self {
        Self {
            success: true,
            filename: file.final_filename,
            path: file.path,
            size: file.size_bytes,
            sha256: file.sha256,
        }
    }
}

/// Body returned for every accepted chunk. Completion is tried first when
/// decoding since it has the stricter shape.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum ChunkUploadResponse {
    Complete(ChunkCompleteResponse),
    Progress(ChunkProgressResponse),
}

// response for aborting an upload
#[derive(Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct AbortResponse {
    pub success: bool,
    pub upload_id: String,
    pub discarded_chunks: usize,
}

// generic error response
#[derive(Serialize, Deserialize, Debug)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl From<&UploadError> for ErrorResponse {
    fn from(err: &UploadError) -> Self {
        Self {
            error: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}
