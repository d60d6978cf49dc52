use axum::extract::multipart::MultipartError;
use axum::http::StatusCode;
use thiserror::Error;

/// everything that can go wrong while accepting or assembling a chunk
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Invalid value for {field}: {reason}")]
    InvalidField {
        field: &'static str,
        reason: String,
    },

    #[error("Chunk index {index} is out of range for an upload of {total} chunks")]
    ChunkIndexOutOfRange { index: usize, total: usize },

    #[error("Upload {upload_id} was started with {expected} chunks but this chunk declares {declared}")]
    TotalChunksMismatch {
        upload_id: String,
        expected: usize,
        declared: usize,
    },

    #[error("Chunk payload is not valid base64: {0}")]
    InvalidChunkEncoding(#[from] base64::DecodeError),

    #[error("Malformed request body: {0}")]
    MalformedBody(String),

    #[error("Failed to read multipart body: {0}")]
    Multipart(#[from] MultipartError),

    #[error("Upload ID not found: {0}")]
    UnknownUpload(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl UploadError {
    /// http status this error maps to at the api boundary
    pub fn status_code(&self) -> StatusCode {
        match self {
            UploadError::MissingField(_)
            | UploadError::InvalidField { .. }
            | UploadError::ChunkIndexOutOfRange { .. }
            | UploadError::TotalChunksMismatch { .. }
            | UploadError::InvalidChunkEncoding(_)
            | UploadError::MalformedBody(_)
            | UploadError::Multipart(_) => StatusCode::BAD_REQUEST,
            UploadError::UnknownUpload(_) => StatusCode::NOT_FOUND,
            UploadError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// short machine-readable tag for the `error` field of error bodies
    pub fn kind(&self) -> &'static str {
        match self {
            UploadError::MissingField(_) => "missing_field",
            UploadError::InvalidField { .. } => "invalid_field",
            UploadError::ChunkIndexOutOfRange { .. } => "chunk_index_out_of_range",
            UploadError::TotalChunksMismatch { .. } => "total_chunks_mismatch",
            UploadError::InvalidChunkEncoding(_) => "invalid_chunk_encoding",
            UploadError::MalformedBody(_) => "malformed_body",
            UploadError::Multipart(_) => "invalid_multipart",
            UploadError::UnknownUpload(_) => "unknown_upload",
            UploadError::Io(_) => "io_error",
        }
    }
}

pub type Result<T> = std::result::Result<T, UploadError>;
