//! Uploading side of the chunk api.
//!
//! [`ChunkUploader`] splits a buffer into fixed-size chunks and posts them in
//! order. Every post goes through the circuit breaker, and inside it through
//! the retry executor, so transient failures are retried with backoff and a
//! server that keeps failing stops receiving requests for a while.

use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use thiserror::Error;
use uuid::Uuid;

use crate::breaker::{BreakerError, CircuitBreaker, CircuitBreakerConfig};
use crate::models::{ChunkCompleteResponse, ChunkUploadResponse, ErrorResponse, RawChunkRequest};
use crate::retry::{is_transient_status, with_retry, RetryError, RetryOptions, Transient};

pub const DEFAULT_CHUNK_SIZE: usize = 5 * 1024 * 1024;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Server rejected chunk ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Circuit breaker is open, chunk not sent")]
    CircuitOpen,

    #[error("Gave up on chunk {chunk_index} after {attempts} attempts: {last}")]
    RetriesExhausted {
        chunk_index: usize,
        attempts: u32,
        last: Box<ClientError>,
    },

    #[error("Server never confirmed completion of upload {0}")]
    Incomplete(String),
}

impl Transient for ClientError {
    fn is_transient(&self) -> bool {
        match self {
            ClientError::Network(e) => is_transient_status(e.status().map(|s| s.as_u16())),
            ClientError::Rejected { status, .. } => is_transient_status(Some(*status)),
            _ => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChunkUploader {
    http: reqwest::Client,
    endpoint: String,
    chunk_size: usize,
    retry: RetryOptions<ClientError>,
    breaker: Arc<CircuitBreaker>,
}

impl ChunkUploader {
    /// uploader for the server at `base_url`, e.g. `http://127.0.0.1:5000`
    pub fn new(base_url: &str) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            http,
            endpoint: format!("{}/api/upload/chunked", base_url.trim_end_matches('/')),
            chunk_size: DEFAULT_CHUNK_SIZE,
            retry: RetryOptions::default(),
            breaker: Arc::new(CircuitBreaker::new("chunk-upload", CircuitBreakerConfig::default())),
        })
    }

    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn retry_options(mut self, retry: RetryOptions<ClientError>) -> Self {
        self.retry = retry;
        self
    }

    /// share a breaker between uploaders talking to the same server
    pub fn breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.breaker = breaker;
        self
    }

    pub fn circuit(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// upload `data` under a fresh upload id
    pub async fn upload(&self, filename: &str, data: &[u8]) -> Result<ChunkCompleteResponse, ClientError> {
        let upload_id = Uuid::new_v4().to_string();
        self.upload_with_id(&upload_id, filename, data).await
    }

    pub async fn upload_with_id(
        &self,
        upload_id: &str,
        filename: &str,
        data: &[u8],
    ) -> Result<ChunkCompleteResponse, ClientError> {
        // an empty file still needs one (empty) chunk
        let chunks: Vec<&[u8]> = if data.is_empty() {
            vec![data]
        } else {
            data.chunks(self.chunk_size).collect()
        };
        let total_chunks = chunks.len();
        tracing::debug!("Uploading {} ({} bytes) as {} chunks", filename, data.len(), total_chunks);

        for (chunk_index, chunk) in chunks.into_iter().enumerate() {
            let body = RawChunkRequest {
                upload_id: Some(upload_id.to_string()),
                chunk_index: Some(chunk_index as i64),
                total_chunks: Some(total_chunks as i64),
                filename: Some(filename.to_string()),
                chunk: Some(STANDARD.encode(chunk)),
            };

            match self.send_with_recovery(&body, chunk_index).await? {
                ChunkUploadResponse::Complete(done) => {
                    tracing::info!("Upload {} completed as {}", upload_id, done.filename);
                    return Ok(done);
                }
                ChunkUploadResponse::Progress(progress) => {
                    tracing::trace!("Upload {}: {}/{} chunks acknowledged", upload_id, progress.received, progress.total);
                }
            }
        }

        Err(ClientError::Incomplete(upload_id.to_string()))
    }

    async fn send_with_recovery(
        &self,
        body: &RawChunkRequest,
        chunk_index: usize,
    ) -> Result<ChunkUploadResponse, ClientError> {
        let outcome = self
            .breaker
            .execute(|| with_retry(|| self.send_chunk(body), &self.retry))
            .await;

        match outcome {
            Ok(response) => Ok(response),
            Err(BreakerError::Open) => Err(ClientError::CircuitOpen),
            Err(BreakerError::Inner(RetryError::NotRetried(err))) => Err(err),
            Err(BreakerError::Inner(RetryError::Exhausted { attempts, last })) => Err(ClientError::RetriesExhausted {
                chunk_index,
                attempts,
                last: Box::new(last),
            }),
        }
    }

    async fn send_chunk(&self, body: &RawChunkRequest) -> Result<ChunkUploadResponse, ClientError> {
        let response = self.http.post(&self.endpoint).json(body).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }

        let message = match response.json::<ErrorResponse>().await {
            Ok(err) => err.message,
            Err(_) => status.canonical_reason().unwrap_or("unknown error").to_string(),
        };
        Err(ClientError::Rejected {
            status: status.as_u16(),
            message,
        })
    }
}
