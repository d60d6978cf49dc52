use std::collections::BTreeMap;
use std::time::Duration;

use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use tokio::time::Instant;

use crate::error::{Result, UploadError};

/// a validated chunk, ready to enter the registry
#[derive(Debug, Clone)]
pub struct ChunkSubmission {
    pub upload_id: String,
    pub chunk_index: usize,
    pub total_chunks: usize,
    pub filename: String,
    pub bytes: Bytes,
}

/// upper bound on `totalChunks` unless configured otherwise
pub const DEFAULT_MAX_TOTAL_CHUNKS: usize = 10_000;

/// one in-progress chunked upload
#[derive(Debug)]
pub struct UploadSession {
    pub upload_id: String,
    pub filename: String,
    pub total_chunks: usize,
    /// received chunks by index; memory grows with what arrived, not with the declared total
    pub chunks: BTreeMap<usize, Bytes>,
    pub started_at: Instant,
}

impl UploadSession {
    fn new(upload_id: String, filename: String, total_chunks: usize) -> Self {
        Self {
            upload_id,
            filename,
            total_chunks,
            chunks: BTreeMap::new(),
            started_at: Instant::now(),
        }
    }

    fn store(&mut self, chunk_index: usize, bytes: Bytes) {
        self.chunks.insert(chunk_index, bytes);
    }

    pub fn received_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_complete(&self) -> bool {
        self.chunks.len() == self.total_chunks
    }

    /// total bytes currently buffered for this upload
    pub fn buffered_bytes(&self) -> usize {
        self.chunks.values().map(Bytes::len).sum()
    }

    fn progress(&self) -> UploadProgress {
        UploadProgress {
            upload_id: self.upload_id.clone(),
            filename: self.filename.clone(),
            received: self.chunks.len(),
            total_chunks: self.total_chunks,
            missing: (0..self.total_chunks)
                .filter(|i| !self.chunks.contains_key(i))
                .collect(),
            age_secs: self.started_at.elapsed().as_secs(),
        }
    }
}

/// acknowledgement for a chunk that did not finish its upload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkProgress {
    pub chunk_index: usize,
    pub received: usize,
    pub total_chunks: usize,
}

/// status of an upload still waiting for chunks
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadProgress {
    pub upload_id: String,
    pub filename: String,
    pub received: usize,
    pub total_chunks: usize,
    pub missing: Vec<usize>,
    pub age_secs: u64,
}

#[derive(Debug)]
pub enum ChunkStored {
    Pending(ChunkProgress),
    /// every chunk is present; the session has already left the registry
    Complete(UploadSession),
}

/// In-memory table of uploads in flight, keyed by the client's upload id.
///
/// Sessions leave the table exactly once: when their last chunk arrives, when
/// the reaper finds them stale, or when they are aborted.
#[derive(Debug)]
pub struct ChunkRegistry {
    sessions: DashMap<String, UploadSession>,
    max_total_chunks: usize,
}

impl Default for ChunkRegistry {
    fn default() -> Self {
        Self::with_max_total_chunks(DEFAULT_MAX_TOTAL_CHUNKS)
    }
}

impl ChunkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// registry rejecting uploads that declare more than `max_total_chunks` chunks
    pub fn with_max_total_chunks(max_total_chunks: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            max_total_chunks: max_total_chunks.max(1),
        }
    }

    pub fn max_total_chunks(&self) -> usize {
        self.max_total_chunks
    }

    /// Store a chunk, creating the session on first sight of its id.
    ///
    /// The lookup, the write and the completeness check all happen under the
    /// entry's shard lock, so only one caller can ever observe completion.
    pub fn store_chunk(&self, submission: ChunkSubmission) -> Result<ChunkStored> {
        let ChunkSubmission {
            upload_id,
            chunk_index,
            total_chunks,
            filename,
            bytes,
        } = submission;

        if total_chunks == 0 {
            return Err(UploadError::InvalidField {
                field: "totalChunks",
                reason: "must be greater than zero".to_string(),
            });
        }
        if total_chunks > self.max_total_chunks {
            return Err(UploadError::InvalidField {
                field: "totalChunks",
                reason: format!("must be at most {}, got {}", self.max_total_chunks, total_chunks),
            });
        }
        if chunk_index >= total_chunks {
            return Err(UploadError::ChunkIndexOutOfRange {
                index: chunk_index,
                total: total_chunks,
            });
        }

        match self.sessions.entry(upload_id) {
            Entry::Occupied(mut occupied) => {
                let session = occupied.get_mut();
                if session.total_chunks != total_chunks {
                    return Err(UploadError::TotalChunksMismatch {
                        upload_id: session.upload_id.clone(),
                        expected: session.total_chunks,
                        declared: total_chunks,
                    });
                }
                if session.chunks.contains_key(&chunk_index) {
                    tracing::debug!(upload_id = %session.upload_id, chunk_index, "Chunk re-sent, overwriting");
                }
                session.store(chunk_index, bytes);

                if session.is_complete() {
                    Ok(ChunkStored::Complete(occupied.remove()))
                } else {
                    Ok(ChunkStored::Pending(ChunkProgress {
                        chunk_index,
                        received: session.received_count(),
                        total_chunks,
                    }))
                }
            }
            Entry::Vacant(vacant) => {
                let mut session = UploadSession::new(vacant.key().clone(), filename, total_chunks);
                tracing::debug!(upload_id = %session.upload_id, total_chunks, "Started chunked upload");
                session.store(chunk_index, bytes);

                if session.is_complete() {
                    Ok(ChunkStored::Complete(session))
                } else {
                    let progress = ChunkProgress {
                        chunk_index,
                        received: session.received_count(),
                        total_chunks,
                    };
                    vacant.insert(session);
                    Ok(ChunkStored::Pending(progress))
                }
            }
        }
    }

    /// drop an upload and its buffered chunks right away
    pub fn abort(&self, upload_id: &str) -> Option<UploadSession> {
        self.sessions.remove(upload_id).map(|(_, session)| session)
    }

    pub fn progress(&self, upload_id: &str) -> Option<UploadProgress> {
        self.sessions.get(upload_id).map(|session| session.progress())
    }

    /// progress for many ids at once, positionally matched to `upload_ids`
    pub fn progress_many(&self, upload_ids: &[String]) -> Vec<Option<UploadProgress>> {
        upload_ids.iter().map(|id| self.progress(id)).collect()
    }

    /// Remove every session started more than `max_age` ago, complete or not.
    /// Returns the ids that were evicted.
    pub fn reap_stale(&self, max_age: Duration) -> Vec<String> {
        let mut evicted = Vec::new();
        self.sessions.retain(|upload_id, session| {
            let stale = session.started_at.elapsed() > max_age;
            if stale {
                evicted.push(upload_id.clone());
            }
            !stale
        });
        evicted
    }

    pub fn contains(&self, upload_id: &str) -> bool {
        self.sessions.contains_key(upload_id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
