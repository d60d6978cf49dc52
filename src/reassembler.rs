use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

use crate::error::Result;
use crate::registry::{ChunkProgress, ChunkRegistry, ChunkStored, ChunkSubmission, UploadSession};
use crate::utils::unique_filename;

/// fresh names tried when a generated filename is already taken
const NAME_ATTEMPTS: u32 = 3;

/// descriptor of an upload that has been assembled and written to disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedFile {
    pub final_filename: String,
    /// public url path the file is served under
    pub path: String,
    pub disk_path: PathBuf,
    pub size_bytes: u64,
    pub sha256: String,
}

#[derive(Debug)]
pub enum SubmitOutcome {
    Progress(ChunkProgress),
    Completed(CompletedFile),
}

/// Accepts chunks into the registry and writes out uploads once they are whole.
#[derive(Debug, Clone)]
pub struct Reassembler {
    registry: Arc<ChunkRegistry>,
    upload_dir: PathBuf,
    public_prefix: String,
}

impl Reassembler {
    pub fn new(registry: Arc<ChunkRegistry>, upload_dir: PathBuf, public_prefix: impl Into<String>) -> Self {
        Self {
            registry,
            upload_dir,
            public_prefix: public_prefix.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn registry(&self) -> &Arc<ChunkRegistry> {
        &self.registry
    }

    pub async fn submit_chunk(&self, submission: ChunkSubmission) -> Result<SubmitOutcome> {
        let upload_id = submission.upload_id.clone();
        tracing::trace!(
            upload_id = %upload_id,
            chunk_index = submission.chunk_index,
            bytes = submission.bytes.len(),
            "Storing chunk"
        );

        match self.registry.store_chunk(submission)? {
            ChunkStored::Pending(progress) => {
                tracing::debug!(
                    "📦 Received chunk {} ({}/{}) for upload {}",
                    progress.chunk_index,
                    progress.received,
                    progress.total_chunks,
                    upload_id
                );
                Ok(SubmitOutcome::Progress(progress))
            }
            // the session is out of the registry now; if the write fails its
            // buffers are dropped with it and the client has to start over
            ChunkStored::Complete(session) => self.assemble(session).await.map(SubmitOutcome::Completed),
        }
    }

    async fn assemble(&self, session: UploadSession) -> Result<CompletedFile> {
        let UploadSession {
            upload_id,
            filename,
            total_chunks,
            chunks,
            ..
        } = session;

        let size: usize = chunks.values().map(|c| c.len()).sum();
        let mut assembled = Vec::with_capacity(size);
        // BTreeMap iterates in index order; completeness was checked under the registry lock
        for chunk in chunks.into_values() {
            assembled.extend_from_slice(&chunk);
        }
        let sha256 = hex::encode(Sha256::digest(&assembled));

        fs::create_dir_all(&self.upload_dir).await.map_err(|e| {
            tracing::error!(upload_id = %upload_id, "Failed to create upload directory {:?}: {}", self.upload_dir, e);
            e
        })?;

        let mut attempt = 1;
        let (final_filename, disk_path) = loop {
            let name = unique_filename(&filename);
            let path = self.upload_dir.join(&name);
            tracing::debug!(upload_id = %upload_id, "Assembling {} chunks into {:?}", total_chunks, path);

            match write_new_file(&path, &assembled).await {
                Ok(()) => break (name, path),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists && attempt < NAME_ATTEMPTS => {
                    tracing::warn!(upload_id = %upload_id, "Generated filename {} already exists, picking another", name);
                    attempt += 1;
                }
                Err(e) => {
                    tracing::error!(upload_id = %upload_id, "Failed to write assembled file {:?}: {}", path, e);
                    return Err(e.into());
                }
            }
        };

        tracing::info!(
            "✅ Completed chunked upload {}: {} ({} bytes)",
            upload_id,
            final_filename,
            assembled.len()
        );

        Ok(CompletedFile {
            path: format!("{}/{}", self.public_prefix, final_filename),
            final_filename,
            disk_path,
            size_bytes: assembled.len() as u64,
            sha256,
        })
    }
}

// never replaces an existing file
async fn write_new_file(path: &Path, data: &[u8]) -> io::Result<()> {
    let mut file = OpenOptions::new().write(true).create_new(true).open(path).await?;
    file.write_all(data).await?;
    file.sync_all().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_new_file_refuses_to_overwrite() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("taken.bin");

        write_new_file(&path, b"first upload").await.unwrap();
        let err = write_new_file(&path, b"second upload").await.unwrap_err();

        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
        assert_eq!(std::fs::read(&path).unwrap(), b"first upload");
    }
}
