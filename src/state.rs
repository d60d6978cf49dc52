use std::convert::Infallible;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;

use crate::batcher::RequestBatcher;
use crate::config::PUBLIC_UPLOADS_PATH;
use crate::reassembler::Reassembler;
use crate::registry::{ChunkRegistry, UploadProgress};

/// status lookups, coalesced into one registry scan per flush
pub type StatusBatcher = RequestBatcher<String, Option<UploadProgress>, Infallible>;

/// shared application state
#[derive(Clone)]
pub struct AppState {
    /// uploads in flight, shared with the reaper
    pub registry: Arc<ChunkRegistry>,
    pub reassembler: Reassembler,
    pub status_batcher: StatusBatcher,
}

impl AppState {
    /// create a new app state writing completed uploads to `upload_dir`
    pub fn new(upload_dir: PathBuf, status_batch_delay: Duration, max_total_chunks: usize) -> Self {
        let registry = Arc::new(ChunkRegistry::with_max_total_chunks(max_total_chunks));
        let reassembler = Reassembler::new(registry.clone(), upload_dir, PUBLIC_UPLOADS_PATH);

        let lookup_registry = registry.clone();
        let status_batcher = RequestBatcher::new("upload-status", status_batch_delay, move |ids: Vec<String>| {
            let progress = lookup_registry.progress_many(&ids);
            async move { Ok(progress) }.boxed()
        });

        Self {
            registry,
            reassembler,
            status_batcher,
        }
    }
}
