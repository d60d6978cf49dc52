use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::registry::ChunkRegistry;

/// one sweep: drop sessions older than `max_age`, returning how many went
pub fn sweep(registry: &ChunkRegistry, max_age: Duration) -> usize {
    let evicted = registry.reap_stale(max_age);
    for upload_id in &evicted {
        tracing::info!("🧹 Evicted stale upload {} (older than {:?})", upload_id, max_age);
    }
    if !evicted.is_empty() {
        tracing::debug!("Reaper sweep evicted {} uploads, {} still active", evicted.len(), registry.len());
    }
    evicted.len()
}

/// Sweep `registry` every `every` until the returned handle is aborted.
/// The first sweep runs one full interval after startup.
pub fn spawn_reaper(registry: Arc<ChunkRegistry>, every: Duration, max_age: Duration) -> JoinHandle<()> {
    tracing::debug!("Starting upload reaper: every {:?}, timeout {:?}", every, max_age);
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + every, every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            sweep(&registry, max_age);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ChunkSubmission;
    use bytes::Bytes;

    fn submit(registry: &ChunkRegistry, upload_id: &str, index: usize) {
        registry
            .store_chunk(ChunkSubmission {
                upload_id: upload_id.to_string(),
                chunk_index: index,
                total_chunks: 4,
                filename: "clip.mp4".to_string(),
                bytes: Bytes::from_static(b"data"),
            })
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_reaper_evicts_nearly_complete_upload() {
        let registry = Arc::new(ChunkRegistry::new());
        for index in 0..3 {
            submit(&registry, "abandoned", index);
        }

        let handle = spawn_reaper(registry.clone(), Duration::from_secs(300), Duration::from_secs(1800));

        // sweeps at 5, 10, ... 30 minutes find nothing older than 30 minutes
        tokio::time::sleep(Duration::from_secs(1800) + Duration::from_millis(1)).await;
        assert!(registry.contains("abandoned"));

        // the 35 minute sweep does
        tokio::time::sleep(Duration::from_secs(300)).await;
        assert!(!registry.contains("abandoned"));

        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_counts_evictions() {
        let registry = ChunkRegistry::new();
        submit(&registry, "one", 0);
        submit(&registry, "two", 0);

        assert_eq!(sweep(&registry, Duration::from_secs(60)), 0);
        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(sweep(&registry, Duration::from_secs(60)), 2);
        assert!(registry.is_empty());
    }
}
