use std::path::PathBuf;
use std::time::Duration;

use crate::registry::DEFAULT_MAX_TOTAL_CHUNKS;

/// url path completed uploads are served under
pub const PUBLIC_UPLOADS_PATH: &str = "/uploads/chunked";

/// application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// directory assembled uploads are written to
    pub upload_dir: PathBuf,
    pub host: String,
    pub port: u16,
    /// maximum request body size in bytes (one chunk request)
    pub max_upload_size: usize,
    /// content-length above which a request is flagged for chunked handling
    pub chunked_upload_threshold: u64,
    /// number of tokio worker threads
    pub worker_threads: usize,
    /// largest totalChunks an upload may declare
    pub max_total_chunks: usize,
    /// how often the reaper sweeps the registry
    pub reaper_interval: Duration,
    /// age after which an unfinished upload is discarded
    pub upload_timeout: Duration,
    /// how long upload status lookups wait to be batched together
    pub status_batch_delay: Duration,
    /// rate limit: one request replenished every this many milliseconds
    pub rate_limit_replenish_ms: u64,
    /// rate limit: burst size
    pub rate_limit_burst: u32,
    /// cors allowed origins (comma-separated)
    pub cors_origins: Vec<String>,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        let cors_origins = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:5000,http://127.0.0.1:5000".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Self {
            upload_dir: std::env::var("UPLOAD_DIR")
                .unwrap_or_else(|_| "./uploads/chunked".to_string())
                .into(),
            host: std::env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: env_or("PORT", 5000),
            max_upload_size: env_or("MAX_UPLOAD_SIZE", 100 * 1024 * 1024), // 100MB default
            chunked_upload_threshold: env_or("CHUNKED_UPLOAD_THRESHOLD", 50 * 1024 * 1024),
            worker_threads: env_or("WORKER_THREADS", 8usize).max(1),
            max_total_chunks: env_or("MAX_TOTAL_CHUNKS", DEFAULT_MAX_TOTAL_CHUNKS).max(1),
            reaper_interval: Duration::from_secs(env_or("REAPER_INTERVAL_SECS", 300u64).max(1)),
            upload_timeout: Duration::from_secs(env_or("UPLOAD_TIMEOUT_SECS", 1800)),
            status_batch_delay: Duration::from_millis(env_or("STATUS_BATCH_DELAY_MS", 10)),
            rate_limit_replenish_ms: env_or("RATE_LIMIT_REPLENISH_MS", 50u64).max(1),
            rate_limit_burst: env_or("RATE_LIMIT_BURST", 100u32).max(1),
            cors_origins,
        }
    }
}
