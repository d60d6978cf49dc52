use tango_uploads::config::Config;
use std::env;
use std::time::Duration;

// helper to clear env vars
fn clear_env() {
    env::remove_var("UPLOAD_DIR");
    env::remove_var("HOST");
    env::remove_var("PORT");
    env::remove_var("MAX_UPLOAD_SIZE");
    env::remove_var("CHUNKED_UPLOAD_THRESHOLD");
    env::remove_var("WORKER_THREADS");
    env::remove_var("MAX_TOTAL_CHUNKS");
    env::remove_var("REAPER_INTERVAL_SECS");
    env::remove_var("UPLOAD_TIMEOUT_SECS");
    env::remove_var("STATUS_BATCH_DELAY_MS");
    env::remove_var("RATE_LIMIT_REPLENISH_MS");
    env::remove_var("RATE_LIMIT_BURST");
    env::remove_var("CORS_ORIGINS");
}

#[test]
fn test_config_behavior() {
    // Run these sequentially to avoid race conditions with environment variables

    // 1. Test Defaults
    clear_env();

    let config = Config::from_env();

    assert_eq!(config.upload_dir.to_str().unwrap(), "./uploads/chunked");
    assert_eq!(config.host, "127.0.0.1");
    assert_eq!(config.port, 5000);
    assert_eq!(config.chunked_upload_threshold, 50 * 1024 * 1024);
    assert_eq!(config.worker_threads, 8);
    assert_eq!(config.max_total_chunks, 10_000);
    assert_eq!(config.reaper_interval, Duration::from_secs(300));
    assert_eq!(config.upload_timeout, Duration::from_secs(1800));
    assert_eq!(config.status_batch_delay, Duration::from_millis(10));
    assert_eq!(config.cors_origins.len(), 2);

    // 2. Test From Env
    clear_env();

    env::set_var("UPLOAD_DIR", "/tmp/test_uploads");
    env::set_var("PORT", "9090");
    env::set_var("UPLOAD_TIMEOUT_SECS", "60");
    env::set_var("CHUNKED_UPLOAD_THRESHOLD", "1024");
    env::set_var("MAX_TOTAL_CHUNKS", "500");
    env::set_var("CORS_ORIGINS", "https://mundotango.life, ,https://admin.mundotango.life");

    let config = Config::from_env();

    assert_eq!(config.upload_dir.to_str().unwrap(), "/tmp/test_uploads");
    assert_eq!(config.port, 9090);
    assert_eq!(config.upload_timeout, Duration::from_secs(60));
    assert_eq!(config.chunked_upload_threshold, 1024);
    assert_eq!(config.max_total_chunks, 500);
    assert_eq!(
        config.cors_origins,
        vec!["https://mundotango.life".to_string(), "https://admin.mundotango.life".to_string()]
    );

    // 3. Garbage and zeros fall back or clamp
    clear_env();

    env::set_var("PORT", "not-a-port");
    env::set_var("RATE_LIMIT_BURST", "0");
    env::set_var("REAPER_INTERVAL_SECS", "0");
    env::set_var("MAX_TOTAL_CHUNKS", "0");

    let config = Config::from_env();

    assert_eq!(config.port, 5000);
    assert_eq!(config.rate_limit_burst, 1);
    assert_eq!(config.reaper_interval, Duration::from_secs(1));
    assert_eq!(config.max_total_chunks, 1);

    // Cleanup
    clear_env();
}
