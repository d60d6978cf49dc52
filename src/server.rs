use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderValue, Method},
    routing::{get, post},
    Extension, Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};
use tower_http::{
    compression::CompressionLayer,
    cors::CorsLayer,
    limit::RequestBodyLimitLayer,
    services::ServeDir,
    trace::TraceLayer,
};

use crate::config::{Config, PUBLIC_UPLOADS_PATH};
use crate::handlers::{
    abort_upload, health_check, upload_chunk, upload_chunk_form, upload_status,
};
use crate::middleware::{add_security_headers, flag_large_uploads, ChunkedUploadThreshold};
use crate::state::AppState;
use crate::utils::shutdown_signal;

/// routes for the chunk api, without rate limiting or cors
pub fn api_routes(state: Arc<AppState>, config: &Config) -> Router {
    Router::new()
        .route("/api/upload/chunked", post(upload_chunk))
        .route("/api/upload/chunked/form", post(upload_chunk_form))
        .route(
            "/api/upload/chunked/:upload_id",
            get(upload_status).delete(abort_upload),
        )
        .route("/api/health", get(health_check))
        .layer(axum::middleware::from_fn(flag_large_uploads))
        .layer(Extension(ChunkedUploadThreshold(config.chunked_upload_threshold)))
        .layer(DefaultBodyLimit::max(config.max_upload_size))
        .layer(RequestBodyLimitLayer::new(config.max_upload_size))
        .with_state(state)
}

// serves assembled uploads
fn files_service(config: &Config) -> Router {
    Router::new()
        .nest_service(
            PUBLIC_UPLOADS_PATH,
            ServeDir::new(&config.upload_dir)
                .precompressed_gzip()
                .precompressed_br()
                .precompressed_zstd(),
        )
        .layer(CompressionLayer::new().gzip(true).br(true).zstd(true))
}

/// build the full application router
pub fn build_router(state: Arc<AppState>, config: &Config) -> Router {
    tracing::debug!(
        "Building router: upload dir {:?}, max request size {} bytes",
        config.upload_dir,
        config.max_upload_size
    );

    // config clamps both values to at least 1
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_millisecond(config.rate_limit_replenish_ms)
            .burst_size(config.rate_limit_burst)
            .finish()
            .expect("rate limit period and burst are non-zero"),
    );

    let origins: Vec<HeaderValue> = config
        .cors_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin: {}", origin);
                None
            }
        })
        .collect();
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_origin(origins)
        .allow_headers([header::CONTENT_TYPE]);

    api_routes(state, config)
        .merge(files_service(config))
        .layer(axum::middleware::from_fn(add_security_headers))
        .layer(GovernorLayer { config: governor_conf })
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Serve `app` on `listener` until a shutdown signal arrives.
pub async fn serve(listener: tokio::net::TcpListener, app: Router) -> std::io::Result<()> {
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .tcp_nodelay(true)
    .await
}

/// print startup banner with server info
pub fn print_startup_banner(config: &Config) {
    tracing::info!("tango-uploads starting...");
    tracing::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    tracing::info!("📡 CHUNK API: http://{}:{}/api/upload/chunked", config.host, config.port);
    tracing::info!("📁 Writing uploads to: {:?}", config.upload_dir.canonicalize().unwrap_or(config.upload_dir.clone()));
    tracing::info!(
        "🧹 Reaping uploads older than {:?} every {:?}",
        config.upload_timeout,
        config.reaper_interval
    );
    tracing::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
}
