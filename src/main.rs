use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use std::net::SocketAddr;
use std::sync::Arc;

use tango_uploads::config::Config;
use tango_uploads::reaper::spawn_reaper;
use tango_uploads::server::{build_router, print_startup_banner, serve};
use tango_uploads::state::AppState;

// use mimalloc as the global allocator
// chunk buffers churn a lot of large allocations
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

fn main() {
    // load .env file if it exists (fails silently if not found)
    let _ = dotenvy::dotenv();

    let config = Config::from_env();

    // build tokio runtime with configured worker threads
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.worker_threads)
        .enable_all()
        .build()
        .expect("Failed to build Tokio runtime");

    runtime.block_on(async {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "info".into()),
            )
            .with(tracing_subscriber::fmt::layer())
            .init();

        // create the upload directory if it doesn't exist
        if !config.upload_dir.exists() {
            std::fs::create_dir_all(&config.upload_dir).expect("Failed to create upload directory");
            tracing::info!("Created upload directory at: {:?}", config.upload_dir);
        }

        let state = Arc::new(AppState::new(
            config.upload_dir.clone(),
            config.status_batch_delay,
            config.max_total_chunks,
        ));
        let reaper = spawn_reaper(state.registry.clone(), config.reaper_interval, config.upload_timeout);

        let app = build_router(state, &config);

        let addr = SocketAddr::from((
            config.host.parse::<std::net::IpAddr>()
                .expect("Invalid HOST"),
            config.port,
        ));

        print_startup_banner(&config);

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .expect("Failed to bind server");
        tracing::info!("Listening on {}", addr);

        if let Err(e) = serve(listener, app).await {
            tracing::error!("Server error: {}", e);
        }

        reaper.abort();
        tracing::info!("Server stopped");
    });
}
