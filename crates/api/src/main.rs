use std::net::SocketAddr;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vidsight_api::background::artifact_sweep;
use vidsight_api::config::ServerConfig;
use vidsight_api::router::build_app_router;
use vidsight_api::state::AppState;
use vidsight_core::store::ArtifactStore;
use vidsight_pipeline::detector::HttpDetector;
use vidsight_pipeline::media::FfmpegBackend;
use vidsight_pipeline::VideoPipeline;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "vidsight_api=debug,vidsight_pipeline=debug,vidsight_core=info,tower_http=debug"
                    .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env();
    tracing::info!(
        host = %config.host,
        port = %config.port,
        detector_url = %config.detector_url,
        "Loaded server configuration"
    );

    // --- Storage ---
    tokio::fs::create_dir_all(&config.storage.upload_dir)
        .await
        .expect("Failed to create upload directory");

    let store = Arc::new(
        ArtifactStore::open(&config.storage.processed_dir, config.storage.artifact_ttl)
            .await
            .expect("Failed to open artifact store"),
    );

    // --- Pipeline ---
    let annotator = config
        .annotation
        .build_annotator()
        .expect("Failed to load annotation palette or font");
    let media = FfmpegBackend::new(config.ffmpeg_bin.clone(), config.ffprobe_bin.clone());
    let pipeline = Arc::new(VideoPipeline::new(
        Arc::new(media),
        Arc::new(annotator),
        Arc::clone(&store),
    ));
    let detector = HttpDetector::new(config.detector_url.clone(), config.detector_timeout)
        .expect("Failed to build detector client");

    // --- Artifact sweep ---
    let sweep_cancel = CancellationToken::new();
    let sweep_handle = tokio::spawn(artifact_sweep::run(
        Arc::clone(&store),
        config.storage.sweep_interval,
        config.storage.sweep_backoff,
        sweep_cancel.clone(),
    ));

    // --- App state ---
    let state = AppState {
        config: Arc::new(config.clone()),
        store,
        pipeline,
        detector: Arc::new(detector),
    };

    // --- Router ---
    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");

    sweep_cancel.cancel();
    if tokio::time::timeout(config.shutdown_timeout, sweep_handle)
        .await
        .is_err()
    {
        tracing::warn!("Artifact sweep did not stop in time");
    } else {
        tracing::info!("Artifact sweep stopped");
    }

    tracing::info!("Graceful shutdown complete");
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
