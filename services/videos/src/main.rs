use anyhow::{Context, Result};
use rehab_videos::api::{start_api_server, AppState};
use rehab_videos::{Config, PgVideoRepository, S3ObjectStore, VideoService};
use std::sync::Arc;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level);

    info!(
        service = %config.service.name,
        "Starting Rehab videos service"
    );

    // Initialize metrics
    init_metrics(config.service.metrics_port)?;

    let repository = PgVideoRepository::new(&config.database)
        .await
        .context("Failed to initialize video repository")?;

    if config.database.run_migrations {
        repository
            .run_migrations()
            .await
            .context("Failed to run database migrations")?;
    }

    let store = S3ObjectStore::new(&config.s3)
        .await
        .context("Failed to initialize object store")?;

    let temp_dir = config.upload.temp_dir();
    tokio::fs::create_dir_all(&temp_dir)
        .await
        .with_context(|| format!("Failed to create upload directory {}", temp_dir.display()))?;

    let videos = Arc::new(VideoService::new(
        Arc::new(repository),
        Arc::new(store),
        temp_dir,
        config.videos.swap_policy,
    ));

    info!(swap_policy = ?config.videos.swap_policy, "Video service ready");

    start_api_server(
        AppState { videos },
        &config.api,
        config.upload.max_upload_bytes,
        shutdown_signal(),
    )
    .await?;

    info!("Videos service stopped");

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json())
        .init();
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
