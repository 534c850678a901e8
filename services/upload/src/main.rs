use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use upload_service::api::{self, start_api_server, AppState};
use upload_service::auth::PgSessionResolver;
use upload_service::{
    Config, FfmpegTools, PgVideoStore, PipelineSettings, S3ObjectStore, UploadPipeline,
};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load().context("Failed to load configuration")?;

    init_tracing(&config.service.log_level);

    info!(
        service = %config.service.name,
        bucket = %config.s3.bucket,
        "Starting Vidstash upload service"
    );

    init_metrics(config.service.metrics_port)?;

    let video_store = PgVideoStore::new(&config.database)
        .await
        .context("Failed to initialize video store")?;

    if config.database.run_migrations {
        video_store
            .run_migrations()
            .await
            .context("Failed to run database migrations")?;
    }

    let temp_dir = config.temp_dir();
    tokio::fs::create_dir_all(&temp_dir)
        .await
        .with_context(|| format!("Failed to create temp dir {}", temp_dir.display()))?;

    let tools = FfmpegTools::new(&config.media, temp_dir);
    if !tools.check_available().await {
        warn!("Media tools unavailable; video uploads will fail until they are installed");
    }

    let object_store = Arc::new(S3ObjectStore::new(&config.s3).await);
    let identity = Arc::new(PgSessionResolver::new(video_store.pool().clone()));

    let pipeline = Arc::new(UploadPipeline::new(
        PipelineSettings::from_config(&config),
        Arc::new(tools),
        object_store,
        Arc::new(video_store),
    ));

    let state = AppState {
        pipeline: pipeline.clone(),
        identity,
    };

    // Readiness flips and new tool runs are refused as soon as the signal
    // lands, while in-flight requests drain.
    let closing = pipeline.clone();
    let shutdown = async move {
        shutdown_signal().await;
        closing.close();
    };

    let body_limit = api::body_limit(&config.upload);
    if let Err(e) = start_api_server(state, &config.api, body_limit, shutdown).await {
        error!(error = %e, "API server error");
        return Err(e);
    }

    info!("Upload service stopped");

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

    info!(port, "Prometheus metrics exporter started");

    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal, draining requests");
        }
        _ = terminate => {
            info!("Received SIGTERM signal, draining requests");
        }
    }
}
