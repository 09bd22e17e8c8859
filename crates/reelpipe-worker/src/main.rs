//! Video processing worker binary.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use reelpipe_media::{check_ffmpeg, check_ffprobe, TranscodePipeline};
use reelpipe_queue::{connect_broker, QueueConfig, TaskDispatcher};
use reelpipe_storage::{build_storage, StorageConfig};
use reelpipe_worker::metrics::{init_metrics, spawn_depth_reporter};
use reelpipe_worker::{PgVideoRecords, VideoProcessor, WorkerConfig};

const DEPTH_REPORT_INTERVAL: Duration = Duration::from_secs(15);

#[tokio::main]
async fn main() {
    // Load environment variables
    dotenvy::dotenv().ok();

    init_tracing();

    info!("Starting reelpipe-worker");

    if let Err(e) = run().await {
        error!("Worker failed: {:#}", e);
        std::process::exit(1);
    }

    info!("Worker shutdown complete");
}

/// Colored output for dev, JSON for production.
fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,reelpipe=info,sqlx=warn"));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }
}

async fn run() -> anyhow::Result<()> {
    let config = WorkerConfig::from_env().context("invalid worker configuration")?;
    info!("Worker config: {:?}", config);

    let storage_config = StorageConfig::from_env().context("invalid storage configuration")?;
    let queue_config = QueueConfig::from_env().context("invalid queue configuration")?;
    let database_url = config
        .database_url
        .clone()
        .context("DATABASE_URL is required")?;

    for check in [check_ffmpeg(), check_ffprobe()] {
        if let Err(e) = check {
            warn!("{}; every task will fail until it is installed", e);
        }
    }

    let storage = build_storage(storage_config).await?;
    let records = Arc::new(PgVideoRecords::connect(&database_url).await?);
    let dispatcher = TaskDispatcher::new(connect_broker(&queue_config).await?);

    let pipeline_config = config.pipeline_config();
    if !pipeline_config.watermark.is_available() {
        warn!(
            path = %pipeline_config.watermark.image_path.display(),
            "Watermark image not found, videos will be processed without it"
        );
    }

    let processor = Arc::new(VideoProcessor::new(
        storage,
        records,
        TranscodePipeline::ffmpeg(pipeline_config),
        config.work_dir.clone(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    if let Some(port) = config.metrics_port {
        init_metrics(port)?;
        spawn_depth_reporter(dispatcher.clone(), DEPTH_REPORT_INTERVAL, shutdown_rx.clone());
    }

    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received shutdown signal");
        shutdown_tx.send_replace(true);
    });

    let client = dispatcher.client();
    info!(
        broker = client.broker_name(),
        concurrency = queue_config.concurrency,
        "Worker ready"
    );
    client.start_worker(processor, shutdown_rx).await?;

    dispatcher.close().await?;
    Ok(())
}
