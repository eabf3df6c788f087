use dotenvy::dotenv;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod app;
mod common;
mod config;
mod docs;
mod infrastructure;
mod modules;
mod routes;
mod state;
mod workers;

#[cfg(test)]
mod testing;

use crate::common::signal::shutdown_signal;
use crate::config::settings::AppConfig;
use crate::infrastructure::db::pool::connect_to_db;
use crate::infrastructure::storage::s3::StorageService;
use crate::modules::job::repository::JobRepository;
use crate::modules::media::repository::MediaRepository;
use crate::state::AppState;
use crate::workers::probe::FfprobeProbe;
use crate::workers::processor::{JobProcessor, ProcessorSettings};
use crate::workers::scheduler::Scheduler;
use crate::workers::transcoder::FfmpegEncoder;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting transcoding worker...");

    let config = AppConfig::new()?;
    tokio::fs::create_dir_all(&config.work_dir).await?;

    let db = connect_to_db(&config.database_url).await?;
    let storage = StorageService::new(&config.storage);

    let jobs = Arc::new(JobRepository::new(db.clone()));
    let processor = JobProcessor::new(
        jobs.clone(),
        Arc::new(MediaRepository::new(db)),
        Arc::new(storage),
        Arc::new(FfprobeProbe::new(config.ffprobe_path.clone())),
        Arc::new(FfmpegEncoder::new(config.ffmpeg_path.clone())),
        ProcessorSettings::from_config(&config),
    );
    let scheduler = Arc::new(Scheduler::new(jobs, Arc::new(processor), config.poll_interval()));

    // Health keeps answering while the scheduler drains.
    let stop_health = CancellationToken::new();
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.health_port)).await?;
    info!("Health server running on http://0.0.0.0:{}/health", config.health_port);

    let health = tokio::spawn({
        let app = app::create_app(AppState::new(scheduler.clone()));
        let stop = stop_health.clone();
        async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(stop.cancelled_owned())
                .await
        }
    });

    let stop_polling = CancellationToken::new();
    tokio::spawn({
        let stop = stop_polling.clone();
        async move {
            shutdown_signal().await;
            stop.cancel();
        }
    });

    let drained = scheduler.run(stop_polling, config.shutdown_grace()).await;
    if drained {
        info!("Worker stopped cleanly");
    } else {
        warn!("Worker stopped with a job still in PROCESSING");
    }

    stop_health.cancel();
    match health.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("Health server error: {}", e),
        Err(e) => error!("Health server task failed: {}", e),
    }

    Ok(())
}
