// feedwatch: headless monitor for the camera grid
// Keeps a feed session per camera and logs feed and detection activity

use anyhow::Context;
use clap::Parser;
use shelfwatch_core::{Camera, ControllerConfig};
use shelfwatch_feed::{CameraDirectory, HttpSources, SessionEvent, SessionRegistry, SourceSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "feedwatch")]
#[command(about = "Watch live camera feeds and their detections", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (JSON, TOML or YAML)
    #[arg(long, short)]
    config: Option<String>,

    /// Only watch these cameras (repeatable)
    #[arg(long = "camera")]
    cameras: Vec<String>,

    /// Seconds between camera list refreshes
    #[arg(long, default_value = "30")]
    sync_interval_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => ControllerConfig::from_file(path)
            .with_context(|| format!("loading configuration from {}", path))?,
        None => ControllerConfig::default(),
    };
    config.apply_overrides(|key| std::env::var(key).ok());
    config.validate().context("invalid configuration")?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let http = Arc::new(HttpSources::new(config.endpoints.clone()));
    let sources = SourceSet::new(http.clone(), http.clone(), http.clone()).with_directory(http.clone());
    let registry = Arc::new(SessionRegistry::new(&config, sources)?);

    let mut events = registry.subscribe_events();
    let event_log = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(SessionEvent::FeedStateChanged {
                    camera_id,
                    old_state,
                    new_state,
                    retry_count,
                }) => {
                    info!(camera = %camera_id, retries = retry_count, "{} -> {}", old_state, new_state);
                }
                Ok(SessionEvent::DetectionsUpdated { camera_id, count }) => {
                    debug!(camera = %camera_id, "{} detections", count);
                }
                Ok(other) => debug!("{:?}", other),
                Err(RecvError::Lagged(skipped)) => warn!("Event log lagged, skipped {} events", skipped),
                Err(RecvError::Closed) => break,
            }
        }
    });

    info!(
        registry = %config.endpoints.registry_url,
        "feedwatch started, syncing every {}s",
        cli.sync_interval_secs
    );

    let mut sync = tokio::time::interval(Duration::from_secs(cli.sync_interval_secs.max(1)));
    loop {
        tokio::select! {
            _ = sync.tick() => {
                match http.list_cameras().await {
                    Ok(cameras) => {
                        let visible = select_cameras(cameras, &cli.cameras);
                        match registry.sync_grid(&visible).await {
                            Ok(report) if !report.started.is_empty() || !report.stopped.is_empty() => {
                                info!(
                                    "Grid synced: {} started, {} stopped, {} watching",
                                    report.started.len(),
                                    report.stopped.len(),
                                    registry.count()
                                );
                            }
                            Ok(_) => {}
                            Err(e) => error!("Grid sync failed: {}", e),
                        }
                    }
                    Err(e) => warn!("Could not list cameras: {}", e),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
        }
    }

    registry.shutdown().await;
    event_log.abort();
    Ok(())
}

fn select_cameras(cameras: Vec<Camera>, wanted: &[String]) -> Vec<Camera> {
    if wanted.is_empty() {
        return cameras;
    }
    cameras
        .into_iter()
        .filter(|camera| wanted.iter().any(|id| id == camera.id.as_str()))
        .collect()
}
