use std::sync::Arc;

use anyhow::{Context, Result};
use realsync_core::onnx::load_models;
use realsync_core::TrustPipeline;
use tokio::sync::Mutex;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;

use config::Config;
use dbus_interface::{AppState, InferenceService};

const BUS_NAME: &str = "org.realsync.Inference1";
const OBJECT_PATH: &str = "/org/realsync/Inference1";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("realsyncd starting");

    let config = Config::from_env();
    tracing::info!(
        model_dir = %config.model_dir.display(),
        workers = config.workers,
        queue_depth = config.queue_depth,
        session_bus = config.session_bus,
        "configuration loaded"
    );

    // Models load once; missing ones degrade to fallbacks for the process lifetime.
    let models = load_models(
        &config.detector_model_path(),
        &config.deepfake_model_path(),
        &config.emotion_model_path(),
    );
    let pipeline = Arc::new(TrustPipeline::new(&config.pipeline(), models));
    for (subsystem, status) in pipeline.health() {
        tracing::info!(subsystem, %status, "model status");
    }

    let engine = engine::spawn_engine(Arc::clone(&pipeline), config.workers, config.queue_depth)
        .context("failed to start engine workers")?;

    let session_bus = config.session_bus;
    let state = Arc::new(Mutex::new(AppState {
        engine,
        pipeline,
        model_dir: config.model_dir.clone(),
        workers: config.workers,
    }));
    let service = InferenceService { state };

    let builder = if session_bus {
        zbus::connection::Builder::session()?
    } else {
        zbus::connection::Builder::system()?
    };
    let _conn = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, service)?
        .build()
        .await
        .with_context(|| format!("failed to register {BUS_NAME} on the bus"))?;

    tracing::info!(bus = BUS_NAME, path = OBJECT_PATH, "realsyncd ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("realsyncd shutting down");

    Ok(())
}
