use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use realsync_core::onnx::load_models;
use realsync_core::{default_model_dir, ModelFiles, PipelineConfig, TrustPipeline};
use tracing_subscriber::EnvFilter;

#[zbus::proxy(
    interface = "org.realsync.Inference1",
    default_service = "org.realsync.Inference1",
    default_path = "/org/realsync/Inference1"
)]
trait Inference {
    fn analyze_frame(&self, session_id: &str, payload: &[u8], captured_at: &str)
        -> zbus::Result<String>;
    fn clear_session(&self, session_id: &str) -> zbus::Result<String>;
    fn health(&self) -> zbus::Result<String>;
    fn status(&self) -> zbus::Result<String>;
}

/// RealSync trust scoring for video-call frames
#[derive(Parser)]
#[command(name = "realsync", version, about)]
struct Cli {
    /// Talk to a daemon on the session bus instead of the system bus
    #[arg(long, global = true)]
    session_bus: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Analyse image files as consecutive frames of one session
    Analyze {
        /// Encoded frames (JPEG, PNG, ...), in call order
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Session id the frames belong to
        #[arg(long, default_value = "cli")]
        session: String,
        /// Directory holding the ONNX models (in-process mode)
        #[arg(long)]
        model_dir: Option<PathBuf>,
        /// Send frames to the running daemon instead of analysing in-process
        #[arg(long)]
        remote: bool,
        /// Pretty-print each response
        #[arg(long)]
        pretty: bool,
    },
    /// Show daemon status and model availability
    Status,
    /// Show per-subsystem model status of the daemon
    Health,
    /// Forget the identity baselines of a session on the daemon
    ClearSession {
        session: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Analyze {
            files,
            session,
            model_dir,
            remote,
            pretty,
        } => {
            if remote {
                let proxy = connect(cli.session_bus).await?;
                for file in &files {
                    let payload = read_frame(file)?;
                    let json = proxy
                        .analyze_frame(&session, &payload, "")
                        .await
                        .with_context(|| format!("daemon rejected {}", file.display()))?;
                    print_json(&json, pretty)?;
                }
            } else {
                let model_dir = model_dir.unwrap_or_else(default_model_dir);
                analyze_local(&files, &session, &model_dir, pretty)?;
            }
        }
        Command::Status => {
            let proxy = connect(cli.session_bus).await?;
            print_json(&proxy.status().await?, true)?;
        }
        Command::Health => {
            let proxy = connect(cli.session_bus).await?;
            print_json(&proxy.health().await?, true)?;
        }
        Command::ClearSession { session } => {
            let proxy = connect(cli.session_bus).await?;
            print_json(&proxy.clear_session(&session).await?, false)?;
        }
    }

    Ok(())
}

async fn connect(session_bus: bool) -> Result<InferenceProxy<'static>> {
    let conn = if session_bus {
        zbus::Connection::session().await?
    } else {
        zbus::Connection::system().await?
    };
    InferenceProxy::new(&conn)
        .await
        .context("failed to reach realsyncd; is the daemon running?")
}

fn analyze_local(files: &[PathBuf], session: &str, model_dir: &Path, pretty: bool) -> Result<()> {
    let model_files = ModelFiles::from_env();
    let models = load_models(
        &model_files.detector_path(model_dir),
        &model_files.deepfake_path(model_dir),
        &model_files.emotion_path(model_dir),
    );
    let pipeline = TrustPipeline::new(&PipelineConfig::default(), models);
    for (subsystem, status) in pipeline.health() {
        tracing::info!(subsystem, %status, "model status");
    }

    for file in files {
        let payload = read_frame(file)?;
        let response = pipeline
            .analyze_frame(session, &payload, None)
            .with_context(|| format!("failed to analyse {}", file.display()))?;
        let json = if pretty {
            serde_json::to_string_pretty(&response)?
        } else {
            serde_json::to_string(&response)?
        };
        println!("{json}");
    }
    Ok(())
}

fn read_frame(path: &Path) -> Result<Vec<u8>> {
    let payload =
        std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    if payload.is_empty() {
        bail!("{} is empty", path.display());
    }
    Ok(payload)
}

fn print_json(raw: &str, pretty: bool) -> Result<()> {
    if pretty {
        let value: serde_json::Value = serde_json::from_str(raw)?;
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        println!("{raw}");
    }
    Ok(())
}
