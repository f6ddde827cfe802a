use std::path::PathBuf;
use std::sync::Arc;

use realsync_core::TrustPipeline;
use tokio::sync::Mutex;
use zbus::interface;

use crate::engine::{EngineError, EngineHandle};

/// Shared state accessible by D-Bus method handlers.
pub struct AppState {
    pub engine: EngineHandle,
    pub pipeline: Arc<TrustPipeline>,
    pub model_dir: PathBuf,
    pub workers: usize,
}

/// D-Bus interface for the RealSync trust-scoring daemon.
///
/// Bus name: org.realsync.Inference1
/// Object path: /org/realsync/Inference1
pub struct InferenceService {
    pub state: Arc<Mutex<AppState>>,
}

fn to_fdo_error(e: EngineError) -> zbus::fdo::Error {
    if e.is_invalid_input() {
        zbus::fdo::Error::InvalidArgs(e.to_string())
    } else {
        tracing::error!(error = %e, "analyze failed");
        zbus::fdo::Error::Failed(e.to_string())
    }
}

fn to_json(value: &impl serde::Serialize) -> zbus::fdo::Result<String> {
    serde_json::to_string(value).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
}

#[interface(name = "org.realsync.Inference1")]
impl InferenceService {
    /// Analyse one encoded video frame for a session.
    ///
    /// `captured_at` is echoed back unchanged; the empty string means
    /// "use the processing time".
    /// Returns the frame response as JSON.
    async fn analyze_frame(
        &self,
        session_id: &str,
        payload: Vec<u8>,
        captured_at: &str,
    ) -> zbus::fdo::Result<String> {
        tracing::debug!(session_id, bytes = payload.len(), "analyze_frame requested");

        let engine = self.state.lock().await.engine.clone();

        let captured_at = (!captured_at.is_empty()).then(|| captured_at.to_string());
        let response = engine
            .analyze(session_id.to_string(), payload, captured_at)
            .await
            .map_err(to_fdo_error)?;

        to_json(&response)
    }

    /// Forget all identity baselines of a session. Safe to call repeatedly.
    async fn clear_session(&self, session_id: &str) -> zbus::fdo::Result<String> {
        if session_id.trim().is_empty() {
            return Err(zbus::fdo::Error::InvalidArgs(
                "session id is required".to_string(),
            ));
        }
        let pipeline = Arc::clone(&self.state.lock().await.pipeline);
        pipeline.end_session(session_id);

        Ok(serde_json::json!({ "ok": true, "sessionId": session_id }).to_string())
    }

    /// Model status per subsystem as JSON.
    async fn health(&self) -> zbus::fdo::Result<String> {
        let pipeline = Arc::clone(&self.state.lock().await.pipeline);
        Ok(serde_json::json!({ "ok": true, "models": pipeline.health() }).to_string())
    }

    /// Return daemon status information as JSON.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let state = self.state.lock().await;
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "modelDir": state.model_dir.display().to_string(),
            "workers": state.workers,
            "activeSessions": state.pipeline.active_sessions(),
            "models": state.pipeline.health(),
        })
        .to_string())
    }
}
