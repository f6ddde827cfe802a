use std::path::PathBuf;

use realsync_core::{default_model_dir, ModelFiles, PipelineConfig};

/// Daemon configuration, loaded from environment variables.
pub struct Config {
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Model file names inside `model_dir`.
    pub model_files: ModelFiles,
    /// Minimum detector confidence for a face to be analysed.
    pub face_confidence_threshold: f32,
    /// Fraction of the face box added on each side before cropping.
    pub face_padding: f32,
    /// Identity embedding length.
    pub embedding_dim: usize,
    /// Number of frame analysis worker threads.
    pub workers: usize,
    /// Capacity of the request queue feeding the workers.
    pub queue_depth: usize,
    /// Whether the daemon is running on the session bus (development mode).
    pub session_bus: bool,
}

impl Config {
    /// Load configuration from `REALSYNC_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let defaults = PipelineConfig::default();

        Self {
            model_dir: default_model_dir(),
            model_files: ModelFiles::from_env(),
            face_confidence_threshold: env_f32(
                "REALSYNC_FACE_CONFIDENCE",
                defaults.face_confidence_threshold,
            ),
            face_padding: env_f32("REALSYNC_FACE_PADDING", defaults.face_padding),
            embedding_dim: env_usize("REALSYNC_EMBEDDING_DIM", defaults.embedding_dim).max(1),
            workers: env_usize("REALSYNC_WORKERS", 2).max(1),
            queue_depth: env_usize("REALSYNC_QUEUE_DEPTH", 16).max(1),
            session_bus: std::env::var("REALSYNC_SESSION_BUS").is_ok(),
        }
    }

    pub fn detector_model_path(&self) -> PathBuf {
        self.model_files.detector_path(&self.model_dir)
    }

    pub fn deepfake_model_path(&self) -> PathBuf {
        self.model_files.deepfake_path(&self.model_dir)
    }

    pub fn emotion_model_path(&self) -> PathBuf {
        self.model_files.emotion_path(&self.model_dir)
    }

    /// The immutable pipeline settings shared by all workers.
    pub fn pipeline(&self) -> PipelineConfig {
        PipelineConfig {
            face_confidence_threshold: self.face_confidence_threshold.clamp(0.0, 1.0),
            face_padding: self.face_padding.max(0.0),
            embedding_dim: self.embedding_dim,
            ..PipelineConfig::default()
        }
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
