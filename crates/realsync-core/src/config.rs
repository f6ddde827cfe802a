use std::path::{Path, PathBuf};

/// Immutable pipeline settings, built once at startup and shared by every worker.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Detections scoring below this are dropped.
    pub face_confidence_threshold: f32,
    /// Fraction of the box width/height added on each side before cropping.
    pub face_padding: f32,
    /// Padded crops narrower or shorter than this (pixels) are skipped.
    pub min_crop_side: u32,
    /// Side of the square face crop handed to the classifier adapters.
    pub crop_size: u32,
    /// Side of the square input expected by the deepfake classifier.
    pub deepfake_input_size: u32,
    /// Length of the identity embedding.
    pub embedding_dim: usize,
    /// Seed of the identity projection matrix.
    pub projection_seed: u64,
    /// Weight of the new embedding in the baseline moving average.
    pub baseline_alpha: f32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            face_confidence_threshold: 0.5,
            face_padding: 0.3,
            min_crop_side: 20,
            crop_size: 224,
            deepfake_input_size: 256,
            embedding_dim: 128,
            projection_seed: 42,
            baseline_alpha: 0.1,
        }
    }
}

pub const DEFAULT_DETECTOR_MODEL: &str = "face_detector.onnx";
pub const DEFAULT_DEEPFAKE_MODEL: &str = "mesonet4.onnx";
pub const DEFAULT_EMOTION_MODEL: &str = "emotion_fer.onnx";

/// ONNX file names inside the model directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelFiles {
    pub detector: String,
    pub deepfake: String,
    pub emotion: String,
}

impl Default for ModelFiles {
    fn default() -> Self {
        Self {
            detector: DEFAULT_DETECTOR_MODEL.to_string(),
            deepfake: DEFAULT_DEEPFAKE_MODEL.to_string(),
            emotion: DEFAULT_EMOTION_MODEL.to_string(),
        }
    }
}

impl ModelFiles {
    /// Defaults overridden by `REALSYNC_DETECTOR_MODEL`,
    /// `REALSYNC_DEEPFAKE_MODEL` and `REALSYNC_EMOTION_MODEL`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let pick = |key: &str, default: &str| {
            lookup(key)
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| default.to_string())
        };
        Self {
            detector: pick("REALSYNC_DETECTOR_MODEL", DEFAULT_DETECTOR_MODEL),
            deepfake: pick("REALSYNC_DEEPFAKE_MODEL", DEFAULT_DEEPFAKE_MODEL),
            emotion: pick("REALSYNC_EMOTION_MODEL", DEFAULT_EMOTION_MODEL),
        }
    }

    pub fn detector_path(&self, dir: &Path) -> PathBuf {
        dir.join(&self.detector)
    }

    pub fn deepfake_path(&self, dir: &Path) -> PathBuf {
        dir.join(&self.deepfake)
    }

    pub fn emotion_path(&self, dir: &Path) -> PathBuf {
        dir.join(&self.emotion)
    }
}

/// `REALSYNC_MODEL_DIR`, else `$XDG_DATA_HOME/realsync/models`
/// (`~/.local/share` when `XDG_DATA_HOME` is unset).
pub fn default_model_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("REALSYNC_MODEL_DIR") {
        return PathBuf::from(dir);
    }
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("realsync/models")
}
