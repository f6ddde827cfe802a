//! realsync-core: per-frame trust scoring for video-conferencing sessions.
//!
//! A frame flows one way through the pipeline:
//! decode → locate faces → {deepfake, emotion, identity} per face →
//! aggregate into a single trust score. The identity tracker is the only
//! stateful stage; it keeps one embedding baseline per (session, face slot).

pub mod capability;
pub mod config;
pub mod deepfake;
pub mod detector;
pub mod embedding;
pub mod emotion;
pub mod frame;
pub mod onnx;
pub mod pipeline;
pub mod risk;
pub mod tracker;

pub use capability::{Capability, FallbackReason, ModelError, ModelStatus, Signal};
pub use config::{default_model_dir, ModelFiles, PipelineConfig};
pub use deepfake::{DeepfakeAdapter, DeepfakeAssessment, DeepfakeModel};
pub use detector::{BoundingBox, Detection, FaceCandidate, FaceDetector, FaceLocator, RelativeBox};
pub use embedding::ProjectionEmbedder;
pub use emotion::{Emotion, EmotionAdapter, EmotionAssessment, EmotionModel, NativeScores};
pub use frame::{decode_frame, DecodeError};
pub use pipeline::{
    AggregatedView, AnalyzeError, ConfidenceLayers, FaceResult, FrameResponse, Models,
    TrustPipeline,
};
pub use risk::RiskLevel;
pub use tracker::{IdentityAdapter, IdentityAssessment, IdentityError, IdentityTracker};
