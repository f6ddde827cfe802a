//! Frame aggregation and session lifecycle.
//!
//! [`TrustPipeline`] is the long-lived service object: it owns the
//! startup-selected model capabilities and the identity session store, is
//! `Send + Sync`, and is shared by reference between request workers.

use chrono::{DateTime, SecondsFormat, Utc};
use image::RgbImage;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Instant;
use thiserror::Error;

use crate::capability::{Capability, ModelStatus};
use crate::config::PipelineConfig;
use crate::deepfake::{DeepfakeAdapter, DeepfakeAssessment, DeepfakeModel};
use crate::detector::{BoundingBox, FaceCandidate, FaceDetector, FaceLocator};
use crate::embedding::ProjectionEmbedder;
use crate::emotion::{EmotionAdapter, EmotionAssessment, EmotionModel};
use crate::frame::decode_frame;
use crate::tracker::{IdentityAdapter, IdentityAssessment, IdentityTracker};

/// No live audio signal is integrated; this constant stands in for it.
pub const AUDIO_CONFIDENCE_PLACEHOLDER: f32 = 0.9;

const NO_FACE_TRUST_SCORE: f32 = 0.95;
const NO_FACE_BEHAVIOR_CONFIDENCE: f32 = 0.55;

/// Rejected requests (the caller sent something unusable).
#[derive(Error, Debug)]
pub enum AnalyzeError {
    #[error("session id is required")]
    MissingSessionId,
    #[error("image payload is required")]
    EmptyPayload,
}

/// External model bindings, one capability slot each.
pub struct Models {
    pub detector: Capability<dyn FaceDetector>,
    pub deepfake: Capability<dyn DeepfakeModel>,
    pub emotion: Capability<dyn EmotionModel>,
}

impl Models {
    pub fn unavailable() -> Self {
        Self {
            detector: Capability::Unavailable,
            deepfake: Capability::Unavailable,
            emotion: Capability::Unavailable,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ConfidenceLayers {
    pub audio: f32,
    pub video: f32,
    pub behavior: f32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FaceResult {
    pub face_id: usize,
    pub bbox: BoundingBox,
    pub confidence: f32,
    pub emotion: EmotionAssessment,
    pub identity: IdentityAssessment,
    pub deepfake: DeepfakeAssessment,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedView {
    pub emotion: EmotionAssessment,
    pub identity: IdentityAssessment,
    pub deepfake: DeepfakeAssessment,
    pub trust_score: f32,
    pub confidence_layers: ConfidenceLayers,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameResponse {
    pub session_id: String,
    pub captured_at: String,
    pub processed_at: String,
    pub faces: Vec<FaceResult>,
    pub aggregated: AggregatedView,
}

impl FrameResponse {
    /// Canonical response for a frame without usable faces.
    pub fn no_face(session_id: &str, captured_at: Option<&str>) -> Self {
        let processed_at = format_timestamp(Utc::now());
        Self {
            session_id: session_id.to_string(),
            captured_at: echo_captured_at(captured_at, &processed_at),
            processed_at,
            faces: Vec::new(),
            aggregated: AggregatedView {
                emotion: EmotionAssessment::no_face(),
                identity: IdentityAssessment::neutral(),
                deepfake: DeepfakeAssessment::no_face(),
                trust_score: NO_FACE_TRUST_SCORE,
                confidence_layers: ConfidenceLayers {
                    audio: AUDIO_CONFIDENCE_PLACEHOLDER,
                    video: 1.0,
                    behavior: NO_FACE_BEHAVIOR_CONFIDENCE,
                },
            },
        }
    }
}

/// RFC 3339, UTC, millisecond precision, `Z` suffix.
fn format_timestamp(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// The caller's `capturedAt` is opaque and echoed verbatim; absent or empty
/// falls back to the processing time.
fn echo_captured_at(captured_at: Option<&str>, processed_at: &str) -> String {
    captured_at
        .filter(|s| !s.is_empty())
        .unwrap_or(processed_at)
        .to_string()
}

pub fn behavior_confidence(emotion_confidence: f32) -> f32 {
    0.55 + 0.4 * emotion_confidence
}

/// Combine the primary face's signals into one score in [0, 1].
///
/// Equal weights over authenticity, the audio placeholder, identity
/// continuity (`1 - shift`) and behaviour.
pub fn trust_score(
    deepfake: &DeepfakeAssessment,
    identity: &IdentityAssessment,
    emotion: &EmotionAssessment,
) -> (f32, ConfidenceLayers) {
    let layers = ConfidenceLayers {
        audio: AUDIO_CONFIDENCE_PLACEHOLDER,
        video: deepfake.authenticity_score,
        behavior: behavior_confidence(emotion.confidence),
    };
    let trust = (deepfake.authenticity_score
        + layers.audio
        + (1.0 - identity.embedding_shift)
        + layers.behavior)
        / 4.0;
    (trust.clamp(0.0, 1.0), layers)
}

pub struct TrustPipeline {
    locator: FaceLocator,
    deepfake: DeepfakeAdapter,
    emotion: EmotionAdapter,
    identity: IdentityAdapter,
}

impl TrustPipeline {
    pub fn new(config: &PipelineConfig, models: Models) -> Self {
        let embedder = ProjectionEmbedder::new(
            config.crop_size,
            config.embedding_dim,
            config.projection_seed,
        );
        Self {
            locator: FaceLocator::new(models.detector, config),
            deepfake: DeepfakeAdapter::new(models.deepfake, config.deepfake_input_size),
            emotion: EmotionAdapter::new(models.emotion),
            identity: IdentityAdapter::new(embedder, IdentityTracker::new(config.baseline_alpha)),
        }
    }

    /// Analyse one encoded frame for `session_id`.
    ///
    /// Only unusable requests are errors. A payload that fails to decode,
    /// or a frame with no faces, yields the canonical no-face response.
    pub fn analyze_frame(
        &self,
        session_id: &str,
        payload: &[u8],
        captured_at: Option<&str>,
    ) -> Result<FrameResponse, AnalyzeError> {
        if session_id.trim().is_empty() {
            return Err(AnalyzeError::MissingSessionId);
        }
        if payload.is_empty() {
            return Err(AnalyzeError::EmptyPayload);
        }
        match decode_frame(payload) {
            Ok(frame) => Ok(self.analyze_image(session_id, &frame, captured_at)),
            Err(e) => {
                tracing::warn!(session_id, error = %e, "frame decode failed");
                Ok(FrameResponse::no_face(session_id, captured_at))
            }
        }
    }

    /// Analyse an already-decoded frame.
    pub fn analyze_image(
        &self,
        session_id: &str,
        frame: &RgbImage,
        captured_at: Option<&str>,
    ) -> FrameResponse {
        let started = Instant::now();

        let faces: Vec<FaceResult> = self
            .locator
            .locate(frame)
            .iter()
            .map(|candidate| self.analyze_face(session_id, candidate))
            .collect();

        // Primary face = first in detector emission order, not confidence-sorted
        let Some(primary) = faces.first() else {
            tracing::debug!(session_id, "no faces in frame");
            return FrameResponse::no_face(session_id, captured_at);
        };

        let (trust, layers) = trust_score(&primary.deepfake, &primary.identity, &primary.emotion);
        let aggregated = AggregatedView {
            emotion: primary.emotion.clone(),
            identity: primary.identity,
            deepfake: primary.deepfake.clone(),
            trust_score: trust,
            confidence_layers: layers,
        };

        let processed_at = format_timestamp(Utc::now());
        tracing::info!(
            session_id,
            faces = faces.len(),
            trust_score = trust,
            elapsed_ms = started.elapsed().as_secs_f64() * 1000.0,
            "frame analysed"
        );

        FrameResponse {
            session_id: session_id.to_string(),
            captured_at: echo_captured_at(captured_at, &processed_at),
            processed_at,
            faces,
            aggregated,
        }
    }

    fn analyze_face(&self, session_id: &str, candidate: &FaceCandidate) -> FaceResult {
        let deepfake = self.deepfake.assess(&candidate.crop);
        let emotion = self.emotion.assess(&candidate.crop);
        let identity = self.identity.assess(session_id, candidate.slot, &candidate.crop);

        if deepfake.is_fallback() || emotion.is_fallback() || identity.is_fallback() {
            tracing::debug!(
                session_id,
                slot = candidate.slot,
                deepfake = ?deepfake.fallback_reason(),
                emotion = ?emotion.fallback_reason(),
                identity = ?identity.fallback_reason(),
                "face analysed with fallback signals"
            );
        }

        FaceResult {
            face_id: candidate.slot,
            bbox: candidate.bbox,
            confidence: candidate.confidence,
            emotion: emotion.into_value(),
            identity: identity.into_value(),
            deepfake: deepfake.into_value(),
        }
    }

    /// Session-end hook: forget every identity baseline of the session.
    ///
    /// Sessions are created implicitly by their first frame; this is the
    /// only other lifecycle event. Idempotent.
    pub fn end_session(&self, session_id: &str) -> bool {
        let existed = self.identity.tracker().clear_session(session_id);
        tracing::info!(session_id, existed, "session ended");
        existed
    }

    /// Drop all session state.
    pub fn clear_all(&self) {
        self.identity.tracker().clear_all();
        tracing::info!("all identity sessions cleared");
    }

    pub fn active_sessions(&self) -> usize {
        self.identity.tracker().session_count()
    }

    pub fn tracker(&self) -> &IdentityTracker {
        self.identity.tracker()
    }

    /// Subsystem name → model status.
    pub fn health(&self) -> BTreeMap<&'static str, ModelStatus> {
        BTreeMap::from([
            ("deepfake", self.deepfake.status()),
            ("emotion", self.emotion.status()),
            ("face_detection", self.locator.status()),
            ("identity", self.identity.status()),
        ])
    }
}
