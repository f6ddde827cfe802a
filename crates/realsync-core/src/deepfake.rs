use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use serde::Serialize;

use crate::capability::{Capability, FallbackReason, ModelError, ModelStatus, Signal};
use crate::risk::RiskLevel;

pub const MODEL_TAG: &str = "MesoNet-4";

/// Authenticity above this is low risk.
const AUTH_LOW_RISK: f32 = 0.85;
/// Authenticity above this (and not above [`AUTH_LOW_RISK`]) is medium risk.
const AUTH_MEDIUM_RISK: f32 = 0.70;

/// Authenticity reported when the classifier is unavailable or fails.
const FALLBACK_AUTHENTICITY: f32 = 0.85;

/// Binary real/fake image classifier.
pub trait DeepfakeModel: Send + Sync {
    /// Probability that the face is fake, given a `[1, S, S, 3]` batch in [0, 1].
    fn predict(&self, batch: &Array4<f32>) -> Result<f32, ModelError>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeepfakeAssessment {
    pub authenticity_score: f32,
    pub risk_level: RiskLevel,
    pub model: String,
}

impl DeepfakeAssessment {
    fn fallback(reason: FallbackReason) -> Self {
        let suffix = match reason {
            FallbackReason::Unavailable => "unavailable",
            FallbackReason::Failed | FallbackReason::Empty => "error",
        };
        Self {
            authenticity_score: FALLBACK_AUTHENTICITY,
            risk_level: RiskLevel::Low,
            model: format!("{MODEL_TAG} ({suffix})"),
        }
    }

    /// Value used when a frame contains no face.
    pub fn no_face() -> Self {
        Self {
            authenticity_score: 1.0,
            risk_level: RiskLevel::Low,
            model: MODEL_TAG.to_string(),
        }
    }
}

/// Tier test is strict: exactly 0.85 is medium, exactly 0.70 is high.
pub fn risk_for_authenticity(score: f32) -> RiskLevel {
    if score > AUTH_LOW_RISK {
        RiskLevel::Low
    } else if score > AUTH_MEDIUM_RISK {
        RiskLevel::Medium
    } else {
        RiskLevel::High
    }
}

/// Resize a face crop to the model input and lay it out as NHWC in [0, 1].
fn preprocess(crop: &RgbImage, input_size: u32) -> Array4<f32> {
    let resized = if crop.dimensions() == (input_size, input_size) {
        crop.clone()
    } else {
        imageops::resize(crop, input_size, input_size, FilterType::Triangle)
    };

    let side = input_size as usize;
    Array4::from_shape_fn((1, side, side, 3), |(_, y, x, c)| {
        resized.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
    })
}

pub struct DeepfakeAdapter {
    model: Capability<dyn DeepfakeModel>,
    input_size: u32,
}

impl DeepfakeAdapter {
    pub fn new(model: Capability<dyn DeepfakeModel>, input_size: u32) -> Self {
        Self { model, input_size }
    }

    pub fn status(&self) -> ModelStatus {
        self.model.status()
    }

    pub fn assess(&self, crop: &RgbImage) -> Signal<DeepfakeAssessment> {
        let Some(model) = self.model.get() else {
            return Signal::Fallback(
                DeepfakeAssessment::fallback(FallbackReason::Unavailable),
                FallbackReason::Unavailable,
            );
        };

        let batch = preprocess(crop, self.input_size);
        match model.predict(&batch) {
            Ok(p_fake) if p_fake.is_finite() => {
                let authenticity = (1.0 - p_fake).clamp(0.0, 1.0);
                Signal::Measured(DeepfakeAssessment {
                    authenticity_score: authenticity,
                    risk_level: risk_for_authenticity(authenticity),
                    model: MODEL_TAG.to_string(),
                })
            }
            Ok(p_fake) => {
                tracing::warn!(p_fake, "deepfake classifier returned a non-finite score");
                Signal::Fallback(
                    DeepfakeAssessment::fallback(FallbackReason::Failed),
                    FallbackReason::Failed,
                )
            }
            Err(e) => {
                tracing::warn!(error = %e, "deepfake analysis failed");
                Signal::Fallback(
                    DeepfakeAssessment::fallback(FallbackReason::Failed),
                    FallbackReason::Failed,
                )
            }
        }
    }
}
