//! Emotion adapter: remaps a model's native label set onto six canonical
//! labels and picks the dominant one.

use image::RgbImage;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use crate::capability::{Capability, FallbackReason, ModelError, ModelStatus, Signal};

/// Canonical emotion labels reported by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Emotion {
    Happy,
    Neutral,
    Angry,
    Fear,
    Surprise,
    Sad,
}

impl Emotion {
    pub const ALL: [Emotion; 6] = [
        Emotion::Happy,
        Emotion::Neutral,
        Emotion::Angry,
        Emotion::Fear,
        Emotion::Surprise,
        Emotion::Sad,
    ];

    /// Map a native (FER-style) label. `disgust` folds into `Angry`.
    pub fn from_native(label: &str) -> Option<Emotion> {
        match label.to_ascii_lowercase().as_str() {
            "happy" => Some(Emotion::Happy),
            "neutral" => Some(Emotion::Neutral),
            "angry" | "disgust" => Some(Emotion::Angry),
            "fear" => Some(Emotion::Fear),
            "surprise" => Some(Emotion::Surprise),
            "sad" => Some(Emotion::Sad),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Emotion::Happy => "Happy",
            Emotion::Neutral => "Neutral",
            Emotion::Angry => "Angry",
            Emotion::Fear => "Fear",
            Emotion::Surprise => "Surprise",
            Emotion::Sad => "Sad",
        }
    }
}

impl fmt::Display for Emotion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Native label → score mapping for one detected face.
pub type NativeScores = HashMap<String, f32>;

/// Black-box emotion classifier. The first element of the result is used.
pub trait EmotionModel: Send + Sync {
    fn detect_emotions(&self, face: &RgbImage) -> Result<Vec<NativeScores>, ModelError>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmotionAssessment {
    pub label: Emotion,
    pub confidence: f32,
    pub scores: BTreeMap<Emotion, f32>,
}

impl EmotionAssessment {
    fn zero_scores() -> BTreeMap<Emotion, f32> {
        Emotion::ALL.iter().map(|&e| (e, 0.0)).collect()
    }

    /// Neutral at 0.5 with all scores zero.
    pub fn fallback() -> Self {
        Self {
            label: Emotion::Neutral,
            confidence: 0.5,
            scores: Self::zero_scores(),
        }
    }

    /// Value used when a frame contains no face.
    pub fn no_face() -> Self {
        Self {
            label: Emotion::Neutral,
            confidence: 0.0,
            scores: Self::zero_scores(),
        }
    }
}

/// Collapse native scores onto the canonical labels.
///
/// Several native labels mapping to one canonical label keep the maximum,
/// not the sum. The result is renormalised to sum to 1 when any score is
/// positive; unknown labels and non-finite scores are ignored.
pub fn canonicalize(native: &NativeScores) -> EmotionAssessment {
    let mut scores = EmotionAssessment::zero_scores();

    for (label, &value) in native {
        let Some(emotion) = Emotion::from_native(label) else {
            continue;
        };
        if !value.is_finite() {
            continue;
        }
        let slot = scores.entry(emotion).or_insert(0.0);
        *slot = slot.max(value.max(0.0));
    }

    let total: f32 = scores.values().sum();
    if total > 0.0 {
        for v in scores.values_mut() {
            *v /= total;
        }
    }

    let mut label = Emotion::ALL[0];
    let mut confidence = scores[&label];
    for emotion in Emotion::ALL {
        if scores[&emotion] > confidence {
            label = emotion;
            confidence = scores[&emotion];
        }
    }

    EmotionAssessment {
        label,
        confidence,
        scores,
    }
}

pub struct EmotionAdapter {
    model: Capability<dyn EmotionModel>,
}

impl EmotionAdapter {
    pub fn new(model: Capability<dyn EmotionModel>) -> Self {
        Self { model }
    }

    pub fn status(&self) -> ModelStatus {
        self.model.status()
    }

    pub fn assess(&self, crop: &RgbImage) -> Signal<EmotionAssessment> {
        let Some(model) = self.model.get() else {
            return Signal::Fallback(EmotionAssessment::fallback(), FallbackReason::Unavailable);
        };

        match model.detect_emotions(crop) {
            Ok(results) => match results.first() {
                Some(native) => Signal::Measured(canonicalize(native)),
                None => Signal::Fallback(EmotionAssessment::fallback(), FallbackReason::Empty),
            },
            Err(e) => {
                tracing::warn!(error = %e, "emotion analysis failed");
                Signal::Fallback(EmotionAssessment::fallback(), FallbackReason::Failed)
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::Rgb;

    pub(crate) struct FixedEmotion(pub Vec<NativeScores>);

    impl EmotionModel for FixedEmotion {
        fn detect_emotions(&self, _: &RgbImage) -> Result<Vec<NativeScores>, ModelError> {
            Ok(self.0.clone())
        }
    }

    struct FailingEmotion;

    impl EmotionModel for FailingEmotion {
        fn detect_emotions(&self, _: &RgbImage) -> Result<Vec<NativeScores>, ModelError> {
            Err(ModelError::Output("expected 7 scores, got 3".into()))
        }
    }

    pub(crate) fn native(pairs: &[(&str, f32)]) -> NativeScores {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    fn crop() -> RgbImage {
        RgbImage::from_pixel(224, 224, Rgb([90, 90, 90]))
    }

    fn sum(a: &EmotionAssessment) -> f32 {
        a.scores.values().sum()
    }

    #[test]
    fn test_scores_sum_to_one_and_label_is_max() {
        let a = canonicalize(&native(&[
            ("angry", 0.05),
            ("disgust", 0.01),
            ("fear", 0.04),
            ("happy", 0.6),
            ("sad", 0.1),
            ("surprise", 0.1),
            ("neutral", 0.1),
        ]));
        assert!((sum(&a) - 1.0).abs() < 1e-6);
        assert_eq!(a.label, Emotion::Happy);
        let max = a.scores.values().cloned().fold(f32::MIN, f32::max);
        assert_eq!(a.confidence, max);
        assert_eq!(a.scores.len(), 6);
    }

    #[test]
    fn test_many_to_one_keeps_max_not_sum() {
        // angry 0.2 and disgust 0.3 both map to Angry → 0.3 before normalisation
        let a = canonicalize(&native(&[("angry", 0.2), ("disgust", 0.3), ("happy", 0.3)]));
        let angry = a.scores[&Emotion::Angry];
        let happy = a.scores[&Emotion::Happy];
        assert!((angry - 0.5).abs() < 1e-6);
        assert!((happy - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_disgust_dominant_reports_angry() {
        let a = canonicalize(&native(&[("disgust", 0.9), ("neutral", 0.1)]));
        assert_eq!(a.label, Emotion::Angry);
        assert!((a.confidence - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_missing_labels_filled_with_zero() {
        let a = canonicalize(&native(&[("sad", 2.0)]));
        assert_eq!(a.label, Emotion::Sad);
        assert!((a.confidence - 1.0).abs() < 1e-6);
        for e in Emotion::ALL {
            assert!(a.scores.contains_key(&e));
        }
        assert_eq!(a.scores[&Emotion::Fear], 0.0);
    }

    #[test]
    fn test_unknown_and_non_finite_ignored() {
        let a = canonicalize(&native(&[("contempt", 5.0), ("fear", f32::NAN), ("surprise", 1.0)]));
        assert_eq!(a.label, Emotion::Surprise);
        assert!((sum(&a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_all_zero_scores_not_normalised() {
        let a = canonicalize(&native(&[("happy", 0.0), ("sad", 0.0)]));
        assert_eq!(sum(&a), 0.0);
        assert_eq!(a.confidence, 0.0);
    }

    #[test]
    fn test_first_result_used() {
        let adapter = EmotionAdapter::new(Capability::Loaded(Box::new(FixedEmotion(vec![
            native(&[("fear", 1.0)]),
            native(&[("happy", 1.0)]),
        ]))));
        let signal = adapter.assess(&crop());
        assert!(!signal.is_fallback());
        assert_eq!(signal.value().label, Emotion::Fear);
    }

    #[test]
    fn test_unavailable_fallback() {
        let adapter = EmotionAdapter::new(Capability::Unavailable);
        let signal = adapter.assess(&crop());
        assert_eq!(signal.fallback_reason(), Some(FallbackReason::Unavailable));
        assert_eq!(signal.value(), &EmotionAssessment::fallback());
        assert_eq!(signal.value().confidence, 0.5);
        assert_eq!(sum(signal.value()), 0.0);
    }

    #[test]
    fn test_empty_result_fallback() {
        let adapter = EmotionAdapter::new(Capability::Loaded(Box::new(FixedEmotion(vec![]))));
        let signal = adapter.assess(&crop());
        assert_eq!(signal.fallback_reason(), Some(FallbackReason::Empty));
        assert_eq!(signal.value().label, Emotion::Neutral);
    }

    #[test]
    fn test_error_fallback() {
        let adapter = EmotionAdapter::new(Capability::Loaded(Box::new(FailingEmotion)));
        let signal = adapter.assess(&crop());
        assert_eq!(signal.fallback_reason(), Some(FallbackReason::Failed));
        assert_eq!(signal.value(), &EmotionAssessment::fallback());
    }

    #[test]
    fn test_serializes_canonical_keys() {
        let json = serde_json::to_value(EmotionAssessment::fallback()).unwrap();
        assert_eq!(json["label"], "Neutral");
        assert_eq!(json["scores"]["Surprise"], 0.0);
        assert_eq!(json["scores"].as_object().unwrap().len(), 6);
    }
}
