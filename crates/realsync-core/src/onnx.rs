//! ONNX Runtime bindings for the external models.
//!
//! Each binding owns one `ort` session behind a `Mutex` (running a session
//! needs `&mut`), so a single loaded model can be shared by every worker.

use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;
use std::fmt::Display;
use std::path::Path;
use std::sync::{Mutex, PoisonError};

use crate::capability::{Capability, ModelError};
use crate::deepfake::DeepfakeModel;
use crate::detector::{Detection, FaceDetector, RelativeBox};
use crate::emotion::{EmotionModel, NativeScores};
use crate::pipeline::Models;

/// Detector input (width, height), UltraFace RFB-320 layout.
const DETECTOR_INPUT: (u32, u32) = (320, 240);
const DETECTOR_NMS_IOU: f32 = 0.3;

/// FER-2013 input side and output label order.
const EMOTION_INPUT: u32 = 48;
const FER_LABELS: [&str; 7] = ["angry", "disgust", "fear", "happy", "sad", "surprise", "neutral"];

fn load_error(path: &Path, e: impl Display) -> ModelError {
    ModelError::Load {
        path: path.to_path_buf(),
        reason: e.to_string(),
    }
}

fn inference_error(e: impl Display) -> ModelError {
    ModelError::Inference(e.to_string())
}

fn load_session(path: &Path) -> Result<Mutex<Session>, ModelError> {
    if !path.exists() {
        return Err(ModelError::Missing(path.to_path_buf()));
    }
    let session = Session::builder()
        .map_err(|e| load_error(path, e))?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(|e| load_error(path, e))?
        .commit_from_file(path)
        .map_err(|e| load_error(path, e))?;
    Ok(Mutex::new(session))
}

/// Run a single-input session and copy every f32 output out, in output order.
fn run(
    session: &Mutex<Session>,
    shape: [i64; 4],
    data: Vec<f32>,
) -> Result<Vec<(String, Vec<f32>)>, ModelError> {
    let input = Tensor::from_array((shape.to_vec(), data)).map_err(inference_error)?;

    let mut session = session.lock().unwrap_or_else(PoisonError::into_inner);
    let outputs = session.run(ort::inputs![input]).map_err(inference_error)?;

    let mut extracted = Vec::new();
    for name in outputs.keys() {
        let Some(value) = outputs.get(name) else {
            continue;
        };
        let (_, values) = value.try_extract_tensor::<f32>().map_err(inference_error)?;
        extracted.push((name.to_string(), values.to_vec()));
    }
    Ok(extracted)
}

/// Pick an output by name, falling back to its position.
fn output<'a>(
    outputs: &'a [(String, Vec<f32>)],
    name: &str,
    index: usize,
) -> Result<&'a [f32], ModelError> {
    outputs
        .iter()
        .find(|(n, _)| n == name)
        .or_else(|| outputs.get(index))
        .map(|(_, v)| v.as_slice())
        .ok_or_else(|| ModelError::Output(format!("missing output {name:?}")))
}

// ── Face detector ─────────────────────────────────────────────────────────────

pub struct OnnxFaceDetector {
    session: Mutex<Session>,
}

impl OnnxFaceDetector {
    pub fn load(path: &Path) -> Result<Self, ModelError> {
        Ok(Self {
            session: load_session(path)?,
        })
    }
}

impl FaceDetector for OnnxFaceDetector {
    fn detect(&self, image: &RgbImage, min_confidence: f32) -> Result<Vec<Detection>, ModelError> {
        let (w, h) = DETECTOR_INPUT;
        let resized = imageops::resize(image, w, h, FilterType::Triangle);

        let mut data = Vec::with_capacity(3 * (w * h) as usize);
        for c in 0..3 {
            for y in 0..h {
                for x in 0..w {
                    data.push((resized.get_pixel(x, y)[c] as f32 - 127.0) / 128.0);
                }
            }
        }

        let outputs = run(&self.session, [1, 3, h as i64, w as i64], data)?;
        let scores = output(&outputs, "scores", 0)?;
        let boxes = output(&outputs, "boxes", 1)?;

        let detections = decode_detections(scores, boxes, min_confidence)?;
        Ok(non_max_suppression(detections, DETECTOR_NMS_IOU))
    }
}

/// Decode `[N, 2]` background/face scores and `[N, 4]` relative corner boxes.
fn decode_detections(
    scores: &[f32],
    boxes: &[f32],
    min_confidence: f32,
) -> Result<Vec<Detection>, ModelError> {
    if scores.len() % 2 != 0 || boxes.len() != scores.len() * 2 {
        return Err(ModelError::Output(format!(
            "detector output mismatch: {} scores, {} box values",
            scores.len(),
            boxes.len()
        )));
    }

    Ok(scores
        .chunks_exact(2)
        .zip(boxes.chunks_exact(4))
        .filter(|(s, _)| s[1] >= min_confidence)
        .map(|(s, b)| Detection {
            bbox: RelativeBox {
                x: b[0],
                y: b[1],
                width: b[2] - b[0],
                height: b[3] - b[1],
            },
            confidence: s[1],
        })
        .collect())
}

fn iou(a: &RelativeBox, b: &RelativeBox) -> f32 {
    let ix = ((a.x + a.width).min(b.x + b.width) - a.x.max(b.x)).max(0.0);
    let iy = ((a.y + a.height).min(b.y + b.height) - a.y.max(b.y)).max(0.0);
    let inter = ix * iy;
    let union = a.width * a.height + b.width * b.height - inter;
    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}

/// Greedy NMS; survivors come out in descending confidence order.
pub fn non_max_suppression(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept: Vec<Detection> = Vec::new();
    for det in detections {
        if kept.iter().all(|k| iou(&k.bbox, &det.bbox) <= iou_threshold) {
            kept.push(det);
        }
    }
    kept
}

// ── Deepfake classifier ───────────────────────────────────────────────────────

pub struct OnnxDeepfakeModel {
    session: Mutex<Session>,
}

impl OnnxDeepfakeModel {
    pub fn load(path: &Path) -> Result<Self, ModelError> {
        Ok(Self {
            session: load_session(path)?,
        })
    }
}

impl DeepfakeModel for OnnxDeepfakeModel {
    fn predict(&self, batch: &Array4<f32>) -> Result<f32, ModelError> {
        let shape = batch.shape();
        let dims = [
            shape[0] as i64,
            shape[1] as i64,
            shape[2] as i64,
            shape[3] as i64,
        ];
        let data: Vec<f32> = batch.iter().copied().collect();

        let outputs = run(&self.session, dims, data)?;
        let values = outputs
            .first()
            .map(|(_, v)| v.as_slice())
            .ok_or_else(|| ModelError::Output("deepfake model produced no output".into()))?;
        values
            .first()
            .copied()
            .ok_or_else(|| ModelError::Output("deepfake output tensor is empty".into()))
    }
}

// ── Emotion classifier ────────────────────────────────────────────────────────

pub struct OnnxEmotionModel {
    session: Mutex<Session>,
}

impl OnnxEmotionModel {
    pub fn load(path: &Path) -> Result<Self, ModelError> {
        Ok(Self {
            session: load_session(path)?,
        })
    }
}

impl EmotionModel for OnnxEmotionModel {
    fn detect_emotions(&self, face: &RgbImage) -> Result<Vec<NativeScores>, ModelError> {
        let gray = imageops::grayscale(face);
        let gray = imageops::resize(&gray, EMOTION_INPUT, EMOTION_INPUT, FilterType::Triangle);
        let data: Vec<f32> = gray.as_raw().iter().map(|&v| v as f32 / 255.0).collect();

        let side = EMOTION_INPUT as i64;
        let outputs = run(&self.session, [1, 1, side, side], data)?;
        let logits = outputs
            .first()
            .map(|(_, v)| v.as_slice())
            .ok_or_else(|| ModelError::Output("emotion model produced no output".into()))?;

        Ok(vec![fer_scores(logits)?])
    }
}

/// Map the seven FER outputs to native labels, applying softmax unless the
/// outputs already form a probability distribution.
fn fer_scores(raw: &[f32]) -> Result<NativeScores, ModelError> {
    if raw.len() != FER_LABELS.len() {
        return Err(ModelError::Output(format!(
            "expected {} emotion scores, got {}",
            FER_LABELS.len(),
            raw.len()
        )));
    }

    let sum: f32 = raw.iter().sum();
    let is_distribution = raw.iter().all(|v| (0.0..=1.0).contains(v)) && (sum - 1.0).abs() < 1e-3;
    let probs: Vec<f32> = if is_distribution {
        raw.to_vec()
    } else {
        let max = raw.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let exps: Vec<f32> = raw.iter().map(|v| (v - max).exp()).collect();
        let total: f32 = exps.iter().sum();
        exps.iter().map(|e| e / total).collect()
    };

    Ok(FER_LABELS
        .iter()
        .zip(probs)
        .map(|(label, p)| (label.to_string(), p))
        .collect())
}

// ── Startup selection ─────────────────────────────────────────────────────────

pub fn detector_capability(path: &Path) -> Capability<dyn FaceDetector> {
    Capability::load("face_detection", path, |p| {
        Ok(Box::new(OnnxFaceDetector::load(p)?) as Box<dyn FaceDetector>)
    })
}

pub fn deepfake_capability(path: &Path) -> Capability<dyn DeepfakeModel> {
    Capability::load("deepfake", path, |p| {
        Ok(Box::new(OnnxDeepfakeModel::load(p)?) as Box<dyn DeepfakeModel>)
    })
}

pub fn emotion_capability(path: &Path) -> Capability<dyn EmotionModel> {
    Capability::load("emotion", path, |p| {
        Ok(Box::new(OnnxEmotionModel::load(p)?) as Box<dyn EmotionModel>)
    })
}

/// Load all three models. Each one independently degrades to its fallback.
pub fn load_models(detector: &Path, deepfake: &Path, emotion: &Path) -> Models {
    Models {
        detector: detector_capability(detector),
        deepfake: deepfake_capability(deepfake),
        emotion: emotion_capability(emotion),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::ModelStatus;

    fn rel(x: f32, y: f32, w: f32, h: f32, confidence: f32) -> Detection {
        Detection {
            bbox: RelativeBox {
                x,
                y,
                width: w,
                height: h,
            },
            confidence,
        }
    }

    #[test]
    fn test_iou() {
        let a = RelativeBox {
            x: 0.0,
            y: 0.0,
            width: 0.5,
            height: 0.5,
        };
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
        let b = RelativeBox {
            x: 0.25,
            y: 0.0,
            width: 0.5,
            height: 0.5,
        };
        // overlap 0.25 x 0.5 = 0.125; union 0.25 + 0.25 - 0.125
        assert!((iou(&a, &b) - 1.0 / 3.0).abs() < 1e-6);
        let c = RelativeBox {
            x: 0.6,
            y: 0.6,
            width: 0.1,
            height: 0.1,
        };
        assert_eq!(iou(&a, &c), 0.0);
    }

    #[test]
    fn test_nms_suppresses_overlaps_and_orders_by_score() {
        let kept = non_max_suppression(
            vec![
                rel(0.0, 0.0, 0.3, 0.3, 0.7),
                rel(0.01, 0.01, 0.3, 0.3, 0.9),
                rel(0.6, 0.6, 0.2, 0.2, 0.8),
            ],
            0.3,
        );
        assert_eq!(kept.len(), 2);
        assert!((kept[0].confidence - 0.9).abs() < 1e-6);
        assert!((kept[1].confidence - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_decode_detections() {
        let scores = [0.9, 0.1, 0.2, 0.8];
        let boxes = [0.0, 0.0, 0.1, 0.1, 0.2, 0.3, 0.6, 0.9];
        let dets = decode_detections(&scores, &boxes, 0.5).unwrap();
        assert_eq!(dets.len(), 1);
        let d = dets[0];
        assert!((d.confidence - 0.8).abs() < 1e-6);
        assert!((d.bbox.x - 0.2).abs() < 1e-6);
        assert!((d.bbox.width - 0.4).abs() < 1e-6);
        assert!((d.bbox.height - 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_decode_rejects_mismatched_outputs() {
        assert!(matches!(
            decode_detections(&[0.1, 0.9], &[0.0, 0.0, 1.0], 0.5),
            Err(ModelError::Output(_))
        ));
    }

    #[test]
    fn test_fer_scores_passthrough_distribution() {
        let raw = [0.1, 0.0, 0.1, 0.5, 0.1, 0.1, 0.1];
        let scores = fer_scores(&raw).unwrap();
        assert_eq!(scores.len(), 7);
        assert!((scores["happy"] - 0.5).abs() < 1e-6);
        assert!((scores["disgust"]).abs() < 1e-6);
    }

    #[test]
    fn test_fer_scores_softmax_logits() {
        let raw = [2.0, -1.0, 0.0, 5.0, 1.0, 0.5, 3.0];
        let scores = fer_scores(&raw).unwrap();
        let total: f32 = scores.values().sum();
        assert!((total - 1.0).abs() < 1e-5);
        let best = scores
            .iter()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(k, _)| k.as_str());
        assert_eq!(best, Some("happy"));
    }

    #[test]
    fn test_fer_scores_wrong_length() {
        assert!(fer_scores(&[0.5, 0.5]).is_err());
    }

    #[test]
    fn test_missing_model_files_are_unavailable() {
        let dir = std::env::temp_dir().join("realsync-onnx-test-missing");
        let models = load_models(
            &dir.join("detector.onnx"),
            &dir.join("deepfake.onnx"),
            &dir.join("emotion.onnx"),
        );
        assert_eq!(models.detector.status(), ModelStatus::Unavailable);
        assert_eq!(models.deepfake.status(), ModelStatus::Unavailable);
        assert_eq!(models.emotion.status(), ModelStatus::Unavailable);
    }

    #[test]
    fn test_load_missing_file_reports_missing() {
        let path = std::env::temp_dir().join("realsync-onnx-test-missing/none.onnx");
        assert!(matches!(
            OnnxDeepfakeModel::load(&path),
            Err(ModelError::Missing(_))
        ));
    }
}
