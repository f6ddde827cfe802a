//! Face location: wraps the external detector and turns its relative boxes
//! into padded, fixed-size face crops.

use image::imageops::{self, FilterType};
use image::RgbImage;
use serde::Serialize;

use crate::capability::{Capability, ModelError, ModelStatus};
use crate::config::PipelineConfig;

/// Box in coordinates relative to the frame dimensions (0..1).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RelativeBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// One raw detector output.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub bbox: RelativeBox,
    pub confidence: f32,
}

/// Pluggable face detection backend.
///
/// Implementations receive the RGB frame and the minimum confidence they
/// may use to pre-filter; the locator applies the threshold again.
pub trait FaceDetector: Send + Sync {
    fn detect(&self, image: &RgbImage, min_confidence: f32) -> Result<Vec<Detection>, ModelError>;
}

/// Unpadded face box in pixels, as reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BoundingBox {
    pub x: i32,
    pub y: i32,
    #[serde(rename = "w")]
    pub width: i32,
    #[serde(rename = "h")]
    pub height: i32,
}

/// A located face ready for the classifier adapters.
#[derive(Debug, Clone)]
pub struct FaceCandidate {
    /// Detector emission index within this frame. Not a cross-frame identity.
    pub slot: usize,
    pub bbox: BoundingBox,
    pub confidence: f32,
    /// Padded crop resized to `crop_size` × `crop_size`.
    pub crop: RgbImage,
}

/// Padded crop rectangle, clamped to the frame: `[x1, x2) × [y1, y2)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CropRegion {
    x1: i32,
    y1: i32,
    x2: i32,
    y2: i32,
}

impl CropRegion {
    fn width(&self) -> i32 {
        self.x2 - self.x1
    }

    fn height(&self) -> i32 {
        self.y2 - self.y1
    }
}

/// Convert a relative detection into its pixel box and padded crop region.
///
/// Padding is `padding` × box size on each side, computed independently
/// for width and height, and the result is clamped to the frame.
fn pixel_regions(
    det: &RelativeBox,
    frame_width: u32,
    frame_height: u32,
    padding: f32,
) -> (BoundingBox, CropRegion) {
    let w = frame_width as f32;
    let h = frame_height as f32;

    let bbox = BoundingBox {
        x: (det.x * w) as i32,
        y: (det.y * h) as i32,
        width: (det.width * w) as i32,
        height: (det.height * h) as i32,
    };

    let pad_w = (bbox.width as f32 * padding) as i64;
    let pad_h = (bbox.height as f32 * padding) as i64;

    // Detector output is untrusted; widen before adding so wild boxes clamp
    // to an empty region instead of overflowing.
    let fw = i64::from(frame_width);
    let fh = i64::from(frame_height);
    let (x, y) = (i64::from(bbox.x), i64::from(bbox.y));
    let (bw, bh) = (i64::from(bbox.width), i64::from(bbox.height));

    let region = CropRegion {
        x1: narrow((x - pad_w).clamp(0, fw)),
        y1: narrow((y - pad_h).clamp(0, fh)),
        x2: narrow((x + bw + pad_w).clamp(0, fw)),
        y2: narrow((y + bh + pad_h).clamp(0, fh)),
    };

    (bbox, region)
}

fn narrow(v: i64) -> i32 {
    i32::try_from(v).unwrap_or(i32::MAX)
}

/// Face Locator: confidence filter, padding, crop rejection and resize.
pub struct FaceLocator {
    detector: Capability<dyn FaceDetector>,
    confidence_threshold: f32,
    padding: f32,
    min_side: u32,
    crop_size: u32,
}

impl FaceLocator {
    pub fn new(detector: Capability<dyn FaceDetector>, config: &PipelineConfig) -> Self {
        Self {
            detector,
            confidence_threshold: config.face_confidence_threshold,
            padding: config.face_padding,
            min_side: config.min_crop_side,
            crop_size: config.crop_size,
        }
    }

    pub fn status(&self) -> ModelStatus {
        self.detector.status()
    }

    /// Locate faces in a decoded frame.
    ///
    /// Never fails: an unavailable or failing detector yields an empty list.
    pub fn locate(&self, frame: &RgbImage) -> Vec<FaceCandidate> {
        let Some(detector) = self.detector.get() else {
            return Vec::new();
        };

        let detections = match detector.detect(frame, self.confidence_threshold) {
            Ok(d) => d,
            Err(e) => {
                tracing::warn!(error = %e, "face detection failed, treating frame as empty");
                return Vec::new();
            }
        };

        let (frame_width, frame_height) = frame.dimensions();
        let mut faces = Vec::with_capacity(detections.len());

        for (slot, det) in detections.iter().enumerate() {
            if det.confidence.is_nan() || det.confidence < self.confidence_threshold {
                continue;
            }

            let (bbox, region) = pixel_regions(&det.bbox, frame_width, frame_height, self.padding);
            if region.width() < self.min_side as i32 || region.height() < self.min_side as i32 {
                tracing::debug!(
                    slot,
                    width = region.width(),
                    height = region.height(),
                    "skipping undersized face crop"
                );
                continue;
            }

            let crop = imageops::crop_imm(
                frame,
                region.x1 as u32,
                region.y1 as u32,
                region.width() as u32,
                region.height() as u32,
            )
            .to_image();
            let crop = imageops::resize(&crop, self.crop_size, self.crop_size, FilterType::Triangle);

            faces.push(FaceCandidate {
                slot,
                bbox,
                confidence: det.confidence,
                crop,
            });
        }

        faces
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::Rgb;

    /// Detector double returning a fixed list of detections.
    pub(crate) struct FixedDetector(pub Vec<Detection>);

    impl FaceDetector for FixedDetector {
        fn detect(&self, _: &RgbImage, _: f32) -> Result<Vec<Detection>, ModelError> {
            Ok(self.0.clone())
        }
    }

    struct BrokenDetector;

    impl FaceDetector for BrokenDetector {
        fn detect(&self, _: &RgbImage, _: f32) -> Result<Vec<Detection>, ModelError> {
            Err(ModelError::Inference("device lost".into()))
        }
    }

    pub(crate) fn det(x: f32, y: f32, width: f32, height: f32, confidence: f32) -> Detection {
        Detection {
            bbox: RelativeBox {
                x,
                y,
                width,
                height,
            },
            confidence,
        }
    }

    fn locator(detections: Vec<Detection>) -> FaceLocator {
        FaceLocator::new(
            Capability::Loaded(Box::new(FixedDetector(detections))),
            &PipelineConfig::default(),
        )
    }

    fn frame() -> RgbImage {
        RgbImage::from_fn(200, 100, |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, 128]))
    }

    #[test]
    fn test_reports_unpadded_box_and_fixed_crop() {
        let faces = locator(vec![det(0.25, 0.2, 0.5, 0.6, 0.9)]).locate(&frame());
        assert_eq!(faces.len(), 1);
        let face = &faces[0];
        assert_eq!(face.slot, 0);
        assert_eq!(
            face.bbox,
            BoundingBox {
                x: 50,
                y: 20,
                width: 100,
                height: 60
            }
        );
        assert_eq!(face.crop.dimensions(), (224, 224));
        assert!((face.confidence - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_padding_is_clamped_to_frame() {
        let (_, region) = pixel_regions(
            &RelativeBox {
                x: 0.0,
                y: 0.0,
                width: 0.5,
                height: 0.5,
            },
            200,
            100,
            0.3,
        );
        // box 100x50 at origin; pad 30/15, left/top clamp to 0
        assert_eq!(
            region,
            CropRegion {
                x1: 0,
                y1: 0,
                x2: 130,
                y2: 65
            }
        );
    }

    #[test]
    fn test_padding_independent_per_axis() {
        let (_, region) = pixel_regions(
            &RelativeBox {
                x: 0.4,
                y: 0.4,
                width: 0.2,
                height: 0.1,
            },
            100,
            100,
            0.3,
        );
        // 20x10 box at (40,40): pad 6 horizontally, 3 vertically
        assert_eq!(
            region,
            CropRegion {
                x1: 34,
                y1: 37,
                x2: 66,
                y2: 53
            }
        );
    }

    #[test]
    fn test_low_confidence_dropped() {
        let faces = locator(vec![det(0.1, 0.1, 0.5, 0.5, 0.49), det(0.3, 0.2, 0.4, 0.6, 0.5)])
            .locate(&frame());
        assert_eq!(faces.len(), 1);
        // slot keeps the detector emission index
        assert_eq!(faces[0].slot, 1);
    }

    #[test]
    fn test_undersized_crop_rejected() {
        // 10x8 px box on a 200x100 frame: padded to 16x12 → below 20
        let faces = locator(vec![det(0.5, 0.5, 0.05, 0.08, 0.99)]).locate(&frame());
        assert!(faces.is_empty());
    }

    #[test]
    fn test_crop_small_after_clamping_rejected() {
        // Box mostly outside the frame: only a sliver survives clamping
        let faces = locator(vec![det(0.99, 0.0, 0.05, 0.9, 0.99)]).locate(&frame());
        assert!(faces.is_empty());
    }

    #[test]
    fn test_box_entirely_outside_is_rejected() {
        let faces = locator(vec![det(1.5, 1.5, 0.2, 0.2, 0.99)]).locate(&frame());
        assert!(faces.is_empty());
    }

    #[test]
    fn test_wild_coordinates_skip_the_crop() {
        let wide = RgbImage::new(2000, 100);
        let faces = locator(vec![
            det(2.0e6, 0.1, 2.0e6, 0.5, 0.9),
            det(-3.0e9, -3.0e9, 1.0e10, 0.5, 0.9),
            det(f32::INFINITY, 0.0, f32::NAN, 0.5, 0.9),
        ])
        .locate(&wide);
        assert!(faces.is_empty());

        let (_, region) = pixel_regions(
            &RelativeBox {
                x: 2.0e6,
                y: 0.1,
                width: 2.0e6,
                height: 0.5,
            },
            2000,
            100,
            0.3,
        );
        assert_eq!(region.x1, 2000);
        assert_eq!(region.width(), 0);
    }

    #[test]
    fn test_unavailable_detector_yields_no_faces() {
        let locator = FaceLocator::new(Capability::Unavailable, &PipelineConfig::default());
        assert!(locator.locate(&frame()).is_empty());
        assert_eq!(locator.status(), ModelStatus::Unavailable);
    }

    #[test]
    fn test_failing_detector_yields_no_faces() {
        let locator = FaceLocator::new(
            Capability::Loaded(Box::new(BrokenDetector)),
            &PipelineConfig::default(),
        );
        assert!(locator.locate(&frame()).is_empty());
    }

    #[test]
    fn test_emission_order_preserved() {
        let faces = locator(vec![det(0.6, 0.2, 0.3, 0.6, 0.6), det(0.05, 0.2, 0.3, 0.6, 0.95)])
            .locate(&frame());
        assert_eq!(faces.len(), 2);
        assert_eq!(faces[0].slot, 0);
        assert_eq!(faces[1].slot, 1);
        assert!(faces[0].bbox.x > faces[1].bbox.x);
    }
}
