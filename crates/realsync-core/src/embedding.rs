//! Lightweight identity embedding: a fixed, seeded random projection of the
//! face crop followed by L2 normalisation.
//!
//! This is a stand-in for a face-recognition network. It is not
//! perceptually meaningful, but it is deterministic across runs and
//! sensitive to changes in facial appearance, which is all the continuity
//! tracker needs.

use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, StandardNormal};

/// Scale applied to the projection weights. Irrelevant after normalisation
/// but keeps raw projections in a comfortable float range.
const PROJECTION_SCALE: f32 = 0.01;

/// Normalise `v` to unit length in place.
///
/// Returns `false` (and leaves `v` untouched) when the norm is zero.
pub fn l2_normalize(v: &mut [f32]) -> bool {
    let norm = l2_norm(v);
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
        true
    } else {
        false
    }
}

pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Cosine similarity; 0.0 when either vector has zero norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let denom = l2_norm(a) * l2_norm(b);
    if denom > 0.0 {
        dot / denom
    } else {
        0.0
    }
}

/// Seeded random linear map from a `side × side × 3` crop to `dim` values.
pub struct ProjectionEmbedder {
    side: u32,
    projection: Array2<f32>,
}

impl ProjectionEmbedder {
    pub fn new(side: u32, dim: usize, seed: u64) -> Self {
        let input_len = side as usize * side as usize * 3;
        let mut rng = StdRng::seed_from_u64(seed);
        let projection = Array2::from_shape_simple_fn((dim, input_len), || {
            let z: f32 = StandardNormal.sample(&mut rng);
            z * PROJECTION_SCALE
        });

        tracing::debug!(side, dim, seed, "identity projection initialised");
        Self { side, projection }
    }

    pub fn dim(&self) -> usize {
        self.projection.nrows()
    }

    pub fn side(&self) -> u32 {
        self.side
    }

    /// Project a face crop into a unit-length embedding.
    ///
    /// Crops of another size are resized first. If the raw projection has
    /// zero norm the vector is returned unnormalised.
    pub fn compute_embedding(&self, crop: &RgbImage) -> Vec<f32> {
        let resized;
        let crop = if crop.dimensions() == (self.side, self.side) {
            crop
        } else {
            resized = imageops::resize(crop, self.side, self.side, FilterType::Triangle);
            &resized
        };

        let flat: Array1<f32> = crop.as_raw().iter().map(|&v| v as f32 / 255.0).collect();
        let mut embedding = self.projection.dot(&flat).to_vec();
        l2_normalize(&mut embedding);
        embedding
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    // Small crops keep the projection matrix cheap to build in tests.
    const SIDE: u32 = 16;
    const DIM: usize = 32;

    fn face(seed: u8) -> RgbImage {
        RgbImage::from_fn(SIDE, SIDE, |x, y| {
            Rgb([
                (x as u8).wrapping_mul(13).wrapping_add(seed),
                (y as u8).wrapping_mul(7).wrapping_add(seed.wrapping_mul(3)),
                ((x + y) as u8).wrapping_mul(5),
            ])
        })
    }

    #[test]
    fn test_embedding_is_unit_length() {
        let embedder = ProjectionEmbedder::new(SIDE, DIM, 42);
        for seed in [0u8, 17, 99, 200] {
            let e = embedder.compute_embedding(&face(seed));
            assert_eq!(e.len(), DIM);
            assert!((l2_norm(&e) - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn test_black_crop_left_unnormalised() {
        let embedder = ProjectionEmbedder::new(SIDE, DIM, 42);
        let e = embedder.compute_embedding(&RgbImage::new(SIDE, SIDE));
        assert!(e.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_same_seed_is_reproducible() {
        let a = ProjectionEmbedder::new(SIDE, DIM, 42).compute_embedding(&face(5));
        let b = ProjectionEmbedder::new(SIDE, DIM, 42).compute_embedding(&face(5));
        assert_eq!(a, b);
    }

    #[test]
    fn test_different_seed_changes_projection() {
        let a = ProjectionEmbedder::new(SIDE, DIM, 42).compute_embedding(&face(5));
        let b = ProjectionEmbedder::new(SIDE, DIM, 7).compute_embedding(&face(5));
        assert_ne!(a, b);
    }

    #[test]
    fn test_stable_for_same_face_sensitive_to_different_face() {
        let embedder = ProjectionEmbedder::new(SIDE, DIM, 42);
        let a = embedder.compute_embedding(&face(10));
        let same = embedder.compute_embedding(&face(10));
        let inverted = RgbImage::from_fn(SIDE, SIDE, |x, y| {
            let p = face(10).get_pixel(x, y).0;
            Rgb([255 - p[0], 255 - p[1], 255 - p[2]])
        });
        let other = embedder.compute_embedding(&inverted);
        assert!((cosine_similarity(&a, &same) - 1.0).abs() < 1e-5);
        assert!(cosine_similarity(&a, &other) < 0.999);
    }

    #[test]
    fn test_other_sizes_resized() {
        let embedder = ProjectionEmbedder::new(SIDE, DIM, 42);
        let big = RgbImage::from_pixel(40, 30, Rgb([120, 60, 30]));
        let e = embedder.compute_embedding(&big);
        assert_eq!(e.len(), DIM);
        assert!((l2_norm(&e) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_cosine_similarity_zero_vector() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert!((cosine_similarity(&[1.0, 0.0], &[0.0, 2.0])).abs() < 1e-6);
        assert!((cosine_similarity(&[3.0, 4.0], &[3.0, 4.0]) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_l2_normalize_reports_zero_norm() {
        let mut zero = vec![0.0f32; 4];
        assert!(!l2_normalize(&mut zero));
        let mut v = vec![3.0f32, 4.0];
        assert!(l2_normalize(&mut v));
        assert!((v[0] - 0.6).abs() < 1e-6 && (v[1] - 0.8).abs() < 1e-6);
    }
}
