use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::intake::ValidatedImage;

/// Bounding region for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceRegion {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl FaceRegion {
    pub fn area(&self) -> f32 {
        self.width * self.height
    }
}

/// Fixed-length biometric descriptor derived from exactly one face region.
///
/// Descriptors are L2-normalized by the extractor. Two descriptors are only
/// comparable when their `model_version` tags agree; similarity scores across
/// extractor versions mean nothing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Descriptor {
    pub values: Vec<f32>,
    /// Extractor model version that produced this descriptor (e.g., "w600k_r50").
    pub model_version: String,
}

impl Descriptor {
    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Cosine similarity in [-1, 1]. Higher = more similar.
    ///
    /// Always processes all dimensions; no early return on mismatch, to avoid
    /// a timing side-channel leaking where a probe diverges.
    pub fn similarity(&self, other: &Descriptor) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 { dot / denom } else { 0.0 }
    }

    /// Euclidean (L2) distance. Kept as a diagnostic helper; the matching
    /// policy is cosine similarity.
    pub fn euclidean_distance(&self, other: &Descriptor) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// One validated image-derived observation, flowing through a single
/// enroll or verify invocation. Never persisted; only the descriptor
/// extracted from it survives a successful enrollment.
#[derive(Debug, Clone)]
pub struct FaceSample {
    /// Trainee this sample claims to belong to. `None` for verify captures,
    /// where identity is the question, not an input.
    pub trainee_id: Option<String>,
    pub captured_at: DateTime<Utc>,
    pub image: ValidatedImage,
}

impl FaceSample {
    pub fn new(trainee_id: Option<String>, image: ValidatedImage) -> Self {
        Self {
            trainee_id,
            captured_at: Utc::now(),
            image,
        }
    }
}

/// A descriptor as held by the enrollment store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredDescriptor {
    pub id: String,
    pub trainee_id: String,
    pub descriptor: Descriptor,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desc(values: Vec<f32>) -> Descriptor {
        Descriptor {
            values,
            model_version: "test".into(),
        }
    }

    #[test]
    fn test_similarity_identical() {
        let a = desc(vec![1.0, 0.0, 0.0]);
        let b = desc(vec![1.0, 0.0, 0.0]);
        assert!((a.similarity(&b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_similarity_orthogonal() {
        let a = desc(vec![1.0, 0.0]);
        let b = desc(vec![0.0, 1.0]);
        assert!(a.similarity(&b).abs() < 1e-6);
    }

    #[test]
    fn test_similarity_opposite() {
        let a = desc(vec![1.0, 0.0]);
        let b = desc(vec![-1.0, 0.0]);
        assert!((a.similarity(&b) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_similarity_zero_vector() {
        let a = desc(vec![0.0, 0.0]);
        let b = desc(vec![1.0, 0.0]);
        assert_eq!(a.similarity(&b), 0.0);
    }

    #[test]
    fn test_euclidean_distance() {
        let a = desc(vec![0.0, 0.0]);
        let b = desc(vec![3.0, 4.0]);
        assert!((a.euclidean_distance(&b) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_region_area() {
        let r = FaceRegion {
            x: 10.0,
            y: 10.0,
            width: 20.0,
            height: 30.0,
            confidence: 0.9,
            landmarks: None,
        };
        assert!((r.area() - 600.0).abs() < 1e-6);
    }
}
