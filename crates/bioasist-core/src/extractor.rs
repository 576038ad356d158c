//! ArcFace descriptor extractor via ONNX Runtime.
//!
//! Converts exactly one detected face region into a 512-dimensional
//! L2-normalized descriptor, tagged with the model version that produced it.
//! A policy-configured quality gate rejects crops too small or too flat to
//! yield a reliable descriptor.

use crate::alignment::{self, ALIGNED_SIZE};
use crate::intake::ValidatedImage;
use crate::types::{Descriptor, FaceRegion};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

const ARCFACE_INPUT_SIZE: usize = 112;
const ARCFACE_MEAN: f32 = 127.5;
const ARCFACE_STD: f32 = 127.5; // symmetric normalization, unlike SCRFD
const ARCFACE_DESCRIPTOR_DIM: usize = 512;
const ARCFACE_MODEL_VERSION: &str = "w600k_r50";

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("face region has no landmarks; detector must supply landmarks for alignment")]
    NoLandmarks,
    #[error("face region {width:.0}x{height:.0} below minimum {min} px")]
    RegionTooSmall { width: f32, height: f32, min: u32 },
    #[error("aligned crop contrast {got:.2} below minimum {min:.2}")]
    LowContrast { got: f32, min: f32 },
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Extractor quality policy. Deployment configuration, not constants.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ExtractorConfig {
    /// Minimum face region side length in source pixels.
    pub min_region_size: u32,
    /// Minimum luma standard deviation of the aligned crop.
    pub min_contrast: f32,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            min_region_size: 48,
            min_contrast: 10.0,
        }
    }
}

/// Derives a fixed-length descriptor from one face region of a validated
/// image. Deterministic for identical input; never mutates the image.
pub trait ExtractDescriptor: Send {
    fn extract(
        &mut self,
        image: &ValidatedImage,
        region: &FaceRegion,
    ) -> Result<Descriptor, ExtractError>;

    /// Version tag stamped on every descriptor this extractor produces.
    fn model_version(&self) -> &str;
}

/// ArcFace-based descriptor extractor.
pub struct ArcFaceExtractor {
    session: Session,
    config: ExtractorConfig,
}

impl ArcFaceExtractor {
    /// Load the ArcFace ONNX model from the given path.
    pub fn load(model_path: &str, config: ExtractorConfig) -> Result<Self, ExtractError> {
        if !Path::new(model_path).exists() {
            return Err(ExtractError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(path = model_path, "loaded ArcFace model");

        Ok(Self { session, config })
    }

    /// Preprocess a 112x112 RGB aligned crop into a NCHW float tensor.
    fn preprocess(aligned: &[u8]) -> Array4<f32> {
        let size = ARCFACE_INPUT_SIZE;
        let mut tensor = Array4::<f32>::zeros((1, 3, size, size));

        for y in 0..size {
            for x in 0..size {
                for c in 0..3 {
                    let pixel = aligned.get((y * size + x) * 3 + c).copied().unwrap_or(0) as f32;
                    tensor[[0, c, y, x]] = (pixel - ARCFACE_MEAN) / ARCFACE_STD;
                }
            }
        }

        tensor
    }
}

impl ExtractDescriptor for ArcFaceExtractor {
    fn extract(
        &mut self,
        image: &ValidatedImage,
        region: &FaceRegion,
    ) -> Result<Descriptor, ExtractError> {
        check_region_size(region, self.config.min_region_size)?;

        let landmarks = region.landmarks.as_ref().ok_or(ExtractError::NoLandmarks)?;
        let aligned = alignment::align_face(&image.pixels, image.width, image.height, landmarks);

        let contrast = luma_std_dev(&aligned);
        if contrast < self.config.min_contrast {
            return Err(ExtractError::LowContrast {
                got: contrast,
                min: self.config.min_contrast,
            });
        }

        let input = Self::preprocess(&aligned);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw_data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| ExtractError::InferenceFailed(format!("descriptor extraction: {e}")))?;

        let raw: Vec<f32> = raw_data.to_vec();

        if raw.len() != ARCFACE_DESCRIPTOR_DIM {
            return Err(ExtractError::InferenceFailed(format!(
                "expected {ARCFACE_DESCRIPTOR_DIM}-dim descriptor, got {}",
                raw.len()
            )));
        }

        Ok(Descriptor {
            values: l2_normalize(raw),
            model_version: ARCFACE_MODEL_VERSION.to_string(),
        })
    }

    fn model_version(&self) -> &str {
        ARCFACE_MODEL_VERSION
    }
}

fn check_region_size(region: &FaceRegion, min: u32) -> Result<(), ExtractError> {
    if region.width < min as f32 || region.height < min as f32 {
        return Err(ExtractError::RegionTooSmall {
            width: region.width,
            height: region.height,
            min,
        });
    }
    Ok(())
}

/// Standard deviation of luma across an aligned RGB crop.
fn luma_std_dev(aligned: &[u8]) -> f32 {
    let n = ALIGNED_SIZE * ALIGNED_SIZE;
    let mut sum = 0.0f64;
    let mut sum_sq = 0.0f64;

    for i in 0..n {
        let r = aligned[i * 3] as f64;
        let g = aligned[i * 3 + 1] as f64;
        let b = aligned[i * 3 + 2] as f64;
        let luma = 0.299 * r + 0.587 * g + 0.114 * b;
        sum += luma;
        sum_sq += luma * luma;
    }

    let mean = sum / n as f64;
    let variance = (sum_sq / n as f64 - mean * mean).max(0.0);
    variance.sqrt() as f32
}

fn l2_normalize(raw: Vec<f32>) -> Vec<f32> {
    let norm: f32 = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        raw.iter().map(|x| x / norm).collect()
    } else {
        raw
    }
}
