//! Image intake and validation.
//!
//! First stage of both workflows: takes the opaque byte payload uploaded by
//! the mobile client and either rejects it or normalizes it into an 8-bit
//! RGB buffer the detector and extractor agree on.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IntakeError {
    #[error("empty image payload")]
    EmptyPayload,
    #[error("image payload is {got} bytes, limit is {limit}")]
    PayloadTooLarge { got: usize, limit: usize },
    #[error("payload is not a decodable image: {0}")]
    Undecodable(String),
    #[error("image is {width}x{height}, dimension limit is {limit}")]
    DimensionsTooLarge { width: u32, height: u32, limit: u32 },
}

/// Intake limits. Deployment configuration, not constants.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct IntakePolicy {
    /// Maximum accepted payload size in bytes.
    pub max_bytes: usize,
    /// Maximum accepted width or height in pixels.
    pub max_dimension: u32,
}

impl Default for IntakePolicy {
    fn default() -> Self {
        Self {
            max_bytes: 8 * 1024 * 1024,
            max_dimension: 4096,
        }
    }
}

/// A decoded, size-checked image, normalized to interleaved 8-bit RGB.
#[derive(Debug, Clone)]
pub struct ValidatedImage {
    /// Interleaved RGB, row-major, `width * height * 3` bytes.
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl ValidatedImage {
    /// Luma (ITU-R BT.601) of the pixel at (x, y). Used by quality gates.
    pub fn luma(&self, x: u32, y: u32) -> f32 {
        let idx = ((y * self.width + x) * 3) as usize;
        let r = self.pixels[idx] as f32;
        let g = self.pixels[idx + 1] as f32;
        let b = self.pixels[idx + 2] as f32;
        0.299 * r + 0.587 * g + 0.114 * b
    }
}

/// Validate and normalize a raw image payload.
///
/// Rejection here covers every shape of the client-error class: empty body,
/// oversized body, bytes that no supported codec can decode, and decoded
/// dimensions beyond the policy limit.
pub fn validate_image(bytes: &[u8], policy: &IntakePolicy) -> Result<ValidatedImage, IntakeError> {
    if bytes.is_empty() {
        return Err(IntakeError::EmptyPayload);
    }
    if bytes.len() > policy.max_bytes {
        return Err(IntakeError::PayloadTooLarge {
            got: bytes.len(),
            limit: policy.max_bytes,
        });
    }

    let decoded = image::load_from_memory(bytes)
        .map_err(|e| IntakeError::Undecodable(e.to_string()))?;

    let rgb = decoded.to_rgb8();
    let (width, height) = rgb.dimensions();

    if width > policy.max_dimension || height > policy.max_dimension {
        return Err(IntakeError::DimensionsTooLarge {
            width,
            height,
            limit: policy.max_dimension,
        });
    }

    tracing::debug!(width, height, bytes = bytes.len(), "image validated");

    Ok(ValidatedImage {
        pixels: rgb.into_raw(),
        width,
        height,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Encode a uniform RGB image as PNG for decode tests.
    fn png_bytes(width: u32, height: u32, rgb: [u8; 3]) -> Vec<u8> {
        let img = image::RgbImage::from_pixel(width, height, image::Rgb(rgb));
        let mut out = std::io::Cursor::new(Vec::new());
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut out, image::ImageFormat::Png)
            .unwrap();
        out.into_inner()
    }

    #[test]
    fn test_empty_payload_rejected() {
        let err = validate_image(&[], &IntakePolicy::default()).unwrap_err();
        assert!(matches!(err, IntakeError::EmptyPayload));
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let policy = IntakePolicy {
            max_bytes: 16,
            max_dimension: 4096,
        };
        let err = validate_image(&[0u8; 17], &policy).unwrap_err();
        assert!(matches!(err, IntakeError::PayloadTooLarge { got: 17, limit: 16 }));
    }

    #[test]
    fn test_garbage_bytes_rejected() {
        let err = validate_image(&[1, 2, 3, 4, 5, 6, 7, 8], &IntakePolicy::default()).unwrap_err();
        assert!(matches!(err, IntakeError::Undecodable(_)));
    }

    #[test]
    fn test_oversized_dimensions_rejected() {
        let policy = IntakePolicy {
            max_bytes: 8 * 1024 * 1024,
            max_dimension: 32,
        };
        let bytes = png_bytes(64, 16, [10, 20, 30]);
        let err = validate_image(&bytes, &policy).unwrap_err();
        assert!(matches!(
            err,
            IntakeError::DimensionsTooLarge { width: 64, height: 16, limit: 32 }
        ));
    }

    #[test]
    fn test_valid_png_normalized_to_rgb() {
        let bytes = png_bytes(20, 10, [200, 100, 50]);
        let img = validate_image(&bytes, &IntakePolicy::default()).unwrap();
        assert_eq!(img.width, 20);
        assert_eq!(img.height, 10);
        assert_eq!(img.pixels.len(), 20 * 10 * 3);
        assert_eq!(&img.pixels[..3], &[200, 100, 50]);
    }

    #[test]
    fn test_luma_uniform() {
        let bytes = png_bytes(4, 4, [100, 100, 100]);
        let img = validate_image(&bytes, &IntakePolicy::default()).unwrap();
        assert!((img.luma(0, 0) - 100.0).abs() < 0.5);
        assert!((img.luma(3, 3) - 100.0).abs() < 0.5);
    }
}
