use crate::pipeline::MultiFacePolicy;
use bioasist_core::{DetectorConfig, ExtractorConfig, IntakePolicy, MatchPolicy};
use std::path::PathBuf;

/// Orchestrator configuration, loaded from environment variables.
///
/// Everything the pipeline treats as policy lives here so deployments can
/// tune thresholds without code changes.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    /// Path to the SQLite descriptor database.
    pub db_path: PathBuf,
    /// Intake size limits.
    pub intake: IntakePolicy,
    /// Detector thresholds.
    pub detector: DetectorConfig,
    /// Extractor quality gate.
    pub extractor: ExtractorConfig,
    /// Accept/margin thresholds for verification.
    pub match_policy: MatchPolicy,
    /// Maximum stored descriptors per trainee (FIFO-evicted beyond this).
    pub max_samples_per_trainee: usize,
    /// What to do when a capture contains more than one face.
    pub multi_face_policy: MultiFacePolicy,
    /// Pipeline worker threads (each owns its own model sessions).
    pub workers: usize,
}

impl Config {
    /// Load configuration from `BIOASIST_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("BIOASIST_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/var/lib/bioasist"));

        let model_dir = std::env::var("BIOASIST_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("models"));

        let db_path = std::env::var("BIOASIST_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("descriptors.db"));

        let intake_defaults = IntakePolicy::default();
        let detector_defaults = DetectorConfig::default();
        let extractor_defaults = ExtractorConfig::default();
        let match_defaults = MatchPolicy::default();

        Self {
            model_dir,
            db_path,
            intake: IntakePolicy {
                max_bytes: env_usize("BIOASIST_MAX_IMAGE_BYTES", intake_defaults.max_bytes),
                max_dimension: env_u32("BIOASIST_MAX_IMAGE_DIMENSION", intake_defaults.max_dimension),
            },
            detector: DetectorConfig {
                confidence_threshold: env_f32(
                    "BIOASIST_DETECT_CONFIDENCE",
                    detector_defaults.confidence_threshold,
                ),
                nms_threshold: env_f32("BIOASIST_DETECT_NMS", detector_defaults.nms_threshold),
            },
            extractor: ExtractorConfig {
                min_region_size: env_u32(
                    "BIOASIST_MIN_REGION_SIZE",
                    extractor_defaults.min_region_size,
                ),
                min_contrast: env_f32("BIOASIST_MIN_CONTRAST", extractor_defaults.min_contrast),
            },
            match_policy: MatchPolicy {
                accept_threshold: env_f32(
                    "BIOASIST_ACCEPT_THRESHOLD",
                    match_defaults.accept_threshold,
                ),
                margin_threshold: env_f32(
                    "BIOASIST_MARGIN_THRESHOLD",
                    match_defaults.margin_threshold,
                ),
            },
            max_samples_per_trainee: env_usize("BIOASIST_MAX_SAMPLES_PER_TRAINEE", 5),
            multi_face_policy: env_multi_face("BIOASIST_MULTI_FACE_POLICY"),
            workers: env_usize("BIOASIST_WORKERS", 2).max(1),
        }
    }

    /// Path to the SCRFD detection model.
    pub fn scrfd_model_path(&self) -> String {
        self.model_dir
            .join("det_10g.onnx")
            .to_string_lossy()
            .into_owned()
    }

    /// Path to the ArcFace extraction model.
    pub fn arcface_model_path(&self) -> String {
        self.model_dir
            .join("w600k_r50.onnx")
            .to_string_lossy()
            .into_owned()
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_multi_face(key: &str) -> MultiFacePolicy {
    match std::env::var(key).as_deref() {
        Ok("largest-face") | Ok("largest_face") => MultiFacePolicy::LargestFace,
        _ => MultiFacePolicy::Reject,
    }
}
