//! bioasist-core — Biometric pipeline stages for trainee face registration.
//!
//! Pure building blocks: image intake and validation, SCRFD face detection,
//! landmark-based alignment, ArcFace descriptor extraction, and descriptor
//! matching. No storage and no transport; the orchestrator in
//! `bioasist-engine` wires these together.

pub mod alignment;
pub mod detector;
pub mod extractor;
pub mod intake;
pub mod matcher;
pub mod types;

pub use detector::{DetectFaces, DetectorConfig, ScrfdDetector};
pub use extractor::{ArcFaceExtractor, ExtractDescriptor, ExtractorConfig};
pub use intake::{validate_image, IntakeError, IntakePolicy, ValidatedImage};
pub use matcher::{CosineMatcher, MatchCandidate, MatchDecision, MatchPolicy, MatchReport, Matcher};
pub use types::{Descriptor, FaceRegion, FaceSample, StoredDescriptor};
