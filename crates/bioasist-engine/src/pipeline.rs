//! The enroll/verify state machine.
//!
//! Both workflows share the front half: intake -> detect -> multi-face gate
//! -> extract. Enroll then commits the descriptor through the store (the
//! single write of the whole invocation); verify matches it against the
//! enrolled gallery and maps the decision to an outcome. Every terminal
//! state emits one dashboard event.

use crate::events::{EventSink, PipelineEvent};
use bioasist_core::{
    DetectFaces, Descriptor, ExtractDescriptor, FaceRegion, FaceSample, IntakePolicy,
    MatchDecision, MatchPolicy, Matcher,
};
use bioasist_core::detector::DetectError;
use bioasist_core::extractor::ExtractError;
use bioasist_core::intake::{validate_image, IntakeError};
use bioasist_store::{EnrollmentStore, StoreError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("invalid image: {0}")]
    InvalidImage(#[from] IntakeError),
    #[error("no face detected")]
    NoFaceDetected,
    #[error("{count} faces detected; exactly one expected")]
    MultipleFacesDetected { count: usize },
    #[error("detection failed: {0}")]
    Detect(#[from] DetectError),
    #[error("extraction failed: {0}")]
    Extraction(#[from] ExtractError),
    #[error("unknown trainee: {0}")]
    UnknownTrainee(String),
    #[error("store error: {0}")]
    Store(StoreError),
    #[error("pipeline workers unavailable")]
    WorkersUnavailable,
}

impl From<StoreError> for PipelineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::UnknownTrainee(id) => PipelineError::UnknownTrainee(id),
            other => PipelineError::Store(other),
        }
    }
}

/// Policy for captures containing more than one face.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MultiFacePolicy {
    /// Fail the request; the client should recapture.
    Reject,
    /// Proceed with the highest-confidence region.
    LargestFace,
}

/// Caller-facing result of a successful enrollment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrollmentReceipt {
    pub trainee_id: String,
    pub descriptor_id: String,
    pub model_version: String,
    /// Detection confidence of the enrolled face region.
    pub quality: f32,
    pub enrolled_at: DateTime<Utc>,
}

/// Caller-facing result of a verify invocation. Ambiguity is an outcome,
/// not an error: the caller routes it to manual review.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum VerificationOutcome {
    Accepted {
        trainee_id: String,
        score: f32,
    },
    Ambiguous {
        best_trainee_id: String,
        score: f32,
        runner_up: f32,
    },
    Rejected {
        best_score: Option<f32>,
    },
}

/// One self-contained request pipeline. Stateless across invocations; the
/// enrollment store is the only shared mutable collaborator.
pub struct Pipeline {
    detector: Box<dyn DetectFaces>,
    extractor: Box<dyn ExtractDescriptor>,
    matcher: Box<dyn Matcher>,
    store: Arc<dyn EnrollmentStore>,
    sink: Arc<dyn EventSink>,
    intake: IntakePolicy,
    match_policy: MatchPolicy,
    multi_face: MultiFacePolicy,
}

impl Pipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        detector: Box<dyn DetectFaces>,
        extractor: Box<dyn ExtractDescriptor>,
        matcher: Box<dyn Matcher>,
        store: Arc<dyn EnrollmentStore>,
        sink: Arc<dyn EventSink>,
        intake: IntakePolicy,
        match_policy: MatchPolicy,
        multi_face: MultiFacePolicy,
    ) -> Self {
        Self {
            detector,
            extractor,
            matcher,
            store,
            sink,
            intake,
            match_policy,
            multi_face,
        }
    }

    /// Enroll workflow: intake -> detect -> gate -> extract -> store.
    ///
    /// The store write is the only side effect; any failure before it leaves
    /// no trace of the request.
    pub fn enroll(
        &mut self,
        trainee_id: &str,
        image_bytes: &[u8],
    ) -> Result<EnrollmentReceipt, PipelineError> {
        let (region, descriptor) = self.capture(Some(trainee_id), image_bytes)?;

        let stored = self.store.enroll(trainee_id, &descriptor)?;

        self.sink.emit(PipelineEvent::EnrollmentSucceeded {
            trainee_id: trainee_id.to_string(),
            at: stored.created_at,
        });

        tracing::info!(
            trainee = trainee_id,
            descriptor = %stored.id,
            confidence = region.confidence,
            "enrollment complete"
        );

        Ok(EnrollmentReceipt {
            trainee_id: trainee_id.to_string(),
            descriptor_id: stored.id,
            model_version: stored.descriptor.model_version,
            quality: region.confidence,
            enrolled_at: stored.created_at,
        })
    }

    /// Verify workflow: intake -> detect -> gate -> extract -> match.
    ///
    /// Reads a consistent snapshot of same-version descriptors; never
    /// mutates the store.
    pub fn verify(&mut self, image_bytes: &[u8]) -> Result<VerificationOutcome, PipelineError> {
        let (_, query) = self.capture(None, image_bytes)?;

        let candidates = self.store.all_descriptors(self.extractor.model_version())?;
        let report = self.matcher.match_descriptor(&query, &candidates, &self.match_policy);

        let now = Utc::now();
        let best_score = report.best.as_ref().map(|b| b.score);

        let outcome = match (report.decision, report.best) {
            (MatchDecision::Accepted, Some(best)) => {
                self.sink.emit(PipelineEvent::VerificationSucceeded {
                    trainee_id: best.trainee_id.clone(),
                    score: best.score,
                    at: now,
                });
                VerificationOutcome::Accepted {
                    trainee_id: best.trainee_id,
                    score: best.score,
                }
            }
            (MatchDecision::Ambiguous, Some(best)) => {
                let runner_up = report.runner_up.unwrap_or(best.score);
                self.sink.emit(PipelineEvent::VerificationAmbiguous {
                    best_trainee_id: best.trainee_id.clone(),
                    score: best.score,
                    runner_up,
                    at: now,
                });
                VerificationOutcome::Ambiguous {
                    best_trainee_id: best.trainee_id,
                    score: best.score,
                    runner_up,
                }
            }
            _ => {
                self.sink.emit(PipelineEvent::VerificationFailed {
                    score: best_score,
                    at: now,
                });
                VerificationOutcome::Rejected { best_score }
            }
        };

        Ok(outcome)
    }

    /// Shared front half of both workflows: one validated sample in, one
    /// descriptor out.
    fn capture(
        &mut self,
        trainee_id: Option<&str>,
        image_bytes: &[u8],
    ) -> Result<(FaceRegion, Descriptor), PipelineError> {
        let image = validate_image(image_bytes, &self.intake)?;
        let sample = FaceSample::new(trainee_id.map(String::from), image);

        let regions = self.detector.detect(&sample.image)?;
        let region = self.select_region(regions)?;

        let descriptor = self.extractor.extract(&sample.image, &region)?;
        Ok((region, descriptor))
    }

    fn select_region(&self, regions: Vec<FaceRegion>) -> Result<FaceRegion, PipelineError> {
        match (regions.len(), self.multi_face) {
            (0, _) => Err(PipelineError::NoFaceDetected),
            (1, _) => Ok(regions.into_iter().next().ok_or(PipelineError::NoFaceDetected)?),
            (count, MultiFacePolicy::Reject) => {
                Err(PipelineError::MultipleFacesDetected { count })
            }
            (count, MultiFacePolicy::LargestFace) => {
                tracing::debug!(count, "multiple faces; proceeding with highest confidence");
                // Detector output is confidence-descending.
                Ok(regions.into_iter().next().ok_or(PipelineError::NoFaceDetected)?)
            }
        }
    }
}
