//! Outbound pipeline events.
//!
//! One event per terminal pipeline state, consumed by the dashboard
//! aggregation service. The core only emits; aggregation happens elsewhere.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    EnrollmentSucceeded {
        trainee_id: String,
        at: DateTime<Utc>,
    },
    VerificationSucceeded {
        trainee_id: String,
        score: f32,
        at: DateTime<Utc>,
    },
    /// Surfaced for manual adjudication; never silently resolved.
    VerificationAmbiguous {
        best_trainee_id: String,
        score: f32,
        runner_up: f32,
        at: DateTime<Utc>,
    },
    VerificationFailed {
        /// Best similarity seen, when any candidate was scored.
        score: Option<f32>,
        at: DateTime<Utc>,
    },
}

/// Destination for pipeline events. Injected into the orchestrator; the
/// dashboard collaborator supplies its own implementation.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: PipelineEvent);
}

/// Default sink: structured log lines only.
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: PipelineEvent) {
        match &event {
            PipelineEvent::EnrollmentSucceeded { trainee_id, .. } => {
                tracing::info!(trainee = %trainee_id, "event: enrollment succeeded");
            }
            PipelineEvent::VerificationSucceeded { trainee_id, score, .. } => {
                tracing::info!(trainee = %trainee_id, score, "event: verification succeeded");
            }
            PipelineEvent::VerificationAmbiguous {
                best_trainee_id,
                score,
                runner_up,
                ..
            } => {
                tracing::warn!(
                    best = %best_trainee_id,
                    score,
                    runner_up,
                    "event: verification ambiguous, manual review required"
                );
            }
            PipelineEvent::VerificationFailed { score, .. } => {
                tracing::info!(?score, "event: verification failed");
            }
        }
    }
}
