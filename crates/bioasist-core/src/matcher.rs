//! Descriptor matching with threshold-and-margin decision policy.
//!
//! A query descriptor is scored against every stored descriptor of the same
//! extractor version, reduced to one best score per trainee, and decided by
//! two configured thresholds: the accept threshold and the margin between
//! the best and runner-up trainee. A thin margin is surfaced as ambiguous
//! for manual adjudication, never silently accepted.

use crate::types::{Descriptor, StoredDescriptor};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Matching thresholds. Deployment configuration, not constants.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MatchPolicy {
    /// Minimum cosine similarity for a positive identification.
    pub accept_threshold: f32,
    /// Minimum gap between the best and runner-up trainee scores.
    pub margin_threshold: f32,
}

impl Default for MatchPolicy {
    fn default() -> Self {
        Self {
            accept_threshold: 0.40,
            margin_threshold: 0.10,
        }
    }
}

/// Decision for one verify pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchDecision {
    Accepted,
    Ambiguous,
    Rejected,
}

/// Best-scoring candidate for a query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchCandidate {
    pub trainee_id: String,
    pub descriptor_id: String,
    pub score: f32,
}

/// Outcome of matching a query descriptor against the enrolled gallery.
/// Transient; handed back to the orchestrator's caller, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchReport {
    pub decision: MatchDecision,
    pub best: Option<MatchCandidate>,
    /// Best score among trainees other than `best`, when any exist.
    pub runner_up: Option<f32>,
}

/// Strategy for comparing a query descriptor against enrolled descriptors.
pub trait Matcher: Send + Sync {
    fn match_descriptor(
        &self,
        query: &Descriptor,
        candidates: &[StoredDescriptor],
        policy: &MatchPolicy,
    ) -> MatchReport;
}

/// Cosine similarity matcher with constant-time gallery traversal.
///
/// Always scores every same-version candidate, no early exit, so timing
/// cannot leak gallery size or match position. Candidates whose extractor
/// version differs from the query are never scored; their scores would not
/// be comparable.
pub struct CosineMatcher;

impl Matcher for CosineMatcher {
    fn match_descriptor(
        &self,
        query: &Descriptor,
        candidates: &[StoredDescriptor],
        policy: &MatchPolicy,
    ) -> MatchReport {
        // Best score and best-scoring descriptor per trainee.
        let mut per_trainee: HashMap<&str, (f32, &StoredDescriptor)> = HashMap::new();

        for stored in candidates {
            if stored.descriptor.model_version != query.model_version {
                tracing::warn!(
                    descriptor = %stored.id,
                    stored_version = %stored.descriptor.model_version,
                    query_version = %query.model_version,
                    "skipping descriptor with mismatched extractor version"
                );
                continue;
            }
            if stored.descriptor.dim() != query.dim() {
                tracing::warn!(
                    descriptor = %stored.id,
                    stored_dim = stored.descriptor.dim(),
                    query_dim = query.dim(),
                    "skipping descriptor with mismatched dimension"
                );
                continue;
            }

            let score = query.similarity(&stored.descriptor);
            per_trainee
                .entry(stored.trainee_id.as_str())
                .and_modify(|(best, best_stored)| {
                    if score > *best {
                        *best = score;
                        *best_stored = stored;
                    }
                })
                .or_insert((score, stored));
        }

        // Reduce to best and runner-up ACROSS trainees; multiple samples of
        // the same trainee must never count against each other as ambiguity.
        let mut best: Option<(f32, &StoredDescriptor)> = None;
        let mut runner_up: Option<f32> = None;

        for (_, (score, stored)) in per_trainee {
            match best {
                Some((best_score, _)) if score <= best_score => {
                    if runner_up.map_or(true, |r| score > r) {
                        runner_up = Some(score);
                    }
                }
                _ => {
                    if let Some((prev_score, _)) = best {
                        runner_up = Some(prev_score);
                    }
                    best = Some((score, stored));
                }
            }
        }

        let Some((best_score, best_stored)) = best else {
            return MatchReport {
                decision: MatchDecision::Rejected,
                best: None,
                runner_up: None,
            };
        };

        let decision = if best_score < policy.accept_threshold {
            MatchDecision::Rejected
        } else {
            let margin_ok = runner_up.map_or(true, |r| best_score - r >= policy.margin_threshold);
            if margin_ok {
                MatchDecision::Accepted
            } else {
                MatchDecision::Ambiguous
            }
        };

        MatchReport {
            decision,
            best: Some(MatchCandidate {
                trainee_id: best_stored.trainee_id.clone(),
                descriptor_id: best_stored.id.clone(),
                score: best_score,
            }),
            runner_up,
        }
    }
}
