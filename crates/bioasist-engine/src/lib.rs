//! bioasist-engine — Enrollment/verification orchestrator.
//!
//! Ties intake, detection, extraction, storage and matching into the two
//! supported workflows (enroll, verify), emits dashboard events, and runs
//! the pipeline on a bounded pool of dedicated worker threads.

pub mod config;
pub mod events;
pub mod pipeline;
pub mod worker;

pub use config::Config;
pub use events::{EventSink, PipelineEvent, TracingSink};
pub use pipeline::{
    EnrollmentReceipt, MultiFacePolicy, Pipeline, PipelineError, VerificationOutcome,
};
pub use worker::{spawn_pipeline, PipelineHandle};
