//! Bounded worker pool for the request pipeline.
//!
//! Detection and extraction are CPU-bound, so they run on dedicated OS
//! threads, each owning its own model sessions. Callers talk to the pool
//! through a clone-safe async handle over a bounded channel; the channel
//! capacity caps queued work.

use crate::pipeline::{EnrollmentReceipt, Pipeline, PipelineError, VerificationOutcome};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};

/// Queue slots per worker. Requests beyond this wait in the sender.
const QUEUE_SLOTS_PER_WORKER: usize = 2;

enum PipelineRequest {
    Enroll {
        trainee_id: String,
        image: Vec<u8>,
        reply: oneshot::Sender<Result<EnrollmentReceipt, PipelineError>>,
    },
    Verify {
        image: Vec<u8>,
        reply: oneshot::Sender<Result<VerificationOutcome, PipelineError>>,
    },
}

/// Clone-safe handle to the pipeline workers.
#[derive(Clone)]
pub struct PipelineHandle {
    tx: mpsc::Sender<PipelineRequest>,
}

impl PipelineHandle {
    /// Run the enroll workflow on a pool worker.
    pub async fn enroll(
        &self,
        trainee_id: &str,
        image: Vec<u8>,
    ) -> Result<EnrollmentReceipt, PipelineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(PipelineRequest::Enroll {
                trainee_id: trainee_id.to_string(),
                image,
                reply: reply_tx,
            })
            .await
            .map_err(|_| PipelineError::WorkersUnavailable)?;
        reply_rx.await.map_err(|_| PipelineError::WorkersUnavailable)?
    }

    /// Run the verify workflow on a pool worker.
    pub async fn verify(&self, image: Vec<u8>) -> Result<VerificationOutcome, PipelineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(PipelineRequest::Verify {
                image,
                reply: reply_tx,
            })
            .await
            .map_err(|_| PipelineError::WorkersUnavailable)?;
        reply_rx.await.map_err(|_| PipelineError::WorkersUnavailable)?
    }
}

/// Spawn `workers` pipeline threads fed from one bounded queue.
///
/// All pipelines are constructed up front so a missing model file fails the
/// spawn instead of the first request. If a caller abandons a request, the
/// worker still runs it to completion; there is no partial persisted state
/// to clean up.
pub fn spawn_pipeline<F>(workers: usize, factory: F) -> Result<PipelineHandle, PipelineError>
where
    F: Fn() -> Result<Pipeline, PipelineError>,
{
    let workers = workers.max(1);
    let mut pipelines = Vec::with_capacity(workers);
    for _ in 0..workers {
        pipelines.push(factory()?);
    }

    let (tx, rx) = mpsc::channel::<PipelineRequest>(workers * QUEUE_SLOTS_PER_WORKER);
    let rx = Arc::new(Mutex::new(rx));

    for (i, mut pipeline) in pipelines.into_iter().enumerate() {
        let rx = Arc::clone(&rx);
        std::thread::Builder::new()
            .name(format!("bioasist-pipeline-{i}"))
            .spawn(move || {
                tracing::info!(worker = i, "pipeline worker started");
                loop {
                    let req = {
                        let Ok(mut rx) = rx.lock() else { break };
                        rx.blocking_recv()
                    };
                    let Some(req) = req else { break };

                    match req {
                        PipelineRequest::Enroll {
                            trainee_id,
                            image,
                            reply,
                        } => {
                            let result = pipeline.enroll(&trainee_id, &image);
                            let _ = reply.send(result);
                        }
                        PipelineRequest::Verify { image, reply } => {
                            let result = pipeline.verify(&image);
                            let _ = reply.send(result);
                        }
                    }
                }
                tracing::info!(worker = i, "pipeline worker exiting");
            })
            .map_err(|_| PipelineError::WorkersUnavailable)?;
    }

    Ok(PipelineHandle { tx })
}
