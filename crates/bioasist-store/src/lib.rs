//! bioasist-store — Enrollment store for trainee face descriptors.
//!
//! Owns the mapping from trainee identity to a bounded, FIFO-evicted set of
//! biometric descriptors, segregated by extractor version. Trainee records
//! themselves belong to the persistence collaborator, reached through the
//! [`TraineeDirectory`] trait.

pub mod memory;
pub mod sqlite;

pub use memory::{MemoryStore, StaticDirectory};
pub use sqlite::{SqliteStore, SqliteTraineeDirectory};

use bioasist_core::{Descriptor, StoredDescriptor};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("unknown trainee: {0}")]
    UnknownTrainee(String),
    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),
    #[error("corrupt descriptor record {id}: {reason}")]
    CorruptRecord { id: String, reason: String },
    #[error("store lock poisoned")]
    LockPoisoned,
}

/// Existence check against the collaborator that owns trainee records.
///
/// Injected into stores so the core never reaches for a global database
/// handle; tests and embedders supply their own implementation.
pub trait TraineeDirectory: Send + Sync {
    fn exists(&self, trainee_id: &str) -> Result<bool, StoreError>;
}

/// Descriptor persistence with a per-trainee sample bound.
///
/// Writes for one trainee are serialized; each `enroll` call is a single
/// all-or-nothing commit (eviction and insert together). Reads observe a
/// consistent snapshot, never a half-written descriptor set.
pub trait EnrollmentStore: Send + Sync {
    /// Store a descriptor under `trainee_id`. When the trainee already holds
    /// the configured maximum, the oldest descriptor is evicted first.
    ///
    /// Fails with [`StoreError::UnknownTrainee`] when the directory does not
    /// know the trainee.
    fn enroll(
        &self,
        trainee_id: &str,
        descriptor: &Descriptor,
    ) -> Result<StoredDescriptor, StoreError>;

    /// All descriptors for one trainee, newest first. Empty when none.
    fn descriptors_for(&self, trainee_id: &str) -> Result<Vec<StoredDescriptor>, StoreError>;

    /// Snapshot of every stored descriptor of the given extractor version,
    /// across all trainees. Used by the matcher; read-only.
    fn all_descriptors(&self, model_version: &str) -> Result<Vec<StoredDescriptor>, StoreError>;

    /// Delete all descriptors for a trainee; returns how many were removed.
    /// Called when a trainee is deleted upstream.
    fn remove(&self, trainee_id: &str) -> Result<usize, StoreError>;
}
