//! In-memory enrollment store.
//!
//! Same contract as the SQLite store, backed by a map of per-trainee
//! deques. Used by orchestrator tests and by embedders that bring their own
//! persistence.

use crate::{EnrollmentStore, StoreError, TraineeDirectory};
use bioasist_core::{Descriptor, StoredDescriptor};
use chrono::Utc;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, RwLock};
use uuid::Uuid;

/// Trainee directory over a fixed, mutable id set. Test collaborator.
#[derive(Default)]
pub struct StaticDirectory {
    ids: RwLock<HashSet<String>>,
}

impl StaticDirectory {
    pub fn with_trainees(ids: impl IntoIterator<Item = String>) -> Self {
        Self {
            ids: RwLock::new(ids.into_iter().collect()),
        }
    }

    pub fn add(&self, trainee_id: &str) {
        if let Ok(mut ids) = self.ids.write() {
            ids.insert(trainee_id.to_string());
        }
    }
}

impl TraineeDirectory for StaticDirectory {
    fn exists(&self, trainee_id: &str) -> Result<bool, StoreError> {
        let ids = self.ids.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(ids.contains(trainee_id))
    }
}

/// Map-backed descriptor store with the same FIFO bound as the SQLite store.
pub struct MemoryStore {
    inner: RwLock<HashMap<String, VecDeque<StoredDescriptor>>>,
    directory: Arc<dyn TraineeDirectory>,
    max_per_trainee: usize,
}

impl MemoryStore {
    pub fn new(directory: Arc<dyn TraineeDirectory>, max_per_trainee: usize) -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
            directory,
            max_per_trainee: max_per_trainee.max(1),
        }
    }
}

impl EnrollmentStore for MemoryStore {
    fn enroll(
        &self,
        trainee_id: &str,
        descriptor: &Descriptor,
    ) -> Result<StoredDescriptor, StoreError> {
        if !self.directory.exists(trainee_id)? {
            return Err(StoreError::UnknownTrainee(trainee_id.to_string()));
        }

        let record = StoredDescriptor {
            id: Uuid::new_v4().to_string(),
            trainee_id: trainee_id.to_string(),
            descriptor: descriptor.clone(),
            created_at: Utc::now(),
        };

        let mut inner = self.inner.write().map_err(|_| StoreError::LockPoisoned)?;
        let samples = inner.entry(trainee_id.to_string()).or_default();
        while samples.len() + 1 > self.max_per_trainee {
            samples.pop_front();
        }
        samples.push_back(record.clone());

        Ok(record)
    }

    fn descriptors_for(&self, trainee_id: &str) -> Result<Vec<StoredDescriptor>, StoreError> {
        let inner = self.inner.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(inner
            .get(trainee_id)
            .map(|samples| samples.iter().rev().cloned().collect())
            .unwrap_or_default())
    }

    fn all_descriptors(&self, model_version: &str) -> Result<Vec<StoredDescriptor>, StoreError> {
        let inner = self.inner.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(inner
            .values()
            .flatten()
            .filter(|d| d.descriptor.model_version == model_version)
            .cloned()
            .collect())
    }

    fn remove(&self, trainee_id: &str) -> Result<usize, StoreError> {
        let mut inner = self.inner.write().map_err(|_| StoreError::LockPoisoned)?;
        Ok(inner.remove(trainee_id).map(|s| s.len()).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desc(values: Vec<f32>, version: &str) -> Descriptor {
        Descriptor {
            values,
            model_version: version.into(),
        }
    }

    fn store(max: usize) -> MemoryStore {
        let directory = Arc::new(StaticDirectory::with_trainees(["t1".to_string(), "t2".to_string()]));
        MemoryStore::new(directory, max)
    }

    #[test]
    fn test_unknown_trainee() {
        let s = store(3);
        assert!(matches!(
            s.enroll("ghost", &desc(vec![1.0], "v1")),
            Err(StoreError::UnknownTrainee(_))
        ));
    }

    #[test]
    fn test_fifo_bound() {
        let s = store(2);
        for i in 0..4 {
            s.enroll("t1", &desc(vec![i as f32], "v1")).unwrap();
        }
        let got = s.descriptors_for("t1").unwrap();
        assert_eq!(got.len(), 2);
        let firsts: Vec<f32> = got.iter().map(|d| d.descriptor.values[0]).collect();
        assert_eq!(firsts, vec![3.0, 2.0]);
    }

    #[test]
    fn test_version_filter() {
        let s = store(5);
        s.enroll("t1", &desc(vec![1.0], "v1")).unwrap();
        s.enroll("t2", &desc(vec![2.0], "v2")).unwrap();

        let v1 = s.all_descriptors("v1").unwrap();
        assert_eq!(v1.len(), 1);
        assert_eq!(v1[0].trainee_id, "t1");
    }

    #[test]
    fn test_remove() {
        let s = store(5);
        s.enroll("t1", &desc(vec![1.0], "v1")).unwrap();
        assert_eq!(s.remove("t1").unwrap(), 1);
        assert!(s.descriptors_for("t1").unwrap().is_empty());
        assert_eq!(s.remove("t1").unwrap(), 0);
    }

    #[test]
    fn test_concurrent_enrolls_respect_bound() {
        let s = Arc::new(store(3));
        let handles: Vec<_> = (0..10)
            .map(|i| {
                let s = Arc::clone(&s);
                std::thread::spawn(move || {
                    s.enroll("t1", &desc(vec![i as f32, 0.0], "v1")).unwrap();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let got = s.descriptors_for("t1").unwrap();
        assert_eq!(got.len(), 3);
        assert!(got.iter().all(|d| d.descriptor.dim() == 2));
    }
}
