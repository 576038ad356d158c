//! SQLite-backed enrollment store.
//!
//! One `descriptors` table keyed by uuid, FIFO-ordered by rowid. The
//! connection sits behind a mutex and every enroll runs in one transaction,
//! so the per-trainee bound holds under concurrent writers and readers
//! always see a committed snapshot.

use crate::{EnrollmentStore, StoreError, TraineeDirectory};
use bioasist_core::{Descriptor, StoredDescriptor};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Descriptor persistence over a SQLite file (or in-memory database).
pub struct SqliteStore {
    conn: Mutex<Connection>,
    directory: Arc<dyn TraineeDirectory>,
    max_per_trainee: usize,
}

impl SqliteStore {
    /// Open (creating if needed) the descriptor database at `path`.
    pub fn open(
        path: &Path,
        directory: Arc<dyn TraineeDirectory>,
        max_per_trainee: usize,
    ) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn, directory, max_per_trainee)
    }

    /// In-memory store, used by tests and short-lived tools.
    pub fn open_in_memory(
        directory: Arc<dyn TraineeDirectory>,
        max_per_trainee: usize,
    ) -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn, directory, max_per_trainee)
    }

    fn from_connection(
        conn: Connection,
        directory: Arc<dyn TraineeDirectory>,
        max_per_trainee: usize,
    ) -> Result<Self, StoreError> {
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS descriptors (
                id            TEXT PRIMARY KEY,
                trainee_id    TEXT NOT NULL,
                model_version TEXT NOT NULL,
                vector        BLOB NOT NULL,
                created_at    TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_descriptors_trainee
                ON descriptors (trainee_id);
            CREATE INDEX IF NOT EXISTS idx_descriptors_version
                ON descriptors (model_version);",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
            directory,
            max_per_trainee: max_per_trainee.max(1),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }
}

impl EnrollmentStore for SqliteStore {
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

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        // Eviction and insert commit together; a failure leaves the
        // trainee's descriptor set untouched.
        let count: usize = tx.query_row(
            "SELECT COUNT(*) FROM descriptors WHERE trainee_id = ?1",
            params![trainee_id],
            |row| row.get(0),
        )?;

        if count + 1 > self.max_per_trainee {
            let evict = count + 1 - self.max_per_trainee;
            let evicted = tx.execute(
                "DELETE FROM descriptors WHERE rowid IN (
                    SELECT rowid FROM descriptors
                    WHERE trainee_id = ?1
                    ORDER BY rowid ASC
                    LIMIT ?2
                )",
                params![trainee_id, evict],
            )?;
            tracing::debug!(trainee = trainee_id, evicted, "evicted oldest descriptors");
        }

        tx.execute(
            "INSERT INTO descriptors (id, trainee_id, model_version, vector, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                record.id,
                record.trainee_id,
                record.descriptor.model_version,
                encode_vector(&record.descriptor.values),
                record.created_at.to_rfc3339(),
            ],
        )?;

        tx.commit()?;

        tracing::info!(
            trainee = trainee_id,
            descriptor = %record.id,
            version = %record.descriptor.model_version,
            "descriptor enrolled"
        );
        Ok(record)
    }

    fn descriptors_for(&self, trainee_id: &str) -> Result<Vec<StoredDescriptor>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, trainee_id, model_version, vector, created_at
             FROM descriptors WHERE trainee_id = ?1
             ORDER BY rowid DESC",
        )?;
        let rows = stmt.query_map(params![trainee_id], row_to_raw)?;
        rows.collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .map(raw_to_record)
            .collect()
    }

    fn all_descriptors(&self, model_version: &str) -> Result<Vec<StoredDescriptor>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, trainee_id, model_version, vector, created_at
             FROM descriptors WHERE model_version = ?1
             ORDER BY rowid ASC",
        )?;
        let rows = stmt.query_map(params![model_version], row_to_raw)?;
        rows.collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .map(raw_to_record)
            .collect()
    }

    fn remove(&self, trainee_id: &str) -> Result<usize, StoreError> {
        let conn = self.lock()?;
        let removed = conn.execute(
            "DELETE FROM descriptors WHERE trainee_id = ?1",
            params![trainee_id],
        )?;
        tracing::info!(trainee = trainee_id, removed, "descriptors removed");
        Ok(removed)
    }
}

type RawRow = (String, String, String, Vec<u8>, String);

fn row_to_raw(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
    ))
}

fn raw_to_record(raw: RawRow) -> Result<StoredDescriptor, StoreError> {
    let (id, trainee_id, model_version, blob, created_at) = raw;

    let values = decode_vector(&blob).map_err(|reason| StoreError::CorruptRecord {
        id: id.clone(),
        reason,
    })?;

    let created_at = DateTime::parse_from_rfc3339(&created_at)
        .map_err(|e| StoreError::CorruptRecord {
            id: id.clone(),
            reason: format!("bad timestamp: {e}"),
        })?
        .with_timezone(&Utc);

    Ok(StoredDescriptor {
        id,
        trainee_id,
        descriptor: Descriptor {
            values,
            model_version,
        },
        created_at,
    })
}

/// Encode a descriptor vector as little-endian f32 bytes.
pub fn encode_vector(values: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(values.len() * 4);
    for v in values {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

/// Decode a little-endian f32 blob back into a descriptor vector.
pub fn decode_vector(blob: &[u8]) -> Result<Vec<f32>, String> {
    if blob.len() % 4 != 0 {
        return Err(format!("blob length {} not a multiple of 4", blob.len()));
    }
    Ok(blob
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

/// Trainee records as the Bioasist persistence layer keeps them: id,
/// display name, active flag. Stands in for the upstream collaborator.
pub struct SqliteTraineeDirectory {
    conn: Mutex<Connection>,
}

impl SqliteTraineeDirectory {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS trainees (
                id           TEXT PRIMARY KEY,
                display_name TEXT NOT NULL,
                active       INTEGER NOT NULL DEFAULT 1
            );",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn add_trainee(&self, trainee_id: &str, display_name: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::LockPoisoned)?;
        conn.execute(
            "INSERT OR REPLACE INTO trainees (id, display_name, active) VALUES (?1, ?2, 1)",
            params![trainee_id, display_name],
        )?;
        Ok(())
    }

    pub fn set_active(&self, trainee_id: &str, active: bool) -> Result<(), StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::LockPoisoned)?;
        conn.execute(
            "UPDATE trainees SET active = ?2 WHERE id = ?1",
            params![trainee_id, active as i64],
        )?;
        Ok(())
    }
}

impl TraineeDirectory for SqliteTraineeDirectory {
    fn exists(&self, trainee_id: &str) -> Result<bool, StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::LockPoisoned)?;
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM trainees WHERE id = ?1 AND active = 1",
                params![trainee_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::StaticDirectory;

    fn desc(values: Vec<f32>, version: &str) -> Descriptor {
        Descriptor {
            values,
            model_version: version.into(),
        }
    }

    fn store_with(trainees: &[&str], max: usize) -> SqliteStore {
        let directory = Arc::new(StaticDirectory::with_trainees(
            trainees.iter().map(|s| s.to_string()),
        ));
        SqliteStore::open_in_memory(directory, max).unwrap()
    }

    #[test]
    fn test_unknown_trainee_rejected() {
        let store = store_with(&["t1"], 3);
        let err = store.enroll("ghost", &desc(vec![1.0], "v1")).unwrap_err();
        assert!(matches!(err, StoreError::UnknownTrainee(id) if id == "ghost"));
        assert!(store.descriptors_for("ghost").unwrap().is_empty());
    }

    #[test]
    fn test_enroll_and_read_back() {
        let store = store_with(&["t1"], 3);
        let stored = store.enroll("t1", &desc(vec![0.25, -1.5, 3.0], "v1")).unwrap();

        let got = store.descriptors_for("t1").unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].id, stored.id);
        assert_eq!(got[0].trainee_id, "t1");
        assert_eq!(got[0].descriptor.values, vec![0.25, -1.5, 3.0]);
        assert_eq!(got[0].descriptor.model_version, "v1");
    }

    #[test]
    fn test_fifo_eviction_bound() {
        let store = store_with(&["t1"], 3);
        for i in 0..5 {
            store.enroll("t1", &desc(vec![i as f32], "v1")).unwrap();
        }

        let got = store.descriptors_for("t1").unwrap();
        assert_eq!(got.len(), 3, "bound must hold after 5 enrollments");
        // Newest first: samples 4, 3, 2 survive; 0 and 1 were evicted.
        let firsts: Vec<f32> = got.iter().map(|d| d.descriptor.values[0]).collect();
        assert_eq!(firsts, vec![4.0, 3.0, 2.0]);
    }

    #[test]
    fn test_descriptors_for_newest_first() {
        let store = store_with(&["t1"], 10);
        let first = store.enroll("t1", &desc(vec![1.0], "v1")).unwrap();
        let second = store.enroll("t1", &desc(vec![2.0], "v1")).unwrap();

        let got = store.descriptors_for("t1").unwrap();
        assert_eq!(got[0].id, second.id);
        assert_eq!(got[1].id, first.id);
        assert!(got[0].created_at >= got[1].created_at);
    }

    #[test]
    fn test_all_descriptors_filters_by_version() {
        let store = store_with(&["t1", "t2"], 5);
        store.enroll("t1", &desc(vec![1.0], "v1")).unwrap();
        store.enroll("t2", &desc(vec![2.0], "v2")).unwrap();
        store.enroll("t2", &desc(vec![3.0], "v1")).unwrap();

        let v1 = store.all_descriptors("v1").unwrap();
        assert_eq!(v1.len(), 2);
        assert!(v1.iter().all(|d| d.descriptor.model_version == "v1"));

        let v2 = store.all_descriptors("v2").unwrap();
        assert_eq!(v2.len(), 1);
        assert_eq!(v2[0].trainee_id, "t2");
    }

    #[test]
    fn test_remove_cascades() {
        let store = store_with(&["t1", "t2"], 5);
        store.enroll("t1", &desc(vec![1.0], "v1")).unwrap();
        store.enroll("t1", &desc(vec![2.0], "v1")).unwrap();
        store.enroll("t2", &desc(vec![3.0], "v1")).unwrap();

        assert_eq!(store.remove("t1").unwrap(), 2);
        assert!(store.descriptors_for("t1").unwrap().is_empty());
        assert_eq!(store.descriptors_for("t2").unwrap().len(), 1);
        assert_eq!(store.remove("t1").unwrap(), 0);
    }

    #[test]
    fn test_concurrent_enrolls_respect_bound() {
        let max = 3;
        let store = Arc::new(store_with(&["t1"], max));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    store
                        .enroll("t1", &desc(vec![i as f32, 1.0, 2.0], "v1"))
                        .unwrap();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let got = store.descriptors_for("t1").unwrap();
        assert_eq!(got.len(), max);
        for d in &got {
            assert_eq!(d.descriptor.dim(), 3, "vectors must stay well-formed");
        }
    }

    #[test]
    fn test_vector_codec_roundtrip() {
        let values = vec![0.0, -1.25, 3.5e-2, f32::MAX, f32::MIN_POSITIVE];
        let blob = encode_vector(&values);
        assert_eq!(blob.len(), values.len() * 4);
        assert_eq!(decode_vector(&blob).unwrap(), values);
    }

    #[test]
    fn test_vector_codec_rejects_truncated_blob() {
        assert!(decode_vector(&[1, 2, 3]).is_err());
    }

    #[test]
    fn test_trainee_directory_exists() {
        let dir = SqliteTraineeDirectory::open_in_memory().unwrap();
        assert!(!dir.exists("t1").unwrap());

        dir.add_trainee("t1", "Ana Quispe").unwrap();
        assert!(dir.exists("t1").unwrap());

        dir.set_active("t1", false).unwrap();
        assert!(!dir.exists("t1").unwrap(), "inactive trainees cannot enroll");
    }
}
