//! Embedding gallery: enrolled identities and their averaged embeddings.

use crate::db::{Database, StoreError};
use attend_core::{Embedding, EnrollmentRecord};
use rusqlite::params;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("identity must not be empty")]
    EmptyIdentity,
    #[error("no face embeddings captured for {0}")]
    NoEmbeddings(String),
    #[error("storage: {0}")]
    Store(#[from] StoreError),
}

pub struct Gallery {
    db: Database,
}

impl Gallery {
    pub(crate) fn new(db: Database) -> Self {
        Self { db }
    }

    /// All enrollment records in insertion order.
    ///
    /// Uses `rowid` so stores created without an explicit id column load too.
    pub fn load(&self) -> Result<Vec<EnrollmentRecord>, StoreError> {
        let conn = self.db.faces_conn()?;
        let mut stmt = conn.prepare("SELECT rowid, name, encoding FROM faces ORDER BY rowid")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Vec<u8>>(2)?,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (id, identity, blob) = row?;
            let embedding = Embedding::from_le_bytes(&blob)
                .map_err(|source| StoreError::CorruptEmbedding { id, source })?;
            records.push(EnrollmentRecord {
                id,
                identity,
                embedding,
            });
        }

        tracing::debug!(count = records.len(), "gallery loaded");
        Ok(records)
    }

    /// Store the mean of `embeddings` as a new record for `identity`.
    ///
    /// Never merges with earlier records of the same identity.
    pub fn enroll(
        &self,
        identity: &str,
        embeddings: &[Embedding],
    ) -> Result<EnrollmentRecord, GalleryError> {
        let identity = identity.trim();
        if identity.is_empty() {
            return Err(GalleryError::EmptyIdentity);
        }
        if embeddings.is_empty() {
            return Err(GalleryError::NoEmbeddings(identity.to_string()));
        }

        let embedding = Embedding::mean(embeddings)
            .map_err(|_| GalleryError::NoEmbeddings(identity.to_string()))?;

        let conn = self.db.faces_conn()?;
        conn.execute(
            "INSERT INTO faces (name, encoding) VALUES (?1, ?2)",
            params![identity, embedding.to_le_bytes()],
        )
        .map_err(StoreError::from)?;
        let id = conn.last_insert_rowid();

        tracing::info!(identity, id, samples = embeddings.len(), "face enrolled");
        Ok(EnrollmentRecord {
            id,
            identity: identity.to_string(),
            embedding,
        })
    }

    /// Delete one record by id. Returns `false` if no such record exists.
    pub fn remove(&self, id: i64) -> Result<bool, StoreError> {
        let conn = self.db.faces_conn()?;
        let removed = conn.execute("DELETE FROM faces WHERE rowid = ?1", params![id])?;
        if removed > 0 {
            tracing::info!(id, "face record removed");
        }
        Ok(removed > 0)
    }

    pub fn count(&self) -> Result<usize, StoreError> {
        let conn = self.db.faces_conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM faces", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use attend_core::EMBEDDING_DIM;

    fn store() -> (tempfile::TempDir, Gallery) {
        let tmp = tempfile::tempdir().unwrap();
        let db = Database::in_dir(tmp.path()).unwrap();
        (tmp, db.gallery())
    }

    fn ramp(offset: f64) -> Embedding {
        Embedding::new((0..EMBEDDING_DIM).map(|i| i as f64 * 0.01 + offset).collect()).unwrap()
    }

    #[test]
    fn test_enroll_stores_mean() {
        let (_tmp, gallery) = store();
        let samples = [ramp(0.0), ramp(0.3), ramp(-0.6)];
        gallery.enroll("Alice", &samples).unwrap();

        let records = gallery.load().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].identity, "Alice");
        for (i, v) in records[0].embedding.values().iter().enumerate() {
            let expected = (samples[0].values()[i] + samples[1].values()[i] + samples[2].values()[i]) / 3.0;
            assert_relative_eq!(*v, expected, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_enroll_trims_identity() {
        let (_tmp, gallery) = store();
        let record = gallery.enroll("  Bob \n", &[ramp(0.0)]).unwrap();
        assert_eq!(record.identity, "Bob");
    }

    #[test]
    fn test_enroll_rejects_blank_identity() {
        let (_tmp, gallery) = store();
        let err = gallery.enroll("   ", &[ramp(0.0)]).unwrap_err();
        assert!(matches!(err, GalleryError::EmptyIdentity));
        assert_eq!(gallery.count().unwrap(), 0);
    }

    #[test]
    fn test_enroll_rejects_no_embeddings() {
        let (_tmp, gallery) = store();
        let err = gallery.enroll("Carol", &[]).unwrap_err();
        assert!(matches!(err, GalleryError::NoEmbeddings(_)));
        assert_eq!(gallery.count().unwrap(), 0);
    }

    #[test]
    fn test_repeat_enrollment_is_not_merged() {
        let (_tmp, gallery) = store();
        gallery.enroll("Dave", &[ramp(0.0)]).unwrap();
        gallery.enroll("Dave", &[ramp(1.0)]).unwrap();

        let records = gallery.load().unwrap();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.identity == "Dave"));
        assert_ne!(records[0].embedding, records[1].embedding);
    }

    #[test]
    fn test_load_preserves_insertion_order() {
        let (_tmp, gallery) = store();
        for name in ["c", "a", "b"] {
            gallery.enroll(name, &[ramp(0.0)]).unwrap();
        }
        let names: Vec<_> = gallery.load().unwrap().into_iter().map(|r| r.identity).collect();
        assert_eq!(names, vec!["c", "a", "b"]);
    }

    #[test]
    fn test_remove() {
        let (_tmp, gallery) = store();
        let record = gallery.enroll("Eve", &[ramp(0.0)]).unwrap();
        assert!(gallery.remove(record.id).unwrap());
        assert!(!gallery.remove(record.id).unwrap());
        assert_eq!(gallery.count().unwrap(), 0);
    }

    #[test]
    fn test_corrupt_blob_is_reported() {
        let tmp = tempfile::tempdir().unwrap();
        let db = Database::in_dir(tmp.path()).unwrap();
        db.faces_conn()
            .unwrap()
            .execute(
                "INSERT INTO faces (name, encoding) VALUES ('broken', x'0102')",
                [],
            )
            .unwrap();

        let err = db.gallery().load().unwrap_err();
        assert!(matches!(err, StoreError::CorruptEmbedding { .. }));
    }
}
