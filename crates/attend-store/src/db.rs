use crate::gallery::Gallery;
use crate::ledger::Ledger;
use attend_core::EmbeddingError;
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// How long a connection waits on a locked database before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const FACES_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS faces (
    id       INTEGER PRIMARY KEY,
    name     TEXT NOT NULL,
    encoding BLOB NOT NULL
);";

const ATTENDANCE_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS attendance (
    name TEXT NOT NULL,
    date TEXT NOT NULL,
    time TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_attendance_name_date ON attendance (name, date);";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt embedding in face record {id}: {source}")]
    CorruptEmbedding {
        id: i64,
        #[source]
        source: EmbeddingError,
    },
    #[error("invalid stored value: {0}")]
    InvalidValue(String),
}

/// Persistence service for the face gallery and the attendance ledger.
///
/// Holds only the two database paths; cloning is cheap and clones may be
/// moved to other threads. Concurrent writers are serialized by SQLite.
#[derive(Debug, Clone)]
pub struct Database {
    faces_path: PathBuf,
    attendance_path: PathBuf,
}

impl Database {
    /// Open (creating if needed) both stores and ensure their schemas.
    pub fn open(
        faces_path: impl Into<PathBuf>,
        attendance_path: impl Into<PathBuf>,
    ) -> Result<Self, StoreError> {
        let db = Self {
            faces_path: faces_path.into(),
            attendance_path: attendance_path.into(),
        };

        for path in [&db.faces_path, &db.attendance_path] {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
        }

        db.faces_conn()?.execute_batch(FACES_SCHEMA)?;
        db.attendance_conn()?.execute_batch(ATTENDANCE_SCHEMA)?;

        tracing::info!(
            faces = %db.faces_path.display(),
            attendance = %db.attendance_path.display(),
            "databases ready"
        );
        Ok(db)
    }

    /// Open `faces.db` and `attendance.db` inside `dir`.
    pub fn in_dir(dir: &Path) -> Result<Self, StoreError> {
        Self::open(dir.join("faces.db"), dir.join("attendance.db"))
    }

    pub fn gallery(&self) -> Gallery {
        Gallery::new(self.clone())
    }

    pub fn ledger(&self) -> Ledger {
        Ledger::new(self.clone())
    }

    pub fn faces_path(&self) -> &Path {
        &self.faces_path
    }

    pub fn attendance_path(&self) -> &Path {
        &self.attendance_path
    }

    pub(crate) fn faces_conn(&self) -> Result<Connection, StoreError> {
        connect(&self.faces_path)
    }

    pub(crate) fn attendance_conn(&self) -> Result<Connection, StoreError> {
        connect(&self.attendance_path)
    }
}

fn connect(path: &Path) -> Result<Connection, StoreError> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    Ok(conn)
}
