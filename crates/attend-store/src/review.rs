//! Review sink: crops of unrecognized faces kept for manual triage.

use chrono::{Local, NaiveTime};
use image::{ImageFormat, RgbImage};
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// File suffixes counted and cleared as review artifacts.
const ARTIFACT_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

const SESSION_STAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

#[derive(Error, Debug)]
pub enum ReviewError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to encode {path}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

/// Metadata for one stored crop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReviewArtifact {
    pub filename: String,
    pub frame_index: usize,
    pub timestamp: NaiveTime,
}

/// Directory of unrecognized-face crops.
///
/// Each sink instance belongs to one session: file names combine the
/// session start stamp with a counter that only ever increases.
pub struct ReviewSink {
    dir: PathBuf,
    session_stamp: String,
    counter: u32,
}

impl ReviewSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self::with_stamp(dir, Local::now().format(SESSION_STAMP_FORMAT).to_string())
    }

    pub fn with_stamp(dir: impl Into<PathBuf>, session_stamp: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            session_stamp: session_stamp.into(),
            counter: 0,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `crop` as a JPEG and return its metadata.
    ///
    /// The counter advances even when the write fails, so a retry never
    /// reuses a name.
    pub fn store(&mut self, crop: &RgbImage, frame_index: usize) -> Result<ReviewArtifact, ReviewError> {
        std::fs::create_dir_all(&self.dir)?;

        self.counter += 1;
        let filename = format!("undetected_face_{}_{:03}.jpg", self.session_stamp, self.counter);
        let path = self.dir.join(&filename);

        crop.save_with_format(&path, ImageFormat::Jpeg)
            .map_err(|source| ReviewError::Encode {
                path: path.clone(),
                source,
            })?;

        tracing::debug!(file = %path.display(), frame = frame_index, "review artifact stored");
        Ok(ReviewArtifact {
            filename,
            frame_index,
            timestamp: Local::now().time(),
        })
    }

    /// Number of image artifacts in the directory; `0` if it does not exist.
    pub fn count(&self) -> Result<usize, ReviewError> {
        Ok(self.artifact_paths()?.len())
    }

    /// Remove every image artifact. Returns how many were removed.
    pub fn clear(&self) -> Result<usize, ReviewError> {
        let paths = self.artifact_paths()?;
        for path in &paths {
            std::fs::remove_file(path)?;
        }
        if !paths.is_empty() {
            tracing::info!(dir = %self.dir.display(), removed = paths.len(), "review artifacts cleared");
        }
        Ok(paths.len())
    }

    fn artifact_paths(&self) -> Result<Vec<PathBuf>, ReviewError> {
        if !self.dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut paths = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.is_file() && is_artifact(&path) {
                paths.push(path);
            }
        }
        Ok(paths)
    }
}

fn is_artifact(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ARTIFACT_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}
