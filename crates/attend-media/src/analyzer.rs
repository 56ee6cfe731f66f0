//! Face analysis boundary.
//!
//! Detection and embedding extraction are an external capability. The
//! pipeline only sees `detect_and_embed`, which may return zero faces or
//! imprecise boxes.

use crate::frame::Frame;
use attend_core::Detection;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalyzerError {
    #[error("detections file not found: {0}")]
    NotFound(PathBuf),
    #[error("malformed detections file {path}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("analysis failed: {0}")]
    Failed(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Finds faces in a frame and produces one embedding per face.
pub trait FaceAnalyzer: Send {
    fn detect_and_embed(&mut self, frame: &Frame) -> Result<Vec<Detection>, AnalyzerError>;
}

#[derive(Deserialize)]
struct FrameDetections {
    frame: usize,
    #[serde(default)]
    detections: Vec<Detection>,
}

/// Replays detections computed offline by an external extractor.
///
/// The file is a JSON array of `{"frame": N, "detections": [...]}` entries,
/// each detection carrying a `(top, right, bottom, left)` box and a
/// 128-value embedding. Frames absent from the file have no faces.
pub struct DetectionFile {
    by_frame: HashMap<usize, Vec<Detection>>,
}

impl DetectionFile {
    pub fn load(path: &Path) -> Result<Self, AnalyzerError> {
        if !path.exists() {
            return Err(AnalyzerError::NotFound(path.to_path_buf()));
        }
        let raw = std::fs::read_to_string(path)?;
        Self::parse(&raw).map_err(|source| AnalyzerError::Malformed {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        let entries: Vec<FrameDetections> = serde_json::from_str(raw)?;
        let mut by_frame: HashMap<usize, Vec<Detection>> = HashMap::new();
        for entry in entries {
            by_frame.entry(entry.frame).or_default().extend(entry.detections);
        }
        tracing::debug!(frames = by_frame.len(), "loaded detections");
        Ok(Self { by_frame })
    }

    pub fn from_map(by_frame: HashMap<usize, Vec<Detection>>) -> Self {
        Self { by_frame }
    }
}

impl FaceAnalyzer for DetectionFile {
    fn detect_and_embed(&mut self, frame: &Frame) -> Result<Vec<Detection>, AnalyzerError> {
        Ok(self.by_frame.get(&frame.index).cloned().unwrap_or_default())
    }
}
