//! Frame source backed by a directory of still images.
//!
//! Used for uploaded videos that an external decoder has already split into
//! numbered frames (`frame_0000.jpg`, `frame_0001.jpg`, ...). Files are
//! played back in frame-number order at a declared frame rate; the number
//! need not be zero-padded.

use crate::frame::{Frame, FrameSource, SourceError, SourceMetadata};
use std::path::{Path, PathBuf};

const FRAME_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "bmp"];

pub struct ImageSequenceSource {
    dir: PathBuf,
    fps: f64,
    paths: Option<Vec<PathBuf>>,
    cursor: usize,
}

impl ImageSequenceSource {
    pub fn new(dir: impl Into<PathBuf>, fps: f64) -> Self {
        Self {
            dir: dir.into(),
            fps,
            paths: None,
            cursor: 0,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

fn is_frame_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext = ext.to_ascii_lowercase();
            FRAME_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

/// `(stem without trailing digits, trailing digits as a number, file name)`,
/// so `frame_2` sorts before `frame_10`.
fn frame_order_key(path: &Path) -> (String, u64, String) {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_string();
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
    let prefix = stem.trim_end_matches(|c: char| c.is_ascii_digit());
    let number = stem[prefix.len()..].parse().unwrap_or(0);
    (prefix.to_string(), number, name)
}

impl FrameSource for ImageSequenceSource {
    fn open(&mut self) -> Result<SourceMetadata, SourceError> {
        if !self.fps.is_finite() || self.fps <= 0.0 {
            return Err(SourceError::InvalidFrameRate(self.fps));
        }
        if !self.dir.is_dir() {
            return Err(SourceError::NotFound(self.dir.clone()));
        }

        let mut paths = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.is_file() && is_frame_file(&path) {
                paths.push(path);
            }
        }
        paths.sort_by_cached_key(|path| frame_order_key(path));

        let first = paths
            .first()
            .ok_or_else(|| SourceError::Empty(self.dir.clone()))?;
        let (width, height) =
            image::image_dimensions(first).map_err(|source| SourceError::Decode {
                path: first.clone(),
                source,
            })?;

        let metadata = SourceMetadata {
            fps: self.fps,
            frame_count: paths.len() as u64,
            width,
            height,
        };

        tracing::info!(
            dir = %self.dir.display(),
            frames = paths.len(),
            fps = self.fps,
            width,
            height,
            "opened image sequence"
        );

        self.paths = Some(paths);
        self.cursor = 0;
        Ok(metadata)
    }

    fn next_frame(&mut self) -> Result<Option<Frame>, SourceError> {
        let paths = self.paths.as_ref().ok_or(SourceError::NotOpened)?;
        let Some(path) = paths.get(self.cursor) else {
            return Ok(None);
        };

        let image = image::open(path)
            .map_err(|source| SourceError::Decode {
                path: path.clone(),
                source,
            })?
            .to_rgb8();

        let frame = Frame::new(image, self.cursor);
        self.cursor += 1;
        Ok(Some(frame))
    }
}
