//! Frame type and the frame source abstraction.

use image::RgbImage;
use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

/// A decoded RGB frame from a camera or video.
#[derive(Clone)]
pub struct Frame {
    pub image: RgbImage,
    /// Zero-based position of this frame in its source.
    pub index: usize,
}

impl Frame {
    pub fn new(image: RgbImage, index: usize) -> Self {
        Self { image, index }
    }
}

/// Properties of an opened frame source.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceMetadata {
    /// Nominal frames per second; `0.0` when unknown (live cameras).
    pub fps: f64,
    /// Total number of frames; `0` when unbounded.
    pub frame_count: u64,
    pub width: u32,
    pub height: u32,
}

impl SourceMetadata {
    /// Source duration in seconds, `0.0` when the frame rate is unknown.
    pub fn duration_secs(&self) -> f64 {
        if self.fps > 0.0 {
            self.frame_count as f64 / self.fps
        } else {
            0.0
        }
    }

    /// Frame stride that samples roughly one frame per second of source.
    pub fn one_per_second_interval(&self) -> usize {
        (self.fps.round() as usize).max(1)
    }

    /// Number of frames a one-per-second sampling pass will analyze.
    pub fn expected_samples(&self) -> u64 {
        self.frame_count.div_ceil(self.one_per_second_interval() as u64)
    }
}

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("frame source not found: {0}")]
    NotFound(PathBuf),
    #[error("frame source contains no frames: {0}")]
    Empty(PathBuf),
    #[error("invalid frame rate: {0}")]
    InvalidFrameRate(f64),
    #[error("frame source not opened")]
    NotOpened,
    #[error("failed to decode frame {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Sequential supplier of frames for one attendance session.
///
/// Implementations own the I/O details (device, container, codec). Reads
/// block until a frame is available or the source is exhausted.
pub trait FrameSource: Send {
    /// Open the source and report its properties.
    fn open(&mut self) -> Result<SourceMetadata, SourceError>;

    /// Next frame in order, or `None` once the source is exhausted.
    fn next_frame(&mut self) -> Result<Option<Frame>, SourceError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn metadata(fps: f64, frame_count: u64) -> SourceMetadata {
        SourceMetadata {
            fps,
            frame_count,
            width: 640,
            height: 480,
        }
    }

    #[test]
    fn test_duration() {
        assert_relative_eq!(metadata(30.0, 450).duration_secs(), 15.0);
    }

    #[test]
    fn test_duration_unknown_fps_is_zero() {
        assert_eq!(metadata(0.0, 450).duration_secs(), 0.0);
    }

    #[test]
    fn test_interval_rounds_fps() {
        assert_eq!(metadata(29.97, 0).one_per_second_interval(), 30);
        assert_eq!(metadata(24.4, 0).one_per_second_interval(), 24);
    }

    #[test]
    fn test_interval_never_zero() {
        assert_eq!(metadata(0.2, 0).one_per_second_interval(), 1);
        assert_eq!(metadata(0.0, 0).one_per_second_interval(), 1);
    }

    #[test]
    fn test_expected_samples() {
        // frames 0, 30, 60, 90 are sampled out of 100
        assert_eq!(metadata(30.0, 100).expected_samples(), 4);
        assert_eq!(metadata(30.0, 90).expected_samples(), 3);
    }
}
