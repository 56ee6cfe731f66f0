//! attend-media — Frame acquisition and face analysis boundary.
//!
//! Camera capture, video decoding and the face detector/embedder live
//! outside this workspace. This crate defines the traits the pipeline
//! consumes plus file-backed implementations of both.

pub mod analyzer;
pub mod frame;
pub mod image_sequence;

pub use analyzer::{AnalyzerError, DetectionFile, FaceAnalyzer};
pub use frame::{Frame, FrameSource, SourceError, SourceMetadata};
pub use image_sequence::ImageSequenceSource;
