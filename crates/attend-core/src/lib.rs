//! attend-core — Face identity matching for attendance.
//!
//! Holds the embedding and detection types produced by an external face
//! analyzer, the Euclidean gallery matcher, and review-crop extraction.

pub mod crop;
pub mod matcher;
pub mod types;

pub use matcher::{EuclideanMatcher, Identification, Matcher, DEFAULT_TOLERANCE};
pub use types::{BoundingBox, Detection, Embedding, EmbeddingError, EnrollmentRecord, EMBEDDING_DIM};
