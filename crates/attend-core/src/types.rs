use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of components in every face embedding.
pub const EMBEDDING_DIM: usize = 128;

/// Size in bytes of a serialized embedding blob (little-endian f64s).
pub const EMBEDDING_BLOB_LEN: usize = EMBEDDING_DIM * std::mem::size_of::<f64>();

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EmbeddingError {
    #[error("expected 128-dim embedding, got {0}")]
    WrongDimension(usize),
    #[error("expected 1024-byte embedding blob, got {0}")]
    WrongBlobLength(usize),
    #[error("embedding contains non-finite values")]
    NonFinite,
    #[error("no embeddings to average")]
    Empty,
}

/// Face embedding: a point in a metric space where Euclidean distance
/// approximates dissimilarity between faces.
///
/// Always exactly [`EMBEDDING_DIM`] finite values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f64>", into = "Vec<f64>")]
pub struct Embedding {
    values: Vec<f64>,
}

impl Embedding {
    pub fn new(values: Vec<f64>) -> Result<Self, EmbeddingError> {
        if values.len() != EMBEDDING_DIM {
            return Err(EmbeddingError::WrongDimension(values.len()));
        }
        if values.iter().any(|v| !v.is_finite()) {
            return Err(EmbeddingError::NonFinite);
        }
        Ok(Self { values })
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Euclidean (L2) distance between two embeddings.
    pub fn euclidean_distance(&self, other: &Embedding) -> f64 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f64>()
            .sqrt()
    }

    /// Component-wise arithmetic mean of a non-empty set of embeddings.
    pub fn mean(embeddings: &[Embedding]) -> Result<Embedding, EmbeddingError> {
        if embeddings.is_empty() {
            return Err(EmbeddingError::Empty);
        }

        let mut sum = vec![0.0f64; EMBEDDING_DIM];
        for embedding in embeddings {
            for (acc, v) in sum.iter_mut().zip(embedding.values.iter()) {
                *acc += v;
            }
        }

        let n = embeddings.len() as f64;
        Embedding::new(sum.into_iter().map(|v| v / n).collect())
    }

    /// Serialize as 128 little-endian IEEE-754 doubles.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(EMBEDDING_BLOB_LEN);
        for &value in &self.values {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        bytes
    }

    /// Inverse of [`to_le_bytes`](Self::to_le_bytes).
    pub fn from_le_bytes(blob: &[u8]) -> Result<Self, EmbeddingError> {
        if blob.len() != EMBEDDING_BLOB_LEN {
            return Err(EmbeddingError::WrongBlobLength(blob.len()));
        }

        let values = blob
            .chunks_exact(8)
            .map(|chunk| {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(chunk);
                f64::from_le_bytes(raw)
            })
            .collect();
        Embedding::new(values)
    }
}

impl TryFrom<Vec<f64>> for Embedding {
    type Error = EmbeddingError;

    fn try_from(values: Vec<f64>) -> Result<Self, Self::Error> {
        Embedding::new(values)
    }
}

impl From<Embedding> for Vec<f64> {
    fn from(embedding: Embedding) -> Self {
        embedding.values
    }
}

/// Face bounding box in pixel coordinates, `(top, right, bottom, left)`.
///
/// Detectors may return boxes that extend past the frame edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
    pub left: i32,
}

impl BoundingBox {
    pub fn new(top: i32, right: i32, bottom: i32, left: i32) -> Self {
        Self {
            top,
            right,
            bottom,
            left,
        }
    }

    pub fn width(&self) -> i32 {
        (self.right - self.left).max(0)
    }

    pub fn height(&self) -> i32 {
        (self.bottom - self.top).max(0)
    }
}

/// One face found in a frame by the external analyzer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub embedding: Embedding,
}

/// A gallery entry: one averaged embedding for an enrolled identity.
///
/// Identities are not unique; two records with the same identity are
/// independent match candidates.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnrollmentRecord {
    pub id: i64,
    pub identity: String,
    pub embedding: Embedding,
}
