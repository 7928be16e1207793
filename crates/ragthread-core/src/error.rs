//! Error taxonomy for ingestion, indexing and retrieval.

use std::path::PathBuf;

use thiserror::Error;

/// Every failure the retrieval store can report.
///
/// Extraction, chunking and embedding errors abort a single document before
/// anything is appended. Persistence errors leave the last committed state
/// of the thread index untouched.
#[derive(Error, Debug)]
pub enum RagError {
    /// Declared document type is not one of `pdf`, `txt`, `docx`, `md`.
    #[error("unsupported document format: {0}")]
    UnsupportedFormat(String),

    /// The document could not be decoded or parsed.
    #[error("text extraction failed: {0}")]
    ExtractionFailed(String),

    /// Extraction succeeded but produced only whitespace.
    #[error("document contains no extractable text")]
    EmptyDocument,

    /// Chunker parameters are unusable.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A vector's width differs from the index dimension.
    #[error("dimension mismatch: index expects {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Chunks and vectors handed to an append differ in length.
    #[error("misaligned batch: {chunks} chunks but {vectors} vectors")]
    MisalignedBatch { chunks: usize, vectors: usize },

    /// The embedding backend failed or returned an unusable response.
    #[error("embedding unavailable: {0}")]
    EmbeddingUnavailable(String),

    /// Reading or writing an index artifact failed.
    #[error("persistence failure at {}: {source}", path.display())]
    PersistenceFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Artifacts exist but cannot be decoded or disagree with each other.
    #[error("index corrupt: {0}")]
    IndexCorrupt(String),

    /// Uploaded file exceeds the configured size limit.
    #[error("file too large: {size} bytes exceeds limit of {limit} bytes")]
    FileTooLarge { size: u64, limit: u64 },
}

impl RagError {
    /// Wrap an I/O error with the artifact path it concerns.
    pub fn persistence(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        RagError::PersistenceFailure {
            path: path.into(),
            source,
        }
    }
}

/// Result alias used throughout ragthread.
pub type Result<T> = std::result::Result<T, RagError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dimension_mismatch_display() {
        let err = RagError::DimensionMismatch {
            expected: 384,
            actual: 768,
        };
        assert_eq!(
            err.to_string(),
            "dimension mismatch: index expects 384, got 768"
        );
    }

    #[test]
    fn test_persistence_display_includes_path() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = RagError::persistence("/tmp/thread_1.index", io_err);
        let msg = err.to_string();
        assert!(msg.contains("/tmp/thread_1.index"));
        assert!(msg.contains("denied"));
    }

    #[test]
    fn test_persistence_exposes_source() {
        use std::error::Error as _;
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err = RagError::persistence("x", io_err);
        assert!(err.source().is_some());
    }
}
