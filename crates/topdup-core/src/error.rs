//! Error types for the vectorizer and index engines.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for vectorizer and index operations.
pub type Result<T> = std::result::Result<T, DedupError>;

/// Errors raised by vectorizers and vector indices.
#[derive(Error, Debug)]
pub enum DedupError {
    /// Transform or save was called before the vectorizer was fitted.
    #[error("vectorizer not fitted")]
    NotFitted,

    /// A vector did not match the expected dimensionality.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// An artifact could not be read or written.
    #[error("artifact {path}: {source}")]
    Artifact {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// An artifact was read but could not be decoded.
    #[error("corrupt artifact {path}: {source}")]
    CorruptArtifact {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Fitting was attempted on a corpus with no documents.
    #[error("cannot fit on an empty corpus")]
    EmptyCorpus,
}

impl DedupError {
    pub(crate) fn artifact(path: &std::path::Path, source: std::io::Error) -> Self {
        DedupError::Artifact {
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn corrupt(path: &std::path::Path, source: serde_json::Error) -> Self {
        DedupError::CorruptArtifact {
            path: path.to_path_buf(),
            source,
        }
    }
}
