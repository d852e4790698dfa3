//! Error taxonomy for the generation pipeline.
//!
//! Three failure classes with different recovery policies:
//! - [`StorageError`] — persistence failed; retry the write, never the generation.
//! - [`GenerationError`] — the completion endpoint failed; surfaced to the
//!   caller with no automatic retry.
//! - [`IndexError`] — embedding or index failure; retrieval degrades to empty
//!   context instead of aborting the request.

use std::fmt;

/// Persistence failure (constraint violation, I/O, pool exhaustion).
#[derive(Debug)]
pub enum StorageError {
    /// Underlying SQLite/sqlx failure.
    Database(String),
    /// A row the operation depends on does not exist.
    NotFound(String),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::Database(e) => write!(f, "database error: {}", e),
            StorageError::NotFound(what) => write!(f, "not found: {}", what),
        }
    }
}

impl std::error::Error for StorageError {}

impl From<sqlx::Error> for StorageError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => StorageError::NotFound("row".to_string()),
            other => StorageError::Database(other.to_string()),
        }
    }
}

/// Completion endpoint failure. Never retried automatically.
#[derive(Debug)]
pub enum GenerationError {
    /// Could not reach the server (connect error or timeout).
    Connect(String),
    /// The server answered with a non-success HTTP status.
    Status(u16, String),
    /// The response body did not contain a usable completion.
    MalformedResponse(String),
    /// The completion came back empty.
    EmptyCompletion,
}

impl fmt::Display for GenerationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GenerationError::Connect(e) => {
                write!(f, "completion server unreachable: {}", e)
            }
            GenerationError::Status(code, body) => {
                write!(f, "completion server returned HTTP {}: {}", code, body)
            }
            GenerationError::MalformedResponse(e) => {
                write!(f, "malformed completion response: {}", e)
            }
            GenerationError::EmptyCompletion => write!(f, "completion response was empty"),
        }
    }
}

impl std::error::Error for GenerationError {}

/// Embedding or vector-index failure.
#[derive(Debug)]
pub enum IndexError {
    /// The embedding endpoint could not be reached or kept failing.
    Embedding(String),
    /// A vector did not match the dimensionality pinned by the index.
    DimensionMismatch { expected: usize, got: usize },
    /// A retrieved chunk could not be resolved back to its document.
    Resolve(String),
}

impl fmt::Display for IndexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexError::Embedding(e) => write!(f, "embedding failed: {}", e),
            IndexError::DimensionMismatch { expected, got } => {
                write!(
                    f,
                    "embedding dimension mismatch: index has {}, got {}",
                    expected, got
                )
            }
            IndexError::Resolve(e) => write!(f, "chunk resolution failed: {}", e),
        }
    }
}

impl std::error::Error for IndexError {}
