//! Error types for the search engine core.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SearchError>;

/// Errors surfaced to the top-level driver. One variant per kind the core is
/// required to distinguish: unknown SMART code / inconsistent tokenizer
/// settings (`Configuration`), malformed collection or query lines
/// (`InputFormat`), I/O failure or atomicity violation on runs, partitions,
/// or the vocabulary (`Storage`), a single document's tokens exceeding the
/// memory budget (`Resource`), and a missing or incomplete index directory
/// (`NotFound`).
#[derive(Error, Debug)]
pub enum SearchError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("malformed input at {path}:{line}: {reason}")]
    InputFormat {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("storage error at {path}: {source}")]
    Storage {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("resource exhausted: {0}")]
    Resource(String),

    #[error("index not found or incomplete: {0}")]
    NotFound(PathBuf),
}

impl SearchError {
    pub fn storage(path: impl Into<PathBuf>, source: io::Error) -> Self {
        SearchError::Storage {
            path: path.into(),
            source,
        }
    }

    pub fn input_format(path: impl Into<PathBuf>, line: usize, reason: impl Into<String>) -> Self {
        SearchError::InputFormat {
            path: path.into(),
            line,
            reason: reason.into(),
        }
    }

    /// The single diagnostic line the core is required to print: the kind
    /// plus the offending path or document id.
    pub fn diagnostic(&self) -> String {
        match self {
            SearchError::Configuration(msg) => format!("Configuration: {msg}"),
            SearchError::InputFormat { path, line, reason } => {
                format!("InputFormat: {} line {line}: {reason}", path.display())
            }
            SearchError::Storage { path, source } => {
                format!("Storage: {}: {source}", path.display())
            }
            SearchError::Resource(msg) => format!("Resource: {msg}"),
            SearchError::NotFound(path) => format!("NotFound: {}", path.display()),
        }
    }
}

impl From<bincode::Error> for SearchError {
    fn from(e: bincode::Error) -> Self {
        SearchError::Storage {
            path: PathBuf::new(),
            source: io::Error::new(io::ErrorKind::InvalidData, e),
        }
    }
}
