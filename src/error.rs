use simple_error::SimpleError;
use std::path::PathBuf;
use thiserror::Error;

/// Error types for the optimizer and its checkpoint files
///
/// Only `NumericalFault` originates inside the iteration itself; it signals a
/// mathematical precondition violation that the algorithm cannot repair, and
/// callers are expected to stop the run.
#[derive(Error, Debug)]
pub enum SearchError {
    #[error("invalid calculation performed {stage}")]
    NumericalFault { stage: &'static str },

    #[error("could not access file '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not read input file entry at index {index} of '{}'", .path.display())]
    MalformedEntry { path: PathBuf, index: usize },

    #[error("parse error: {0}")]
    Parse(#[from] SimpleError),

    #[error("invalid optimizer state: {0}")]
    InvalidState(&'static str),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch { expected: usize, found: usize },
}

impl SearchError {
    /// Whether the error is a fatal fault of the arithmetic pipeline
    pub fn is_numerical_fault(&self) -> bool {
        matches!(self, SearchError::NumericalFault { .. })
    }
}
