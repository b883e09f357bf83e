//! Errors for the simulation-output grammar.

use thiserror::Error;

/// Result type for grammar operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Grammar error types.
#[derive(Error, Debug)]
pub enum Error {
    /// A data line that does not match the record grammar.
    #[error("line {line}: {reason}")]
    Parse { line: usize, reason: String },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Core library error.
    #[error("core error: {0}")]
    Core(#[from] specsort_core::Error),
}

impl Error {
    /// Returns true for errors that only invalidate the offending line.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Parse { .. } => true,
            Self::Core(e) => e.is_recoverable(),
            Self::Io(_) => false,
        }
    }
}
