//! Error types for specsort-core.

use thiserror::Error;

/// Result type alias for specsort operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for specsort operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid configuration, detected at startup.
    #[error("configuration error: {0}")]
    Config(String),

    /// A (detector, segment) pair that does not map into the channel range.
    #[error("channel out of range: detector {detector}, segment {segment} (channels: {channel_count})")]
    OutOfRange {
        detector: i64,
        segment: i64,
        channel_count: usize,
    },

    /// The Gaussian sampler rejected its parameters or failed.
    #[error("random source error: {0}")]
    RandomSource(String),

    /// Two spectra with different binning were merged.
    #[error("spectrum shape mismatch: {0}")]
    ShapeMismatch(String),

    /// A histogram sink failed to persist its spectra.
    #[error("histogram sink error: {0}")]
    Sink(String),
}

impl Error {
    /// Returns true for errors that only invalidate a single record.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::OutOfRange { .. })
    }
}
