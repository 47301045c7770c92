//! Common error and result types for the waveprint engine.

use thiserror::Error;

/// Common result type for engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Engine error taxonomy
///
/// `EmptySignal`, `NoPeaks` and `NoFingerprints` are non-fatal: the facade
/// converts them into skip/no-match outcomes instead of aborting a bulk run.
#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to decode audio: {0}")]
    Decode(String),

    #[error("Decoded signal is empty")]
    EmptySignal,

    #[error("No spectrogram peaks above the amplitude threshold")]
    NoPeaks,

    #[error("No fingerprints extracted")]
    NoFingerprints,

    #[error("Store error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True for the error kinds that skip a file instead of failing a run.
    pub fn is_benign(&self) -> bool {
        matches!(
            self,
            Error::EmptySignal | Error::NoPeaks | Error::NoFingerprints
        )
    }
}
