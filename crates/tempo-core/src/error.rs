//! Error types for Tempo.

use thiserror::Error;

/// Result type alias using Tempo's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for Tempo.
#[derive(Error, Debug)]
pub enum Error {
    // Source errors
    #[error("Network error: {0}")]
    Network(String),

    #[error("Unsupported data source: {0}")]
    UnsupportedSource(String),

    #[error("No data source set")]
    NoDataSource,

    // Audio errors
    #[error("Audio decode error: {0}")]
    AudioDecode(String),

    #[error("Audio output error: {0}")]
    AudioOutput(String),

    #[error("Unsupported audio format: {0}")]
    UnsupportedFormat(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Audio engine is not running")]
    EngineUnavailable,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Returns true if loading a different source may succeed where this one failed.
    pub const fn is_source_error(&self) -> bool {
        matches!(
            self,
            Self::Network(_)
                | Self::UnsupportedSource(_)
                | Self::UnsupportedFormat(_)
                | Self::AudioDecode(_)
                | Self::Io(_)
        )
    }

    /// Returns true if the audio engine itself is unusable.
    pub const fn is_engine_error(&self) -> bool {
        matches!(self, Self::AudioOutput(_) | Self::EngineUnavailable)
    }
}
