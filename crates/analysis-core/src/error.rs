//! Error types for audio analysis

use std::path::PathBuf;
use thiserror::Error;

/// Result type for analysis operations
pub type AnalysisResult<T> = Result<T, AnalysisError>;

/// Errors that can occur while analyzing audio
#[derive(Debug, Error)]
pub enum AnalysisError {
    /// FFT window size is not a usable power of two
    #[error("FFT size must be a power of two (>= 2), got {size}")]
    InvalidFftSize { size: usize },

    /// A frame with no samples was handed to the analyzer
    #[error("Cannot analyze an empty frame")]
    EmptyFrame,

    /// The recording could not be read
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The WAV container could not be decoded
    #[error("Invalid WAV file: {0}")]
    Wav(#[from] hound::Error),

    /// The format chunk describes something we cannot decode
    #[error("Unsupported WAV format: {reason}")]
    UnsupportedFormat { reason: String },

    /// The payload is shorter than one analysis window
    #[error("Recording too short: {samples} samples, need at least {required}")]
    TooShort { samples: usize, required: usize },
}

impl AnalysisError {
    /// Create an I/O error bound to a path
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create an unsupported format error
    pub fn unsupported(reason: impl Into<String>) -> Self {
        Self::UnsupportedFormat {
            reason: reason.into(),
        }
    }
}
