//! Error types for scenario loading and the SIP collaborator seam

use std::path::PathBuf;

use sipcheck_analysis_core::AnalysisError;
use thiserror::Error;

/// Result type for scenario operations
pub type ScenarioResult<T> = Result<T, ScenarioError>;

/// Result type for SIP collaborator calls
pub type SessionResult<T> = Result<T, SessionError>;

/// Errors raised while loading configuration or test definitions
#[derive(Debug, Error)]
pub enum ScenarioError {
    /// A file could not be read
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The test document is not valid JSON or has an unusable structure
    #[error("Test definition parse error: {message}")]
    Parse { message: String },

    /// Engine configuration is malformed or inconsistent
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// A role declared more actions than allowed
    #[error("{role} declares {count} actions, the limit is {limit}")]
    CapacityExceeded {
        role: String,
        count: usize,
        limit: usize,
    },

    /// SIP collaborator failure
    #[error("SIP session error: {0}")]
    Session(#[from] SessionError),

    /// Recording analysis failure
    #[error("Audio analysis error: {0}")]
    Analysis(#[from] AnalysisError),
}

impl ScenarioError {
    /// Create an I/O error bound to a path
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a parse error
    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}

/// Failures reported by a [`SipSession`](crate::session::SipSession) implementation
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    /// The user agent could not be started
    #[error("Initialization failed: {message}")]
    Initialization { message: String },

    /// An account could not be registered or unregistered
    #[error("Registration failed for {account}: {message}")]
    Registration { account: String, message: String },

    /// A call could not be placed or controlled
    #[error("Call error: {message}")]
    Call { message: String },

    /// Playback, recording or tone transmission failed
    #[error("Media error: {message}")]
    Media { message: String },

    /// The collaborator gave up waiting on the network
    #[error("Timed out: {operation}")]
    Timeout { operation: String },
}

impl SessionError {
    /// Create an initialization error
    pub fn initialization(message: impl Into<String>) -> Self {
        Self::Initialization {
            message: message.into(),
        }
    }

    /// Create a registration error
    pub fn registration(account: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Registration {
            account: account.into(),
            message: message.into(),
        }
    }

    /// Create a call error
    pub fn call(message: impl Into<String>) -> Self {
        Self::Call {
            message: message.into(),
        }
    }

    /// Create a media error
    pub fn media(message: impl Into<String>) -> Self {
        Self::Media {
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
        }
    }
}
