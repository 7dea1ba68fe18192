//! Error types for the capture library.

use thiserror::Error;

/// Main error type for the capture library.
///
/// There is a single capture-error kind at the API boundary; the message
/// names the failing operation and, where possible, the remediation
/// (permission to grant, package to install, environment variable to set).
#[derive(Error, Debug)]
pub enum Error {
    /// Capture failed
    #[error("capture error: {0}")]
    Capture(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Shorthand used throughout the backends.
    pub(crate) fn capture(msg: impl Into<String>) -> Self {
        Error::Capture(msg.into())
    }
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
