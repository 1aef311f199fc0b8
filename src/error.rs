use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// The error taxonomy shared by every fallible engine operation.
///
/// Recoverable anomalies in optional metadata (a missing pixel size, absent
/// format flags) are logged and defaulted instead of surfacing here; the
/// variants below are the structural failures a caller has to handle.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Malformed metadata: {0}")]
    Parse(String),

    #[error("Binary companion file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("An IO error occurred: {0}")]
    Io(#[from] io::Error),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Invalid configuration: {0}")]
    Configuration(String),
}

impl EngineError {
    pub fn parse<S: Into<String>>(message: S) -> Self {
        Self::Parse(message.into())
    }

    pub fn unsupported<S: Into<String>>(message: S) -> Self {
        Self::UnsupportedFormat(message.into())
    }

    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration(message.into())
    }
}

impl From<EngineError> for io::Error {
    fn from(value: EngineError) -> Self {
        match value {
            EngineError::Io(e) => e,
            _ => Self::new(io::ErrorKind::Other, value),
        }
    }
}
