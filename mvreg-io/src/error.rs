//! Error types for I/O operations

use thiserror::Error;

/// Errors that can occur during I/O operations
#[derive(Error, Debug)]
pub enum IoError {
    #[error("File not found: {path}")]
    FileNotFound { path: String },

    #[error("Invalid file format: {format}")]
    InvalidFormat { format: String },

    #[error("Parse error: {message}")]
    ParseError { message: String },

    #[error("Write error: {message}")]
    WriteError { message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl IoError {
    pub(crate) fn parse(message: impl Into<String>) -> Self {
        Self::ParseError { message: message.into() }
    }

    pub(crate) fn format(format: impl Into<String>) -> Self {
        Self::InvalidFormat { format: format.into() }
    }
}

impl From<IoError> for mvreg_core::Error {
    fn from(error: IoError) -> Self {
        match error {
            IoError::Io(e) => mvreg_core::Error::Io(e),
            IoError::FileNotFound { path } => mvreg_core::Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("file not found: {}", path),
            )),
            IoError::InvalidFormat { format } => mvreg_core::Error::UnsupportedFormat(format),
            IoError::ParseError { message } | IoError::WriteError { message } => {
                mvreg_core::Error::InvalidData(message)
            }
        }
    }
}
