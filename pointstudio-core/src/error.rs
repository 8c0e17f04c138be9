//! Error types for pointstudio

use thiserror::Error;

/// Main error type for pointstudio operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    #[error("Unsupported variant: {0}")]
    UnsupportedVariant(String),

    #[error("Unsupported extension: {0}")]
    UnsupportedExtension(String),

    #[error("Proprietary format: {0}")]
    ProprietaryFormat(String),

    #[error("Truncated file: {0}")]
    Truncated(String),

    #[error("No points in file")]
    EmptyCloud,

    #[error("Reconstruction produced no triangles")]
    EmptyResult,

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),
}

impl Error {
    /// Hint message for scanner-vendor formats that need conversion first.
    pub fn proprietary(extension: &str) -> Self {
        Error::ProprietaryFormat(format!(
            "{} is a proprietary scanner format; convert it to E57, LAS or PLY first",
            extension
        ))
    }

    /// Cancelled is an expected outcome of a user-initiated cancel and is
    /// suppressed from error UI.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

/// Result type alias for pointstudio operations
pub type Result<T> = std::result::Result<T, Error>;
