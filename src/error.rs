//! Error types for dlscope.
//!
//! Lookups report absence through `Option`; this module covers the failures
//! that prevent an image object from coming into existence at all (unreadable
//! files, unrecognised magic, missing architecture slices) and configuration
//! problems.

use thiserror::Error;

/// Main error type for dlscope operations.
#[derive(Debug, Error)]
pub enum DlError {
    /// File I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Magic number not recognised as thin or fat Mach-O
    #[error("Invalid image format: {0}")]
    InvalidFormat(String),

    /// Fat container without a slice for the requested CPU
    #[error("No slice for cpu type {cputype:#x} in multi-architecture file")]
    NoMatchingArch { cputype: i32 },

    /// A structure extends past the end of the data it was read from
    #[error("Truncated image at offset {offset:#x}: {message}")]
    Truncated { offset: u64, message: String },

    /// Configuration could not be read or parsed
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type alias for dlscope operations
pub type Result<T> = std::result::Result<T, DlError>;

impl From<serde_json::Error> for DlError {
    fn from(err: serde_json::Error) -> Self {
        DlError::Config(err.to_string())
    }
}
