//! Error types for data readers

use thiserror::Error;

/// Error type for data readers
#[derive(Error, Debug)]
pub enum Error {
    /// Core library error
    #[error("Core error: {0}")]
    Core(#[from] flowline_core::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV format error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Image decoding error
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// Record (de)serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Schema error
    #[error("Schema error: {0}")]
    Schema(String),

    /// Format error
    #[error("Format error: {0}")]
    Format(String),

    /// Invalid argument
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

/// Result type for data readers
pub type Result<T> = std::result::Result<T, Error>;

impl From<Error> for flowline_core::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Core(e) => e,
            Error::Io(e) => flowline_core::Error::Io(e),
            Error::Serialization(e) => flowline_core::Error::Serialization(e),
            Error::InvalidArgument(msg) => flowline_core::Error::InvalidArgument(msg),
            Error::Schema(msg) => flowline_core::Error::SchemaMismatch(msg),
            other => flowline_core::Error::InvalidMetadata(other.to_string()),
        }
    }
}
