//! Error types for the loader.
//!
//! Only failures that abort a whole load are errors. Everything the loader
//! can recover from (missing libraries, unresolved references, dropped
//! structs) goes to [`Reports`](super::Reports) instead.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for loading operations.
#[derive(Error, Debug)]
pub enum Error {
    /// File does not exist or cannot be accessed
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    /// Path exists but is a directory or other non-file
    #[error("Not a file: {0}")]
    NotAFile(PathBuf),

    /// Invalid magic bytes at start of stream
    #[error("Not a blend file: expected BLENDER magic header")]
    BadMagic,

    /// Stream is truncated
    #[error("Unexpected end of stream at position {0}")]
    UnexpectedEof(u64),

    /// Block stream is internally inconsistent
    #[error("Corrupt block stream: {0}")]
    CorruptStream(String),

    /// No schema block before the terminal block
    #[error("Missing DNA block")]
    MissingSchemaBlock,

    /// Schema block could not be parsed
    #[error("Malformed struct schema: {0}")]
    MalformedSchema(String),

    /// Compressed stream could not be inflated
    #[error("Decompression failed: {0}")]
    Decompress(String),

    /// Memory mapping failed
    #[error("Memory mapping failed: {0}")]
    MmapFailed(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// UTF-8 conversion error
    #[error("Invalid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an "other" error from a string.
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Create a corrupt stream error.
    pub fn corrupt(msg: impl Into<String>) -> Self {
        Self::CorruptStream(msg.into())
    }

    /// Create a malformed schema error.
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedSchema(msg.into())
    }

    /// Whether this error means the input is not a readable document at all.
    pub fn is_not_a_document(&self) -> bool {
        matches!(self, Self::BadMagic | Self::MissingSchemaBlock | Self::MalformedSchema(_))
    }
}

/// Result type alias for loading operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let e = Error::BadMagic;
        assert!(e.to_string().contains("BLENDER"));

        let e = Error::corrupt("negative length -4");
        assert!(e.to_string().contains("-4"));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "test");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_not_a_document() {
        assert!(Error::MissingSchemaBlock.is_not_a_document());
        assert!(!Error::UnexpectedEof(3).is_not_a_document());
    }
}
