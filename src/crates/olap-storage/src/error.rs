//! Error types for storage collaborator operations

use thiserror::Error;

/// Result type for storage operations
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors raised by the storage backend, the ID classifier or the relation reader
#[derive(Error, Debug)]
pub enum StorageError {
    /// A read against the backend failed
    #[error("Storage read failed: {0}")]
    Read(String),

    /// A stored key or entry could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// The iterator or transaction was already closed
    #[error("Storage handle closed: {0}")]
    Closed(&'static str),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Custom error
    #[error("{0}")]
    Custom(String),
}

impl StorageError {
    /// Create a decode error from anything displayable
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    /// Create a read error from anything displayable
    pub fn read(msg: impl Into<String>) -> Self {
        Self::Read(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = StorageError::decode("column too short");
        assert_eq!(err.to_string(), "Decode error: column too short");

        let err = StorageError::Closed("key iterator");
        assert_eq!(err.to_string(), "Storage handle closed: key iterator");
    }
}
