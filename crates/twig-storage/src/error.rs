//! Storage error types.

use thiserror::Error;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The requested object or ref does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A stored object failed to decompress or its framing is invalid.
    #[error("corrupt object {id}: {reason}")]
    CorruptObject {
        /// Hex id of the offending object.
        id: String,
        /// What was wrong with it.
        reason: String,
    },

    /// Input was not a valid zlib stream.
    #[error("corrupt zlib stream: {0}")]
    CorruptStream(String),

    /// A tree payload could not be parsed.
    #[error("malformed tree: {0}")]
    MalformedTree(String),

    /// A caller supplied an identifier, name or path that fails a format check.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The operation was cancelled between steps.
    #[error("operation cancelled")]
    Cancelled,
}
