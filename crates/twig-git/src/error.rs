//! Git protocol and pack error types.

use thiserror::Error;

/// Errors that can occur while talking the git protocol or decoding packs.
#[derive(Debug, Error)]
pub enum GitError {
    /// Invalid pkt-line framing.
    #[error("malformed pkt-line: {0}")]
    MalformedPktLine(String),

    /// Structurally invalid pack data.
    #[error("corrupt pack at offset {offset}: {reason}")]
    CorruptPack {
        /// Byte offset of the entry (or header field) that failed.
        offset: usize,
        /// What was wrong.
        reason: String,
    },

    /// Invalid delta instruction stream.
    #[error("corrupt delta: {0}")]
    CorruptDelta(String),

    /// Delta entries whose base never became available.
    #[error("{count} delta(s) could not be resolved, first at offset {first_offset}")]
    UnresolvedDelta {
        /// Number of deltas left unresolved.
        count: usize,
        /// Pack offset of the first unresolved entry.
        first_offset: usize,
    },

    /// Pack trailer does not match the content.
    #[error("pack checksum mismatch: expected {expected}, computed {computed}")]
    ChecksumMismatch {
        /// Checksum stored in the trailer.
        expected: String,
        /// Checksum computed over the pack.
        computed: String,
    },

    /// Pack version other than 2.
    #[error("unsupported pack version: {0}")]
    UnsupportedPackVersion(u32),

    /// Protocol error.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Transport failure reported by the network layer.
    #[error("transport error: {0}")]
    Transport(String),

    /// The operation was cancelled by the caller.
    #[error("operation cancelled")]
    Cancelled,

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(#[from] twig_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl GitError {
    pub(crate) fn corrupt_pack(offset: usize, reason: impl Into<String>) -> Self {
        Self::CorruptPack {
            offset,
            reason: reason.into(),
        }
    }
}
