//! Storage configuration.

use crate::CompressionLevel;
use serde::{Deserialize, Serialize};

/// Name of the repository metadata directory.
pub const DEFAULT_GIT_DIR: &str = ".git";

/// Configuration shared by the object store, snapshot builder and
/// materializer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// zlib level used for new loose objects.
    pub compression: CompressionLevel,
    /// Metadata directory name, relative to the working tree root. It is
    /// skipped by snapshots and never written by checkouts.
    pub git_dir: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            compression: CompressionLevel::Default,
            git_dir: DEFAULT_GIT_DIR.to_string(),
        }
    }
}
