//! Git object storage for twig.
//!
//! This crate provides the content-addressed loose object store, the
//! tree and commit codecs, directory snapshots and working tree checkout,
//! plus file-backed reference management.

mod checkout;
mod commit;
mod compression;
mod config;
mod error;
mod object;
mod refs;
mod repository;
mod snapshot;
mod store;
mod tree;

pub use checkout::{render, Checkout, CheckoutStats};
pub use commit::{build_commit_body, Commit, Signature};
pub use compression::{compress, decompress, decompress_prefix, CompressionLevel};
pub use config::{StoreConfig, DEFAULT_GIT_DIR};
pub use error::StorageError;
pub use object::{frame, unframe, GitObject, ObjectId, ObjectType};
pub use refs::{validate_ref_name, RefStore, Reference};
pub use repository::{Repository, DEFAULT_BRANCH};
pub use snapshot::{write_tree, SnapshotBuilder};
pub use store::ObjectStore;
pub use tree::{canonical_order, FileMode, Tree, TreeEntry};

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;
