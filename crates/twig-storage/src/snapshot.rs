//! Directory snapshots ("write-tree"): hash a working directory into a
//! graph of blob and tree objects.

use crate::config::DEFAULT_GIT_DIR;
use crate::tree::{FileMode, Tree, TreeEntry};
use crate::{ObjectId, ObjectStore, ObjectType, Result, StorageError};
use std::ffi::OsString;
use std::fs::{self, Metadata};
use std::path::Path;
use tokio_util::sync::CancellationToken;

/// Builds tree objects from a directory on disk.
///
/// The walk is depth first: every subtree is stored before the tree that
/// references it. The result depends only on file names, contents and
/// execute bits, so an unchanged directory always yields the same id.
#[derive(Debug, Clone)]
pub struct SnapshotBuilder<'a> {
    store: &'a ObjectStore,
    git_dir: OsString,
    cancel: Option<CancellationToken>,
}

impl<'a> SnapshotBuilder<'a> {
    /// Creates a builder writing into `store`.
    pub fn new(store: &'a ObjectStore) -> Self {
        Self {
            store,
            git_dir: OsString::from(DEFAULT_GIT_DIR),
            cancel: None,
        }
    }

    /// Sets the metadata directory name excluded from the walk.
    pub fn git_dir(mut self, name: impl Into<OsString>) -> Self {
        self.git_dir = name.into();
        self
    }

    /// Aborts the walk between entries once `token` is cancelled.
    pub fn cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Snapshots `root` and returns the id of its tree.
    pub fn write_tree(&self, root: &Path) -> Result<ObjectId> {
        let id = self.write_dir(root)?;
        tracing::info!(root = %root.display(), tree = %id, "wrote tree");
        Ok(id)
    }

    fn write_dir(&self, dir: &Path) -> Result<ObjectId> {
        let mut entries = Vec::new();

        for dirent in fs::read_dir(dir)? {
            if self.cancel.as_ref().is_some_and(|t| t.is_cancelled()) {
                return Err(StorageError::Cancelled);
            }
            let dirent = dirent?;
            let name = dirent.file_name();
            let path = dirent.path();
            let meta = fs::symlink_metadata(&path)?;

            let (mode, id) = if meta.file_type().is_symlink() {
                let target = link_target_bytes(&path)?;
                (FileMode::Symlink, self.store.write(ObjectType::Blob, &target)?)
            } else if meta.is_dir() {
                if name == self.git_dir {
                    continue;
                }
                (FileMode::Directory, self.write_dir(&path)?)
            } else if meta.is_file() {
                let content = fs::read(&path)?;
                (file_mode(&meta), self.store.write(ObjectType::Blob, &content)?)
            } else {
                tracing::warn!(path = %path.display(), "skipping special file");
                continue;
            };

            entries.push(TreeEntry::new(mode, name_bytes(name)?, id));
        }

        let tree = Tree::new(entries)?;
        let id = self.store.write(ObjectType::Tree, &tree.encode())?;
        tracing::debug!(dir = %dir.display(), tree = %id, entries = tree.len(), "stored tree");
        Ok(id)
    }
}

/// Snapshots `root` into `store`, skipping the default metadata directory.
pub fn write_tree(store: &ObjectStore, root: &Path) -> Result<ObjectId> {
    SnapshotBuilder::new(store).write_tree(root)
}

#[cfg(unix)]
fn file_mode(meta: &Metadata) -> FileMode {
    use std::os::unix::fs::PermissionsExt;
    if meta.permissions().mode() & 0o111 != 0 {
        FileMode::Executable
    } else {
        FileMode::Regular
    }
}

#[cfg(not(unix))]
fn file_mode(_meta: &Metadata) -> FileMode {
    FileMode::Regular
}

#[cfg(unix)]
fn name_bytes(name: OsString) -> Result<Vec<u8>> {
    use std::os::unix::ffi::OsStringExt;
    Ok(name.into_vec())
}

#[cfg(not(unix))]
fn name_bytes(name: OsString) -> Result<Vec<u8>> {
    name.into_string()
        .map(String::into_bytes)
        .map_err(|n| StorageError::InvalidArgument(format!("file name is not UTF-8: {n:?}")))
}

fn link_target_bytes(path: &Path) -> Result<Vec<u8>> {
    let target = fs::read_link(path)?;
    name_bytes(target.into_os_string())
}
