//! Working tree materialization: recreate files and directories from a
//! stored tree.

use crate::config::DEFAULT_GIT_DIR;
use crate::tree::{FileMode, Tree};
use crate::{ObjectId, ObjectStore, ObjectType, Result, StorageError};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

/// Summary of a finished checkout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CheckoutStats {
    /// Files (including symlinks) written.
    pub files: usize,
    /// Directories created.
    pub directories: usize,
}

/// Writes the contents of tree objects into a destination directory.
///
/// Any failure aborts the whole render; files already written are left in
/// place.
#[derive(Debug, Clone)]
pub struct Checkout<'a> {
    store: &'a ObjectStore,
    git_dir: String,
    cancel: Option<CancellationToken>,
}

impl<'a> Checkout<'a> {
    /// Creates a checkout reading from `store`.
    pub fn new(store: &'a ObjectStore) -> Self {
        Self {
            store,
            git_dir: DEFAULT_GIT_DIR.to_string(),
            cancel: None,
        }
    }

    /// Sets the metadata directory name that must never be written.
    pub fn git_dir(mut self, name: impl Into<String>) -> Self {
        self.git_dir = name.into();
        self
    }

    /// Aborts between entries once `token` is cancelled.
    pub fn cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Renders `tree_id` into `dest`, which is created if missing.
    pub fn render(&self, tree_id: &ObjectId, dest: &Path) -> Result<CheckoutStats> {
        let mut stats = CheckoutStats::default();
        fs::create_dir_all(dest)?;

        // Explicit stack so deeply nested trees cannot exhaust the call stack.
        let mut pending: Vec<(ObjectId, PathBuf)> = vec![(*tree_id, dest.to_path_buf())];

        while let Some((id, dir)) = pending.pop() {
            let object = self.store.read_typed(&id, ObjectType::Tree)?;
            let tree = Tree::decode(&object.data)?;

            for entry in &tree {
                if self.cancel.as_ref().is_some_and(|t| t.is_cancelled()) {
                    return Err(StorageError::Cancelled);
                }
                self.check_name(&entry.name)?;
                let path = dir.join(entry_path(&entry.name)?);

                match entry.mode {
                    FileMode::Directory | FileMode::Gitlink => {
                        if !prepare(&path, true)? {
                            fs::create_dir(&path)?;
                        }
                        stats.directories += 1;
                        // Submodule contents live in another repository.
                        if entry.mode == FileMode::Directory {
                            pending.push((entry.id, path));
                        }
                    }
                    FileMode::Symlink => {
                        let blob = self.store.read_typed(&entry.id, ObjectType::Blob)?;
                        prepare(&path, false)?;
                        write_symlink(&blob.data, &path)?;
                        stats.files += 1;
                    }
                    mode => {
                        let blob = self.store.read_typed(&entry.id, ObjectType::Blob)?;
                        prepare(&path, false)?;
                        fs::OpenOptions::new()
                            .write(true)
                            .create_new(true)
                            .open(&path)?
                            .write_all(&blob.data)?;
                        set_executable(&path, mode == FileMode::Executable)?;
                        stats.files += 1;
                    }
                }
            }
        }

        tracing::info!(
            tree = %tree_id,
            dest = %dest.display(),
            files = stats.files,
            directories = stats.directories,
            "checked out tree"
        );
        Ok(stats)
    }

    fn check_name(&self, name: &[u8]) -> Result<()> {
        let invalid = name.is_empty()
            || name == b"."
            || name == b".."
            || name.contains(&b'/')
            || name.contains(&b'\\')
            || name.contains(&0);
        if invalid {
            return Err(StorageError::InvalidArgument(format!(
                "refusing to check out path {:?}",
                String::from_utf8_lossy(name)
            )));
        }
        if name.eq_ignore_ascii_case(self.git_dir.as_bytes()) {
            return Err(StorageError::InvalidArgument(format!(
                "tree contains the metadata directory {:?}",
                self.git_dir
            )));
        }
        Ok(())
    }
}

/// Checks what already exists at `path` before an entry is written there.
///
/// A directory entry never descends through an existing symlink. A
/// directory already in place is reused. Files and symlinks in the way of
/// a file entry are unlinked, not followed, so the entry is created fresh.
/// Returns whether a directory is already in place.
fn prepare(path: &Path, want_dir: bool) -> Result<bool> {
    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e.into()),
    };
    let file_type = meta.file_type();
    if file_type.is_dir() {
        if want_dir {
            return Ok(true);
        }
        return Err(StorageError::InvalidArgument(format!(
            "a directory is in the way of {}",
            path.display()
        )));
    }
    if want_dir {
        let what = if file_type.is_symlink() { "symlink" } else { "file" };
        return Err(StorageError::InvalidArgument(format!(
            "refusing to replace {what} {} with a directory",
            path.display()
        )));
    }
    fs::remove_file(path)?;
    Ok(false)
}

/// Renders `tree_id` into `dest` with default settings.
pub fn render(store: &ObjectStore, tree_id: &ObjectId, dest: &Path) -> Result<CheckoutStats> {
    Checkout::new(store).render(tree_id, dest)
}

#[cfg(unix)]
fn entry_path(name: &[u8]) -> Result<PathBuf> {
    use std::os::unix::ffi::OsStrExt;
    Ok(PathBuf::from(std::ffi::OsStr::from_bytes(name)))
}

#[cfg(not(unix))]
fn entry_path(name: &[u8]) -> Result<PathBuf> {
    std::str::from_utf8(name)
        .map(PathBuf::from)
        .map_err(|_| StorageError::InvalidArgument("entry name is not UTF-8".to_string()))
}

#[cfg(unix)]
fn set_executable(path: &Path, executable: bool) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mode = if executable { 0o755 } else { 0o644 };
    fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_executable(_path: &Path, _executable: bool) -> Result<()> {
    Ok(())
}

#[cfg(unix)]
fn write_symlink(target: &[u8], path: &Path) -> Result<()> {
    std::os::unix::fs::symlink(entry_path(target)?, path)?;
    Ok(())
}

#[cfg(not(unix))]
fn write_symlink(target: &[u8], path: &Path) -> Result<()> {
    fs::write(path, target)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::write_tree;
    use crate::tree::TreeEntry;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> ObjectStore {
        ObjectStore::new(dir.path().join("objects"))
    }

    #[test]
    fn test_render_nested() {
        let meta = TempDir::new().unwrap();
        let store = store(&meta);
        let blob = store.write(ObjectType::Blob, b"inner").unwrap();
        let sub = Tree::new(vec![TreeEntry::new(FileMode::Regular, "inner.txt", blob)]).unwrap();
        let sub_id = store.write(ObjectType::Tree, &sub.encode()).unwrap();
        let top_blob = store.write(ObjectType::Blob, b"top").unwrap();
        let root = Tree::new(vec![
            TreeEntry::new(FileMode::Directory, "sub", sub_id),
            TreeEntry::new(FileMode::Regular, "top.txt", top_blob),
        ])
        .unwrap();
        let root_id = store.write(ObjectType::Tree, &root.encode()).unwrap();

        let out = TempDir::new().unwrap();
        let stats = render(&store, &root_id, out.path()).unwrap();
        assert_eq!(stats, CheckoutStats { files: 2, directories: 1 });
        assert_eq!(fs::read(out.path().join("top.txt")).unwrap(), b"top");
        assert_eq!(fs::read(out.path().join("sub/inner.txt")).unwrap(), b"inner");
    }

    #[test]
    fn test_snapshot_checkout_roundtrip() {
        let work = TempDir::new().unwrap();
        fs::create_dir_all(work.path().join("a/b")).unwrap();
        fs::write(work.path().join("a/b/c.txt"), b"c").unwrap();
        fs::write(work.path().join("root.txt"), b"root").unwrap();

        let meta = TempDir::new().unwrap();
        let store = store(&meta);
        let id = write_tree(&store, work.path()).unwrap();

        let out = TempDir::new().unwrap();
        render(&store, &id, out.path()).unwrap();
        assert_eq!(write_tree(&store, out.path()).unwrap(), id);
    }

    #[test]
    fn test_missing_blob_aborts() {
        let meta = TempDir::new().unwrap();
        let store = store(&meta);
        let tree = Tree::new(vec![TreeEntry::new(
            FileMode::Regular,
            "ghost",
            ObjectId::from_bytes([4u8; 20]),
        )])
        .unwrap();
        let id = store.write(ObjectType::Tree, &tree.encode()).unwrap();
        let out = TempDir::new().unwrap();
        assert!(matches!(
            render(&store, &id, out.path()),
            Err(StorageError::NotFound(_))
        ));
    }

    #[test]
    fn test_refuses_git_dir_entry() {
        let meta = TempDir::new().unwrap();
        let store = store(&meta);
        let blob = store.write(ObjectType::Blob, b"evil").unwrap();
        let tree = Tree::new(vec![TreeEntry::new(FileMode::Regular, ".git", blob)]).unwrap();
        let id = store.write(ObjectType::Tree, &tree.encode()).unwrap();
        let out = TempDir::new().unwrap();
        assert!(render(&store, &id, out.path()).is_err());
        assert!(!out.path().join(".git").exists());
    }

    #[test]
    fn test_refuses_traversal_in_decoded_tree() {
        let meta = TempDir::new().unwrap();
        let store = store(&meta);
        let blob = store.write(ObjectType::Blob, b"x").unwrap();
        let mut payload = b"100644 ..\0".to_vec();
        payload.extend_from_slice(blob.as_bytes());
        let id = store.write(ObjectType::Tree, &payload).unwrap();
        let out = TempDir::new().unwrap();
        assert!(matches!(
            render(&store, &id, out.path()),
            Err(StorageError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_not_a_tree() {
        let meta = TempDir::new().unwrap();
        let store = store(&meta);
        let blob = store.write(ObjectType::Blob, b"x").unwrap();
        let out = TempDir::new().unwrap();
        assert!(render(&store, &blob, out.path()).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_executable_mode_restored() {
        use std::os::unix::fs::PermissionsExt;
        let meta = TempDir::new().unwrap();
        let store = store(&meta);
        let blob = store.write(ObjectType::Blob, b"#!/bin/sh\n").unwrap();
        let tree = Tree::new(vec![TreeEntry::new(FileMode::Executable, "run", blob)]).unwrap();
        let id = store.write(ObjectType::Tree, &tree.encode()).unwrap();

        let out = TempDir::new().unwrap();
        render(&store, &id, out.path()).unwrap();
        let mode = fs::metadata(out.path().join("run")).unwrap().permissions().mode();
        assert_ne!(mode & 0o111, 0);
    }

    #[test]
    fn test_cancelled_render() {
        let meta = TempDir::new().unwrap();
        let store = store(&meta);
        let blob = store.write(ObjectType::Blob, b"x").unwrap();
        let tree = Tree::new(vec![TreeEntry::new(FileMode::Regular, "x", blob)]).unwrap();
        let id = store.write(ObjectType::Tree, &tree.encode()).unwrap();

        let token = CancellationToken::new();
        token.cancel();
        let out = TempDir::new().unwrap();
        let result = Checkout::new(&store).cancel_token(token).render(&id, out.path());
        assert!(matches!(result, Err(StorageError::Cancelled)));
        assert!(!out.path().join("x").exists());
    }

    /// Writes a tree payload as-is, bypassing `Tree::new` validation.
    fn raw_tree(store: &ObjectStore, entries: &[(&str, &str, ObjectId)]) -> ObjectId {
        let mut payload = Vec::new();
        for (mode, name, id) in entries {
            payload.extend_from_slice(format!("{mode} {name}\0").as_bytes());
            payload.extend_from_slice(id.as_bytes());
        }
        store.write(ObjectType::Tree, &payload).unwrap()
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_then_directory_with_same_name() {
        let meta = TempDir::new().unwrap();
        let store = store(&meta);
        let outside = TempDir::new().unwrap();

        let target = store
            .write(ObjectType::Blob, outside.path().to_string_lossy().as_bytes())
            .unwrap();
        let payload = store.write(ObjectType::Blob, b"payload").unwrap();
        let sub = raw_tree(&store, &[("100644", "pwn", payload)]);
        let root = raw_tree(&store, &[("120000", "a", target), ("40000", "a", sub)]);

        let out = TempDir::new().unwrap();
        assert!(render(&store, &root, out.path()).is_err());
        assert!(!outside.path().join("pwn").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_directory_entries_never_follow_symlinks() {
        let meta = TempDir::new().unwrap();
        let store = store(&meta);
        let outside = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        std::os::unix::fs::symlink(outside.path(), out.path().join("dir")).unwrap();
        std::os::unix::fs::symlink(outside.path().join("file"), out.path().join("file")).unwrap();

        let payload = store.write(ObjectType::Blob, b"payload").unwrap();
        let sub = raw_tree(&store, &[("100644", "pwn", payload)]);

        let via_dir = raw_tree(&store, &[("40000", "dir", sub)]);
        assert!(matches!(
            render(&store, &via_dir, out.path()),
            Err(StorageError::InvalidArgument(_))
        ));
        assert!(!outside.path().join("pwn").exists());

        // A file entry replaces the link instead of following it.
        let via_file = raw_tree(&store, &[("100644", "file", payload)]);
        render(&store, &via_file, out.path()).unwrap();
        assert!(!outside.path().join("file").exists());
        let link_meta = fs::symlink_metadata(out.path().join("file")).unwrap();
        assert!(link_meta.file_type().is_file());
        assert_eq!(fs::read(out.path().join("file")).unwrap(), b"payload");
    }

    #[test]
    fn test_rerender_replaces_files_and_reuses_directories() {
        let meta = TempDir::new().unwrap();
        let store = store(&meta);
        let old = store.write(ObjectType::Blob, b"old").unwrap();
        let new = store.write(ObjectType::Blob, b"new").unwrap();
        let sub_old = raw_tree(&store, &[("100644", "f", old)]);
        let sub_new = raw_tree(&store, &[("100644", "f", new)]);

        let out = TempDir::new().unwrap();
        render(&store, &raw_tree(&store, &[("40000", "d", sub_old)]), out.path()).unwrap();
        render(&store, &raw_tree(&store, &[("40000", "d", sub_new)]), out.path()).unwrap();
        assert_eq!(fs::read(out.path().join("d/f")).unwrap(), b"new");
    }
}
