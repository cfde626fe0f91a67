//! A repository on disk: working tree, metadata directory, objects and refs.

use crate::checkout::{CheckoutStats, Checkout};
use crate::commit::{build_commit_body, Commit, Signature};
use crate::snapshot::SnapshotBuilder;
use crate::tree::Tree;
use crate::{ObjectId, ObjectStore, ObjectType, RefStore, Result, StoreConfig, StorageError};
use std::fs;
use std::path::{Path, PathBuf};

/// Branch a fresh repository's HEAD points at.
pub const DEFAULT_BRANCH: &str = "refs/heads/main";

/// A git repository rooted at an explicit working tree path.
#[derive(Debug, Clone)]
pub struct Repository {
    work_tree: PathBuf,
    git_dir: PathBuf,
    config: StoreConfig,
    objects: ObjectStore,
    refs: RefStore,
}

impl Repository {
    /// Creates the metadata layout under `root` if it is missing.
    ///
    /// Re-running on an existing repository leaves its HEAD and objects
    /// untouched.
    pub fn init(root: &Path, config: StoreConfig) -> Result<Self> {
        let git_dir = root.join(&config.git_dir);
        for sub in ["objects", "refs/heads", "refs/tags"] {
            fs::create_dir_all(git_dir.join(sub))?;
        }

        let repo = Self::at(root, config);
        if !git_dir.join("HEAD").exists() {
            repo.refs.write_symbolic("HEAD", DEFAULT_BRANCH)?;
        }
        tracing::info!(git_dir = %git_dir.display(), "initialized repository");
        Ok(repo)
    }

    /// Opens an existing repository.
    pub fn open(root: &Path, config: StoreConfig) -> Result<Self> {
        let git_dir = root.join(&config.git_dir);
        if !git_dir.join("objects").is_dir() {
            return Err(StorageError::NotFound(format!(
                "no repository at {}",
                root.display()
            )));
        }
        Ok(Self::at(root, config))
    }

    fn at(root: &Path, config: StoreConfig) -> Self {
        let git_dir = root.join(&config.git_dir);
        let objects = ObjectStore::new(git_dir.join("objects")).with_compression(config.compression);
        let refs = RefStore::new(&git_dir);
        Self {
            work_tree: root.to_path_buf(),
            git_dir,
            config,
            objects,
            refs,
        }
    }

    /// The working tree root.
    pub fn work_tree(&self) -> &Path {
        &self.work_tree
    }

    /// The metadata directory.
    pub fn git_dir(&self) -> &Path {
        &self.git_dir
    }

    /// The object store.
    pub fn objects(&self) -> &ObjectStore {
        &self.objects
    }

    /// The reference store.
    pub fn refs(&self) -> &RefStore {
        &self.refs
    }

    /// Hashes a file as a blob, storing it when `write` is set.
    pub fn hash_object(&self, path: &Path, write: bool) -> Result<ObjectId> {
        if write {
            self.objects.write_blob_from_path(path)
        } else {
            ObjectStore::hash_file(path)
        }
    }

    /// Snapshots the working tree.
    pub fn write_tree(&self) -> Result<ObjectId> {
        SnapshotBuilder::new(&self.objects)
            .git_dir(self.config.git_dir.clone())
            .write_tree(&self.work_tree)
    }

    /// Creates a commit object for an existing tree.
    ///
    /// Arguments are validated before anything is written: ids must be
    /// canonical hex, the tree must be a stored tree and every parent a
    /// stored commit.
    pub fn commit_tree(
        &self,
        tree: &str,
        parents: &[&str],
        author: &Signature,
        committer: &Signature,
        message: &str,
    ) -> Result<ObjectId> {
        let body = build_commit_body(tree, parents, author, committer, message)?;

        self.objects.read_typed(&ObjectId::from_hex(tree)?, ObjectType::Tree)?;
        for parent in parents {
            self.objects
                .read_typed(&ObjectId::from_hex(parent)?, ObjectType::Commit)?;
        }

        let id = self.objects.write(ObjectType::Commit, &body)?;
        tracing::info!(commit = %id, tree = %tree, parents = parents.len(), "created commit");
        Ok(id)
    }

    /// Renders an object for display, like `cat-file -p`.
    pub fn pretty_print(&self, id: &str) -> Result<Vec<u8>> {
        let id = ObjectId::from_hex(id)?;
        let object = self.objects.read(&id)?;
        match object.object_type {
            ObjectType::Tree => {
                let tree = Tree::decode(&object.data)?;
                let mut out = Vec::new();
                for entry in &tree {
                    out.extend_from_slice(
                        format!("{:0>6} {} {}\t", entry.mode, entry.mode.object_kind(), entry.id)
                            .as_bytes(),
                    );
                    out.extend_from_slice(&entry.name);
                    out.push(b'\n');
                }
                Ok(out)
            }
            _ => Ok(object.data.to_vec()),
        }
    }

    /// Lists a tree's entries, like `ls-tree`. Commits are peeled to their
    /// tree.
    pub fn list_tree(&self, id: &str, name_only: bool) -> Result<Vec<String>> {
        let tree_id = self.peel_to_tree(&ObjectId::from_hex(id)?)?;
        let tree = Tree::decode(&self.objects.read(&tree_id)?.data)?;
        Ok(tree
            .iter()
            .map(|entry| {
                if name_only {
                    entry.name_lossy()
                } else {
                    format!(
                        "{:0>6} {} {}\t{}",
                        entry.mode,
                        entry.mode.object_kind(),
                        entry.id,
                        entry.name_lossy()
                    )
                }
            })
            .collect())
    }

    /// Returns the tree a commit (or tree) id designates.
    pub fn peel_to_tree(&self, id: &ObjectId) -> Result<ObjectId> {
        let object = self.objects.read(id)?;
        match object.object_type {
            ObjectType::Tree => Ok(*id),
            ObjectType::Commit => Commit::tree_of(&object),
            other => Err(StorageError::InvalidArgument(format!(
                "object {id} is a {other}, not a tree or commit"
            ))),
        }
    }

    /// Resolves HEAD to the tree of the commit it points at.
    pub fn head_tree(&self) -> Result<ObjectId> {
        let head = self.refs.resolve("HEAD")?;
        self.peel_to_tree(&head)
    }

    /// Materializes a tree into the working tree.
    pub fn checkout(&self, tree_id: &ObjectId) -> Result<CheckoutStats> {
        self.checkout_with(Checkout::new(&self.objects), tree_id)
    }

    /// Materializes a tree using a preconfigured checkout (for example one
    /// carrying a cancellation token).
    pub fn checkout_with(&self, checkout: Checkout<'_>, tree_id: &ObjectId) -> Result<CheckoutStats> {
        checkout
            .git_dir(self.config.git_dir.clone())
            .render(tree_id, &self.work_tree)
    }
}
