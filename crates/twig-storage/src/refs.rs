//! Git reference management backed by files under the metadata directory.

use crate::{ObjectId, Result, StorageError};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

/// Symbolic refs are followed at most this many times.
const MAX_SYMREF_DEPTH: usize = 5;

/// A git reference (branch, tag, or symbolic ref).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reference {
    /// Direct reference to an object.
    Direct(ObjectId),
    /// Symbolic reference (e.g., HEAD -> refs/heads/main).
    Symbolic(String),
}

impl Reference {
    /// Returns the object ID if this is a direct reference.
    pub fn as_direct(&self) -> Option<ObjectId> {
        match self {
            Self::Direct(id) => Some(*id),
            Self::Symbolic(_) => None,
        }
    }

    fn parse(name: &str, content: &str) -> Result<Self> {
        let content = content.trim_end();
        if let Some(target) = content.strip_prefix("ref: ") {
            validate_ref_name(target)?;
            return Ok(Self::Symbolic(target.to_string()));
        }
        ObjectId::from_hex(content)
            .map(Self::Direct)
            .map_err(|_| StorageError::CorruptObject {
                id: name.to_string(),
                reason: format!("unparseable ref content {content:?}"),
            })
    }
}

/// Checks that `name` is `HEAD` or a well formed `refs/...` path.
pub fn validate_ref_name(name: &str) -> Result<()> {
    let bad = |why: &str| StorageError::InvalidArgument(format!("invalid ref name {name:?}: {why}"));

    if name == "HEAD" {
        return Ok(());
    }
    if !name.starts_with("refs/") {
        return Err(bad("must be HEAD or start with refs/"));
    }
    for component in name.split('/') {
        if component.is_empty() {
            return Err(bad("empty component"));
        }
        if component.starts_with('.') || component.ends_with(".lock") {
            return Err(bad("reserved component"));
        }
    }
    if name.contains("..")
        || name.contains("@{")
        || name
            .chars()
            .any(|c| c.is_ascii_control() || " ~^:?*[\\".contains(c))
    {
        return Err(bad("forbidden character sequence"));
    }
    Ok(())
}

/// File-backed reference store rooted at the metadata directory.
#[derive(Debug, Clone)]
pub struct RefStore {
    git_dir: PathBuf,
}

impl RefStore {
    /// Creates a reference store over `git_dir`.
    pub fn new(git_dir: impl Into<PathBuf>) -> Self {
        Self {
            git_dir: git_dir.into(),
        }
    }

    fn path(&self, name: &str) -> Result<PathBuf> {
        validate_ref_name(name)?;
        Ok(self.git_dir.join(name))
    }

    /// Reads a reference without following it.
    pub fn read(&self, name: &str) -> Result<Reference> {
        let path = self.path(name)?;
        match fs::read_to_string(&path) {
            Ok(content) => Reference::parse(name, &content),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(StorageError::NotFound(format!("ref {name}")))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Points `name` directly at `id`.
    pub fn write(&self, name: &str, id: &ObjectId) -> Result<()> {
        self.write_raw(name, &format!("{id}\n"))
    }

    /// Makes `name` a symbolic ref to `target`.
    pub fn write_symbolic(&self, name: &str, target: &str) -> Result<()> {
        validate_ref_name(target)?;
        self.write_raw(name, &format!("ref: {target}\n"))
    }

    fn write_raw(&self, name: &str, content: &str) -> Result<()> {
        let path = self.path(name)?;
        let dir = path
            .parent()
            .ok_or_else(|| StorageError::InvalidArgument(format!("ref {name} has no parent")))?;
        fs::create_dir_all(dir)?;

        let mut tmp = tempfile::Builder::new().prefix(".tmp_ref_").tempfile_in(dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.persist(&path).map_err(|e| e.error)?;
        tracing::debug!(name = %name, "updated ref");
        Ok(())
    }

    /// Follows symbolic refs until an object id is reached.
    pub fn resolve(&self, name: &str) -> Result<ObjectId> {
        let mut current = name.to_string();
        for _ in 0..=MAX_SYMREF_DEPTH {
            match self.read(&current)? {
                Reference::Direct(id) => return Ok(id),
                Reference::Symbolic(target) => current = target,
            }
        }
        Err(StorageError::InvalidArgument(format!(
            "symbolic ref chain from {name} is too deep"
        )))
    }

    /// Returns the branch HEAD points at, if HEAD is symbolic.
    pub fn head_target(&self) -> Result<Option<String>> {
        Ok(match self.read("HEAD")? {
            Reference::Symbolic(target) => Some(target),
            Reference::Direct(_) => None,
        })
    }

    /// Lists every direct ref under `refs/`, sorted by name.
    pub fn list(&self) -> Result<Vec<(String, ObjectId)>> {
        let mut refs = Vec::new();
        let root = self.git_dir.join("refs");
        collect(&self.git_dir, &root, &mut refs)?;
        refs.sort();
        Ok(refs)
    }
}

fn collect(git_dir: &Path, dir: &Path, out: &mut Vec<(String, ObjectId)>) -> Result<()> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            collect(git_dir, &path, out)?;
            continue;
        }
        let Ok(relative) = path.strip_prefix(git_dir) else {
            continue;
        };
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        if validate_ref_name(&name).is_err() {
            continue;
        }
        let content = fs::read_to_string(&path)?;
        if let Reference::Direct(id) = Reference::parse(&name, &content)? {
            out.push((name, id));
        }
    }
    Ok(())
}
