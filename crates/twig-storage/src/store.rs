//! Loose object store: one zlib-compressed, framed object per file under
//! `objects/<2 hex>/<38 hex>`.

use crate::compression::{self, CompressionLevel};
use crate::object::{frame, unframe};
use crate::{GitObject, ObjectId, ObjectType, Result, StorageError};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

/// Content-addressed object store backed by a directory.
#[derive(Debug, Clone)]
pub struct ObjectStore {
    /// The `objects` directory.
    root: PathBuf,
    compression: CompressionLevel,
}

impl ObjectStore {
    /// Creates a store rooted at an `objects` directory. The directory is
    /// created lazily by the first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            compression: CompressionLevel::default(),
        }
    }

    /// Sets the compression level used for new objects.
    pub fn with_compression(mut self, level: CompressionLevel) -> Self {
        self.compression = level;
        self
    }

    /// Returns the `objects` directory.
    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Returns the path an object is (or would be) stored at.
    pub fn object_path(&self, id: &ObjectId) -> PathBuf {
        let hex = id.to_hex();
        self.root.join(&hex[..2]).join(&hex[2..])
    }

    /// Checks if an object exists.
    pub fn exists(&self, id: &ObjectId) -> bool {
        self.object_path(id).is_file()
    }

    /// Reads and verifies an object.
    pub fn read(&self, id: &ObjectId) -> Result<GitObject> {
        let path = self.object_path(id);
        let compressed = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StorageError::NotFound(format!("object {id}")))
            }
            Err(e) => return Err(e.into()),
        };

        let corrupt = |reason: String| StorageError::CorruptObject {
            id: id.to_hex(),
            reason,
        };

        let framed = compression::decompress(&compressed).map_err(|e| corrupt(e.to_string()))?;
        let (object_type, payload) = unframe(&framed).map_err(corrupt)?;
        let object = GitObject::new(object_type, payload.to_vec());
        if object.id != *id {
            return Err(corrupt(format!("content hashes to {}", object.id)));
        }
        Ok(object)
    }

    /// Reads an object and checks that it has the expected type.
    pub fn read_typed(&self, id: &ObjectId, expected: ObjectType) -> Result<GitObject> {
        let object = self.read(id)?;
        if object.object_type != expected {
            return Err(StorageError::InvalidArgument(format!(
                "object {id} is a {}, expected a {expected}",
                object.object_type
            )));
        }
        Ok(object)
    }

    /// Frames, hashes, compresses and stores a payload.
    ///
    /// Writing content that is already present is a no-op returning the
    /// same id. New objects become visible through a rename, so readers
    /// never observe a partially written file.
    pub fn write(&self, object_type: ObjectType, payload: &[u8]) -> Result<ObjectId> {
        let framed = frame(object_type, payload);
        let id = ObjectId::digest(&framed);
        let path = self.object_path(&id);
        if path.is_file() {
            tracing::trace!(id = %id, "object already present");
            return Ok(id);
        }

        let shard = path
            .parent()
            .ok_or_else(|| StorageError::InvalidArgument(format!("bad object path for {id}")))?;
        fs::create_dir_all(shard)?;

        let compressed = compression::compress(&framed, self.compression)?;
        let mut tmp = tempfile::Builder::new()
            .prefix("tmp_obj_")
            .tempfile_in(shard)?;
        tmp.write_all(&compressed)?;
        tmp.as_file().sync_all()?;

        if let Err(e) = tmp.persist(&path) {
            // A concurrent writer may have stored the same content first.
            if !path.is_file() {
                return Err(e.error.into());
            }
        }

        tracing::debug!(id = %id, kind = %object_type, size = payload.len(), "wrote object");
        Ok(id)
    }

    /// Stores an already constructed object.
    pub fn put(&self, object: &GitObject) -> Result<ObjectId> {
        self.write(object.object_type, &object.data)
    }

    /// Stores the contents of a file as a blob.
    pub fn write_blob_from_path(&self, path: &Path) -> Result<ObjectId> {
        let content = fs::read(path)?;
        self.write(ObjectType::Blob, &content)
    }

    /// Computes the blob id of a file without storing it.
    pub fn hash_file(path: &Path) -> Result<ObjectId> {
        let content = fs::read(path)?;
        Ok(ObjectId::hash_object(ObjectType::Blob, &content))
    }

    /// Lists every loose object id in the store.
    pub fn list_objects(&self) -> Result<Vec<ObjectId>> {
        let mut ids = Vec::new();
        let shards = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(ids),
            Err(e) => return Err(e.into()),
        };

        for shard in shards {
            let shard = shard?;
            let prefix = shard.file_name().to_string_lossy().into_owned();
            if prefix.len() != 2 || !shard.file_type()?.is_dir() {
                continue;
            }
            for entry in fs::read_dir(shard.path())? {
                let name = entry?.file_name().to_string_lossy().into_owned();
                if let Ok(id) = ObjectId::from_hex(&format!("{prefix}{name}")) {
                    ids.push(id);
                }
            }
        }
        ids.sort();
        Ok(ids)
    }
}
