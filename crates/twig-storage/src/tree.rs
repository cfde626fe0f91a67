//! Tree objects: the binary directory listing format.
//!
//! Each entry is `<octal mode> <name>\0<20 raw id bytes>`, entries back to
//! back with no separator. Entry order is part of the object's identity, so
//! [`Tree::new`] always sorts into canonical git order before encoding.

use crate::{ObjectId, Result, StorageError};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;

/// The mode of a tree entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileMode {
    /// Regular file, `100644`.
    Regular,
    /// Executable file, `100755`.
    Executable,
    /// Symbolic link, `120000`.
    Symlink,
    /// Subdirectory, `40000`.
    Directory,
    /// Submodule commit, `160000`.
    Gitlink,
    /// Any other octal mode found in the wild.
    Other(u32),
}

impl FileMode {
    /// Returns the numeric mode.
    pub fn bits(self) -> u32 {
        match self {
            Self::Regular => 0o100644,
            Self::Executable => 0o100755,
            Self::Symlink => 0o120000,
            Self::Directory => 0o40000,
            Self::Gitlink => 0o160000,
            Self::Other(bits) => bits,
        }
    }

    /// Maps numeric mode bits to a mode.
    pub fn from_bits(bits: u32) -> Self {
        match bits {
            0o100644 => Self::Regular,
            0o100755 => Self::Executable,
            0o120000 => Self::Symlink,
            0o40000 => Self::Directory,
            0o160000 => Self::Gitlink,
            other => Self::Other(other),
        }
    }

    /// Parses the ASCII octal digits used in the tree format.
    pub fn parse(digits: &[u8]) -> Result<Self> {
        if digits.is_empty() || !digits.iter().all(|b| (b'0'..=b'7').contains(b)) {
            return Err(StorageError::MalformedTree(format!(
                "invalid mode {:?}",
                String::from_utf8_lossy(digits)
            )));
        }
        let text = std::str::from_utf8(digits)
            .map_err(|_| StorageError::MalformedTree("mode is not ASCII".to_string()))?;
        let bits = u32::from_str_radix(text, 8)
            .map_err(|_| StorageError::MalformedTree(format!("mode out of range: {text}")))?;
        Ok(Self::from_bits(bits))
    }

    /// Whether the entry points at another tree.
    pub fn is_tree(self) -> bool {
        self == Self::Directory
    }

    /// Name of the object type the entry points at.
    pub fn object_kind(self) -> &'static str {
        match self {
            Self::Directory => "tree",
            Self::Gitlink => "commit",
            _ => "blob",
        }
    }
}

impl fmt::Display for FileMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&format!("{:o}", self.bits()))
    }
}

/// A single directory entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    /// Entry mode.
    pub mode: FileMode,
    /// Path segment; raw bytes, never containing `/` or NUL.
    pub name: Vec<u8>,
    /// Target object.
    pub id: ObjectId,
}

impl TreeEntry {
    /// Creates an entry.
    pub fn new(mode: FileMode, name: impl Into<Vec<u8>>, id: ObjectId) -> Self {
        Self {
            mode,
            name: name.into(),
            id,
        }
    }

    /// Returns the name, lossily converted to UTF-8.
    pub fn name_lossy(&self) -> String {
        String::from_utf8_lossy(&self.name).into_owned()
    }

    fn validate(&self) -> Result<()> {
        let name = &self.name;
        if name.is_empty() || name == b"." || name == b".." {
            return Err(StorageError::InvalidArgument(format!(
                "invalid tree entry name {:?}",
                self.name_lossy()
            )));
        }
        if name.iter().any(|&b| b == b'/' || b == 0) {
            return Err(StorageError::InvalidArgument(format!(
                "tree entry name contains a separator: {:?}",
                self.name_lossy()
            )));
        }
        Ok(())
    }
}

/// Canonical git ordering: byte-wise on the name, with tree entries
/// compared as though their name ended in `/`.
pub fn canonical_order(a: &TreeEntry, b: &TreeEntry) -> Ordering {
    let a_suffix = a.mode.is_tree().then_some(b'/');
    let b_suffix = b.mode.is_tree().then_some(b'/');
    a.name
        .iter()
        .copied()
        .chain(a_suffix)
        .cmp(b.name.iter().copied().chain(b_suffix))
}

/// An ordered list of directory entries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tree {
    entries: Vec<TreeEntry>,
}

impl Tree {
    /// Builds a tree from entries in any order.
    ///
    /// Entries are sorted canonically; empty names, names containing a
    /// separator and duplicate names are rejected.
    pub fn new(mut entries: Vec<TreeEntry>) -> Result<Self> {
        let mut seen = HashSet::with_capacity(entries.len());
        for entry in &entries {
            entry.validate()?;
            if !seen.insert(entry.name.as_slice()) {
                return Err(StorageError::InvalidArgument(format!(
                    "duplicate tree entry {:?}",
                    entry.name_lossy()
                )));
            }
        }
        entries.sort_by(canonical_order);
        Ok(Self { entries })
    }

    /// Returns the entries in stored order.
    pub fn entries(&self) -> &[TreeEntry] {
        &self.entries
    }

    /// Iterates over the entries.
    pub fn iter(&self) -> std::slice::Iter<'_, TreeEntry> {
        self.entries.iter()
    }

    /// Looks up an entry by name.
    pub fn get(&self, name: &[u8]) -> Option<&TreeEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true for the empty tree.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Serializes the tree into its object payload.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.entries.len() * 48);
        for entry in &self.entries {
            out.extend_from_slice(entry.mode.to_string().as_bytes());
            out.push(b' ');
            out.extend_from_slice(&entry.name);
            out.push(0);
            out.extend_from_slice(entry.id.as_bytes());
        }
        out
    }

    /// Parses a tree payload, keeping entries in the order they appear.
    ///
    /// A name appearing twice is `MalformedTree`.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut entries = Vec::new();
        let mut seen = HashSet::new();
        let mut pos = 0;

        while pos < data.len() {
            let rest = &data[pos..];
            let space = rest.iter().position(|&b| b == b' ').ok_or_else(|| {
                StorageError::MalformedTree(format!("missing space after mode at byte {pos}"))
            })?;
            let mode = FileMode::parse(&rest[..space])?;

            let after_mode = &rest[space + 1..];
            let nul = after_mode.iter().position(|&b| b == 0).ok_or_else(|| {
                StorageError::MalformedTree(format!("unterminated entry name at byte {pos}"))
            })?;
            let name = after_mode[..nul].to_vec();
            if name.is_empty() {
                return Err(StorageError::MalformedTree(format!(
                    "empty entry name at byte {pos}"
                )));
            }

            let id_bytes = &after_mode[nul + 1..];
            if id_bytes.len() < ObjectId::LEN {
                return Err(StorageError::MalformedTree(format!(
                    "entry {:?} has {} id bytes, need 20",
                    String::from_utf8_lossy(&name),
                    id_bytes.len()
                )));
            }
            let id = ObjectId::from_slice(&id_bytes[..ObjectId::LEN])?;

            if !seen.insert(name.clone()) {
                return Err(StorageError::MalformedTree(format!(
                    "duplicate entry {:?} at byte {pos}",
                    String::from_utf8_lossy(&name)
                )));
            }

            pos += space + 1 + nul + 1 + ObjectId::LEN;
            entries.push(TreeEntry { mode, name, id });
        }

        Ok(Self { entries })
    }
}

impl<'a> IntoIterator for &'a Tree {
    type Item = &'a TreeEntry;
    type IntoIter = std::slice::Iter<'a, TreeEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(byte: u8) -> ObjectId {
        ObjectId::from_bytes([byte; 20])
    }

    #[test]
    fn test_encode_layout() {
        let tree = Tree::new(vec![TreeEntry::new(FileMode::Regular, "a.txt", id(0xaa))]).unwrap();
        let mut expected = b"100644 a.txt\0".to_vec();
        expected.extend_from_slice(&[0xaa; 20]);
        assert_eq!(tree.encode(), expected);
    }

    #[test]
    fn test_directory_mode_has_no_leading_zero() {
        let tree = Tree::new(vec![TreeEntry::new(FileMode::Directory, "src", id(1))]).unwrap();
        assert!(tree.encode().starts_with(b"40000 src\0"));
    }

    #[test]
    fn test_roundtrip() {
        let tree = Tree::new(vec![
            TreeEntry::new(FileMode::Regular, "README.md", id(1)),
            TreeEntry::new(FileMode::Executable, "build.sh", id(2)),
            TreeEntry::new(FileMode::Directory, "src", id(3)),
            TreeEntry::new(FileMode::Symlink, "link", id(4)),
        ])
        .unwrap();
        assert_eq!(Tree::decode(&tree.encode()).unwrap(), tree);
    }

    #[test]
    fn test_sorting_is_byte_wise() {
        let tree = Tree::new(vec![
            TreeEntry::new(FileMode::Regular, "b", id(1)),
            TreeEntry::new(FileMode::Regular, "B", id(2)),
            TreeEntry::new(FileMode::Regular, "a", id(3)),
        ])
        .unwrap();
        let names: Vec<_> = tree.iter().map(|e| e.name_lossy()).collect();
        assert_eq!(names, ["B", "a", "b"]);
    }

    #[test]
    fn test_directories_sort_with_trailing_slash() {
        // "foo.txt" < "foo/" because '.' (0x2e) < '/' (0x2f).
        let tree = Tree::new(vec![
            TreeEntry::new(FileMode::Directory, "foo", id(1)),
            TreeEntry::new(FileMode::Regular, "foo.txt", id(2)),
            TreeEntry::new(FileMode::Regular, "foo-bar", id(3)),
        ])
        .unwrap();
        let names: Vec<_> = tree.iter().map(|e| e.name_lossy()).collect();
        assert_eq!(names, ["foo-bar", "foo.txt", "foo"]);
    }

    #[test]
    fn test_same_entries_any_order_encode_identically() {
        let a = Tree::new(vec![
            TreeEntry::new(FileMode::Regular, "x", id(1)),
            TreeEntry::new(FileMode::Regular, "y", id(2)),
        ])
        .unwrap();
        let b = Tree::new(vec![
            TreeEntry::new(FileMode::Regular, "y", id(2)),
            TreeEntry::new(FileMode::Regular, "x", id(1)),
        ])
        .unwrap();
        assert_eq!(a.encode(), b.encode());
    }

    #[test]
    fn test_rejects_bad_names() {
        for name in ["", ".", "..", "a/b"] {
            let result = Tree::new(vec![TreeEntry::new(FileMode::Regular, name, id(1))]);
            assert!(matches!(result, Err(StorageError::InvalidArgument(_))), "{name}");
        }
    }

    #[test]
    fn test_rejects_duplicates() {
        let result = Tree::new(vec![
            TreeEntry::new(FileMode::Regular, "same", id(1)),
            TreeEntry::new(FileMode::Directory, "same", id(2)),
        ]);
        assert!(matches!(result, Err(StorageError::InvalidArgument(_))));
    }

    #[test]
    fn test_decode_rejects_duplicate_names() {
        let id = ObjectId::from_bytes([7u8; 20]);
        let mut payload = Vec::new();
        for mode in ["120000", "40000"] {
            payload.extend_from_slice(format!("{mode} a\0").as_bytes());
            payload.extend_from_slice(id.as_bytes());
        }
        assert!(matches!(
            Tree::decode(&payload),
            Err(StorageError::MalformedTree(_))
        ));
    }

    #[test]
    fn test_decode_empty() {
        assert!(Tree::decode(b"").unwrap().is_empty());
    }

    #[test]
    fn test_decode_short_id() {
        let mut data = b"100644 file\0".to_vec();
        data.extend_from_slice(&[0u8; 19]);
        assert!(matches!(
            Tree::decode(&data),
            Err(StorageError::MalformedTree(_))
        ));
    }

    #[test]
    fn test_decode_non_digit_mode() {
        let mut data = b"10x644 file\0".to_vec();
        data.extend_from_slice(&[0u8; 20]);
        assert!(matches!(
            Tree::decode(&data),
            Err(StorageError::MalformedTree(_))
        ));
    }

    #[test]
    fn test_decode_missing_nul() {
        assert!(matches!(
            Tree::decode(b"100644 file-without-terminator"),
            Err(StorageError::MalformedTree(_))
        ));
    }

    #[test]
    fn test_decode_preserves_unknown_mode() {
        let mut data = b"100664 odd\0".to_vec();
        data.extend_from_slice(&[5u8; 20]);
        let tree = Tree::decode(&data).unwrap();
        assert_eq!(tree.entries()[0].mode, FileMode::Other(0o100664));
        assert_eq!(tree.encode(), data);
    }

    #[test]
    fn test_get() {
        let tree = Tree::new(vec![TreeEntry::new(FileMode::Regular, "hit", id(9))]).unwrap();
        assert_eq!(tree.get(b"hit").map(|e| e.id), Some(id(9)));
        assert!(tree.get(b"miss").is_none());
    }

    #[test]
    fn test_mode_display_and_kind() {
        assert_eq!(FileMode::Regular.to_string(), "100644");
        assert_eq!(FileMode::Executable.to_string(), "100755");
        assert_eq!(FileMode::Directory.to_string(), "40000");
        assert_eq!(FileMode::Directory.object_kind(), "tree");
        assert_eq!(FileMode::Gitlink.object_kind(), "commit");
        assert_eq!(FileMode::Regular.object_kind(), "blob");
    }
}
