//! Object identifiers, object types and the canonical framing rule.

use crate::{Result, StorageError};
use bytes::Bytes;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha1::{Digest, Sha1};
use std::fmt;
use std::str::FromStr;

/// A 20-byte SHA-1 object identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId([u8; 20]);

impl Serialize for ObjectId {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ObjectId {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        ObjectId::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

impl ObjectId {
    /// Length of the raw digest in bytes.
    pub const LEN: usize = 20;
    /// Length of the canonical hex rendering.
    pub const HEX_LEN: usize = 40;

    /// Creates an ObjectId from raw bytes.
    pub fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// Creates an ObjectId from a slice that must be exactly 20 bytes long.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let raw: [u8; 20] = bytes.try_into().map_err(|_| {
            StorageError::InvalidArgument(format!("object id must be 20 bytes, got {}", bytes.len()))
        })?;
        Ok(Self(raw))
    }

    /// Parses the canonical form: exactly 40 lowercase hex characters.
    pub fn from_hex(hex: &str) -> Result<Self> {
        if hex.len() != Self::HEX_LEN {
            return Err(StorageError::InvalidArgument(format!(
                "invalid object id length: {}",
                hex.len()
            )));
        }
        if !hex.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
            return Err(StorageError::InvalidArgument(format!(
                "object id is not lowercase hex: {hex}"
            )));
        }
        let mut bytes = [0u8; 20];
        hex::decode_to_slice(hex, &mut bytes)
            .map_err(|e| StorageError::InvalidArgument(e.to_string()))?;
        Ok(Self(bytes))
    }

    /// Returns the raw bytes.
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Returns the hex representation.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Hashes an already framed object.
    pub fn digest(framed: &[u8]) -> Self {
        let result = Sha1::digest(framed);
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(&result);
        Self(bytes)
    }

    /// Computes the id of `data` framed as an object of `object_type`,
    /// without materializing the framed buffer.
    pub fn hash_object(object_type: ObjectType, data: &[u8]) -> Self {
        let mut hasher = Sha1::new();
        hasher.update(header(object_type, data.len()));
        hasher.update(data);
        let result = hasher.finalize();
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(&result);
        Self(bytes)
    }
}

impl FromStr for ObjectId {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_hex(s)
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self.to_hex())
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Git object types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectType {
    /// File content.
    Blob,
    /// Directory listing.
    Tree,
    /// Commit object.
    Commit,
    /// Annotated tag.
    Tag,
}

impl ObjectType {
    /// Returns the string representation used in git.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Blob => "blob",
            Self::Tree => "tree",
            Self::Commit => "commit",
            Self::Tag => "tag",
        }
    }

    /// Parses an object type from its header name.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "blob" => Some(Self::Blob),
            "tree" => Some(Self::Tree),
            "commit" => Some(Self::Commit),
            "tag" => Some(Self::Tag),
            _ => None,
        }
    }

    /// Returns the type code used in pack files.
    pub fn pack_type(&self) -> u8 {
        match self {
            Self::Commit => 1,
            Self::Tree => 2,
            Self::Blob => 3,
            Self::Tag => 4,
        }
    }

    /// Parses an object type from a pack file type code.
    pub fn from_pack_type(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::Commit),
            2 => Some(Self::Tree),
            3 => Some(Self::Blob),
            4 => Some(Self::Tag),
            _ => None,
        }
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn header(object_type: ObjectType, len: usize) -> Vec<u8> {
    format!("{} {}\0", object_type.as_str(), len).into_bytes()
}

/// Frames a payload: `<type> <decimal len>\0<payload>`.
pub fn frame(object_type: ObjectType, payload: &[u8]) -> Vec<u8> {
    let mut framed = header(object_type, payload.len());
    framed.extend_from_slice(payload);
    framed
}

/// Splits a framed object back into its type and payload.
///
/// The error string describes the framing defect; callers attach the id.
pub fn unframe(framed: &[u8]) -> std::result::Result<(ObjectType, &[u8]), String> {
    let nul = framed
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| "missing NUL after header".to_string())?;
    let header = std::str::from_utf8(&framed[..nul]).map_err(|_| "header is not ASCII".to_string())?;
    let (kind, len) = header
        .split_once(' ')
        .ok_or_else(|| format!("invalid header: {header:?}"))?;
    let object_type = ObjectType::parse(kind).ok_or_else(|| format!("unknown object type: {kind}"))?;
    if len.is_empty() || !len.bytes().all(|b| b.is_ascii_digit()) {
        return Err(format!("non-numeric length: {len:?}"));
    }
    let len: usize = len.parse().map_err(|_| format!("length out of range: {len}"))?;
    let payload = &framed[nul + 1..];
    if payload.len() != len {
        return Err(format!(
            "length mismatch: header says {len}, payload has {}",
            payload.len()
        ));
    }
    Ok((object_type, payload))
}

/// A git object (blob, tree, commit, or tag).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitObject {
    /// The object's identifier, always derived from type and data.
    pub id: ObjectId,
    /// The type of object.
    pub object_type: ObjectType,
    /// The raw object data (uncompressed, unframed).
    pub data: Bytes,
}

impl GitObject {
    /// Creates a new git object, computing its ID from the data.
    pub fn new(object_type: ObjectType, data: impl Into<Bytes>) -> Self {
        let data = data.into();
        let id = ObjectId::hash_object(object_type, &data);
        Self {
            id,
            object_type,
            data,
        }
    }

    /// Creates a blob object from file content.
    pub fn blob(content: impl Into<Bytes>) -> Self {
        Self::new(ObjectType::Blob, content)
    }

    /// Returns the canonical framed bytes of this object.
    pub fn framed(&self) -> Vec<u8> {
        frame(self.object_type, &self.data)
    }

    /// Returns the size of the object data.
    pub fn size(&self) -> usize {
        self.data.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_id_hex_roundtrip() {
        let hex = "a94a8fe5ccb19ba61c4c0873d391e987982fbbd3";
        let id = ObjectId::from_hex(hex).unwrap();
        assert_eq!(id.to_hex(), hex);
        assert_eq!(hex.parse::<ObjectId>().unwrap(), id);
    }

    #[test]
    fn test_blob_hash() {
        // Matches `git hash-object` for "hello\n".
        let obj = GitObject::blob(b"hello\n".to_vec());
        assert_eq!(obj.id.to_hex(), "ce013625030ba8dba906f756967f9e9ca394464a");
    }

    #[test]
    fn test_empty_blob_hash() {
        let obj = GitObject::blob(Vec::new());
        assert_eq!(obj.id.to_hex(), "e69de29bb2d1d6434b8b29ae775ad8c2e48c5391");
    }

    #[test]
    fn test_frame_layout() {
        assert_eq!(frame(ObjectType::Blob, b"test"), b"blob 4\0test");
        assert_eq!(frame(ObjectType::Tree, b""), b"tree 0\0");
    }

    #[test]
    fn test_digest_matches_hash_object() {
        for kind in [ObjectType::Blob, ObjectType::Tree, ObjectType::Commit, ObjectType::Tag] {
            let payload = b"some payload bytes";
            let framed = frame(kind, payload);
            assert_eq!(ObjectId::digest(&framed), ObjectId::hash_object(kind, payload));
            assert_eq!(ObjectId::digest(&framed), ObjectId::digest(&framed));
        }
    }

    #[test]
    fn test_unframe() {
        let framed = frame(ObjectType::Commit, b"tree abc\n");
        let (kind, payload) = unframe(&framed).unwrap();
        assert_eq!(kind, ObjectType::Commit);
        assert_eq!(payload, b"tree abc\n");
    }

    #[test]
    fn test_unframe_rejects_bad_headers() {
        assert!(unframe(b"blob 4test").unwrap_err().contains("NUL"));
        assert!(unframe(b"blob x\0test").unwrap_err().contains("non-numeric"));
        assert!(unframe(b"blob 5\0test").unwrap_err().contains("mismatch"));
        assert!(unframe(b"blurb 4\0test").unwrap_err().contains("unknown"));
        assert!(unframe(b"blob\0").is_err());
    }

    #[test]
    fn test_object_id_invalid_hex() {
        assert!(ObjectId::from_hex("abc").is_err());
        assert!(ObjectId::from_hex("a94a8fe5ccb19ba61c4c0873d391e987982fbbd3ff").is_err());
        assert!(ObjectId::from_hex("zzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzz").is_err());
        // Uppercase is not canonical.
        assert!(ObjectId::from_hex("A94A8FE5CCB19BA61C4C0873D391E987982FBBD3").is_err());
    }

    #[test]
    fn test_object_id_from_slice() {
        assert!(ObjectId::from_slice(&[1u8; 20]).is_ok());
        assert!(ObjectId::from_slice(&[1u8; 19]).is_err());
    }

    #[test]
    fn test_object_type_codes() {
        for ot in [ObjectType::Commit, ObjectType::Tree, ObjectType::Blob, ObjectType::Tag] {
            assert_eq!(ObjectType::from_pack_type(ot.pack_type()), Some(ot));
            assert_eq!(ObjectType::parse(ot.as_str()), Some(ot));
        }
        assert!(ObjectType::from_pack_type(0).is_none());
        assert!(ObjectType::from_pack_type(5).is_none());
        assert!(ObjectType::parse("invalid").is_none());
    }

    #[test]
    fn test_object_id_display_and_debug() {
        let id = ObjectId::from_bytes([0u8; 20]);
        assert_eq!(format!("{}", id), "0".repeat(40));
        assert!(format!("{:?}", id).starts_with("ObjectId("));
    }

    #[test]
    fn test_object_id_serialization() {
        let id = ObjectId::from_bytes([0xab; 20]);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", "ab".repeat(20)));
        let parsed: ObjectId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, parsed);
    }
}
