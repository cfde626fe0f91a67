//! Git pack file format implementation.
//!
//! Pack files are the format used by git for efficient object transfer.
//! See: https://git-scm.com/docs/pack-format

use crate::delta::apply_delta;
use crate::{GitError, Result};
use sha1::{Digest, Sha1};
use std::collections::{HashMap, VecDeque};
use tokio_util::sync::CancellationToken;
use twig_storage::{
    compress, decompress_prefix, CompressionLevel, GitObject, ObjectId, ObjectStore, ObjectType,
};

/// Magic bytes at the start of a pack file.
const PACK_SIGNATURE: &[u8; 4] = b"PACK";
/// Pack file version we support.
const PACK_VERSION: u32 = 2;
/// Signature, version and object count.
const HEADER_LEN: usize = 12;
/// SHA-1 over everything before it.
const TRAILER_LEN: usize = 20;

const TYPE_OFS_DELTA: u8 = 6;
const TYPE_REF_DELTA: u8 = 7;

/// How an entry's content is represented in the pack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// A full object of the given type.
    Base(ObjectType),
    /// A delta against the entry starting at `base_offset`.
    OfsDelta {
        /// Absolute pack offset of the base entry.
        base_offset: usize,
    },
    /// A delta against the object with id `base`.
    RefDelta {
        /// Id of the base object.
        base: ObjectId,
    },
}

/// One undecoded record from a pack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackEntry {
    /// Byte offset of the entry header within the pack.
    pub offset: usize,
    /// Representation of the entry.
    pub kind: EntryKind,
    /// Inflated object content or delta instructions.
    pub data: Vec<u8>,
}

impl PackEntry {
    /// Returns true for `ofs_delta` and `ref_delta` entries.
    pub fn is_delta(&self) -> bool {
        !matches!(self.kind, EntryKind::Base(_))
    }
}

/// Options controlling pack decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeOptions {
    /// Compare the trailer with a checksum of the pack.
    pub verify_checksum: bool,
    /// Let `ref_delta` entries use bases already in the object store.
    pub allow_thin: bool,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            verify_checksum: true,
            allow_thin: true,
        }
    }
}

/// Outcome of a successful decode.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodedPack {
    /// Ids of every object in the pack, in pack order.
    pub ids: Vec<ObjectId>,
    /// Number of entries that were deltas.
    pub deltas: usize,
    /// Number of delta bases loaded from the object store.
    pub thin_bases: usize,
}

/// An object whose content is known and whose dependents can now resolve.
struct Resolved {
    index: Option<usize>,
    object_type: ObjectType,
    id: ObjectId,
    data: Vec<u8>,
}

/// Decodes a pack and writes its objects into an [`ObjectStore`].
pub struct PackDecoder<'a> {
    data: &'a [u8],
    options: DecodeOptions,
    cancel: Option<CancellationToken>,
}

impl<'a> PackDecoder<'a> {
    /// Creates a decoder over a complete pack.
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            options: DecodeOptions::default(),
            cancel: None,
        }
    }

    /// Replaces the decode options.
    pub fn options(mut self, options: DecodeOptions) -> Self {
        self.options = options;
        self
    }

    /// Aborts between objects once `token` is cancelled.
    pub fn cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    fn check_cancelled(&self) -> Result<()> {
        match &self.cancel {
            Some(token) if token.is_cancelled() => Err(GitError::Cancelled),
            _ => Ok(()),
        }
    }

    /// Validates the header and trailer, returning the declared object count.
    fn read_header(&self) -> Result<usize> {
        let data = self.data;
        if data.len() < HEADER_LEN + TRAILER_LEN {
            return Err(GitError::corrupt_pack(0, "pack too small"));
        }
        if &data[0..4] != PACK_SIGNATURE {
            return Err(GitError::corrupt_pack(0, "invalid signature"));
        }

        let version = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
        if version != PACK_VERSION {
            return Err(GitError::UnsupportedPackVersion(version));
        }

        let count = u32::from_be_bytes([data[8], data[9], data[10], data[11]]) as usize;

        if self.options.verify_checksum {
            let body_end = data.len() - TRAILER_LEN;
            let computed = Sha1::digest(&data[..body_end]);
            if computed.as_slice() != &data[body_end..] {
                return Err(GitError::ChecksumMismatch {
                    expected: hex::encode(&data[body_end..]),
                    computed: hex::encode(computed),
                });
            }
        }
        Ok(count)
    }

    /// Parses every entry without resolving deltas.
    pub fn entries(&self) -> Result<Vec<PackEntry>> {
        let count = self.read_header()?;
        let body_end = self.data.len() - TRAILER_LEN;

        let mut entries = Vec::with_capacity(count.min(body_end / 2));
        let mut pos = HEADER_LEN;
        for _ in 0..count {
            self.check_cancelled()?;
            let (entry, next) = self.parse_entry(pos, body_end)?;
            entries.push(entry);
            pos = next;
        }

        if pos != body_end {
            return Err(GitError::corrupt_pack(
                pos,
                format!("{} unexpected bytes before trailer", body_end - pos),
            ));
        }
        Ok(entries)
    }

    /// Parses the entry at `offset`, returning it and the next offset.
    fn parse_entry(&self, offset: usize, body_end: usize) -> Result<(PackEntry, usize)> {
        let body = &self.data[..body_end];
        let mut pos = offset;

        let first = *body
            .get(pos)
            .ok_or_else(|| GitError::corrupt_pack(offset, "unexpected end of pack"))?;
        pos += 1;

        let type_code = (first >> 4) & 0x07;
        let mut size = u64::from(first & 0x0f);
        let mut shift = 4u32;
        let mut byte = first;
        while byte & 0x80 != 0 {
            byte = *body
                .get(pos)
                .ok_or_else(|| GitError::corrupt_pack(offset, "unexpected end in size"))?;
            pos += 1;
            if shift > 57 {
                return Err(GitError::corrupt_pack(offset, "object size overflows"));
            }
            size |= u64::from(byte & 0x7f) << shift;
            shift += 7;
        }
        let size = usize::try_from(size)
            .map_err(|_| GitError::corrupt_pack(offset, "object size overflows"))?;

        let kind = match type_code {
            TYPE_OFS_DELTA => {
                let distance = read_offset_varint(body, &mut pos)
                    .ok_or_else(|| GitError::corrupt_pack(offset, "malformed base offset"))?;
                let base_offset = offset
                    .checked_sub(distance)
                    .filter(|base| distance > 0 && *base >= HEADER_LEN)
                    .ok_or_else(|| {
                        GitError::corrupt_pack(offset, format!("base offset -{distance} out of range"))
                    })?;
                EntryKind::OfsDelta { base_offset }
            }
            TYPE_REF_DELTA => {
                let raw = body
                    .get(pos..pos + ObjectId::LEN)
                    .ok_or_else(|| GitError::corrupt_pack(offset, "truncated base id"))?;
                pos += ObjectId::LEN;
                EntryKind::RefDelta {
                    base: ObjectId::from_slice(raw)?,
                }
            }
            code => EntryKind::Base(ObjectType::from_pack_type(code).ok_or_else(|| {
                GitError::corrupt_pack(offset, format!("invalid object type {code}"))
            })?),
        };

        let (data, consumed) = decompress_prefix(&body[pos..], size)
            .map_err(|e| GitError::corrupt_pack(offset, format!("decompression failed: {e}")))?;
        if data.len() != size {
            return Err(GitError::corrupt_pack(
                offset,
                format!("inflated {} bytes, header declared {size}", data.len()),
            ));
        }
        pos += consumed;

        Ok((PackEntry { offset, kind, data }, pos))
    }

    /// Decodes the pack, resolves every delta and stores all objects.
    pub fn decode(&self, store: &ObjectStore) -> Result<DecodedPack> {
        let entries = self.entries()?;

        let mut by_offset = HashMap::with_capacity(entries.len());
        let mut ofs_waiting: HashMap<usize, Vec<usize>> = HashMap::new();
        let mut ref_waiting: HashMap<ObjectId, Vec<usize>> = HashMap::new();
        let mut queue = VecDeque::new();
        let mut ids: Vec<Option<ObjectId>> = vec![None; entries.len()];
        let mut deltas = 0;

        for (index, entry) in entries.iter().enumerate() {
            by_offset.insert(entry.offset, index);
        }

        for (index, entry) in entries.iter().enumerate() {
            self.check_cancelled()?;
            match entry.kind {
                EntryKind::Base(object_type) => {
                    let id = store.write(object_type, &entry.data)?;
                    ids[index] = Some(id);
                    queue.push_back(Resolved {
                        index: Some(index),
                        object_type,
                        id,
                        data: entry.data.clone(),
                    });
                }
                EntryKind::OfsDelta { base_offset } => {
                    deltas += 1;
                    if !by_offset.contains_key(&base_offset) {
                        return Err(GitError::corrupt_pack(
                            entry.offset,
                            format!("no entry starts at base offset {base_offset}"),
                        ));
                    }
                    ofs_waiting.entry(base_offset).or_default().push(index);
                }
                EntryKind::RefDelta { base } => {
                    deltas += 1;
                    ref_waiting.entry(base).or_default().push(index);
                }
            }
        }

        let mut thin_bases = 0;
        loop {
            while let Some(resolved) = queue.pop_front() {
                self.check_cancelled()?;

                let mut dependents = ref_waiting.remove(&resolved.id).unwrap_or_default();
                if let Some(index) = resolved.index {
                    if let Some(waiting) = ofs_waiting.remove(&entries[index].offset) {
                        dependents.extend(waiting);
                    }
                }

                for dependent in dependents {
                    if ids[dependent].is_some() {
                        continue;
                    }
                    let entry = &entries[dependent];
                    let data = apply_delta(&resolved.data, &entry.data).map_err(|e| match e {
                        GitError::CorruptDelta(reason) => GitError::CorruptDelta(format!(
                            "entry at offset {}: {reason}",
                            entry.offset
                        )),
                        other => other,
                    })?;
                    let id = store.write(resolved.object_type, &data)?;
                    ids[dependent] = Some(id);
                    queue.push_back(Resolved {
                        index: Some(dependent),
                        object_type: resolved.object_type,
                        id,
                        data,
                    });
                }
            }

            if !self.options.allow_thin {
                break;
            }
            let external: Vec<ObjectId> = ref_waiting
                .keys()
                .filter(|id| store.exists(id))
                .copied()
                .collect();
            if external.is_empty() {
                break;
            }
            for id in external {
                let base = store.read(&id)?;
                tracing::debug!(base = %id, "using stored object as thin-pack base");
                thin_bases += 1;
                queue.push_back(Resolved {
                    index: None,
                    object_type: base.object_type,
                    id,
                    data: base.data.to_vec(),
                });
            }
        }

        let unresolved: Vec<usize> = ids
            .iter()
            .enumerate()
            .filter(|(_, id)| id.is_none())
            .map(|(index, _)| entries[index].offset)
            .collect();
        if let Some(&first_offset) = unresolved.first() {
            return Err(GitError::UnresolvedDelta {
                count: unresolved.len(),
                first_offset,
            });
        }

        let ids: Vec<ObjectId> = ids.into_iter().flatten().collect();
        tracing::info!(
            objects = ids.len(),
            deltas = deltas,
            thin_bases = thin_bases,
            "pack decoded"
        );
        Ok(DecodedPack {
            ids,
            deltas,
            thin_bases,
        })
    }
}

/// Reads the big-endian offset encoding used by `ofs_delta` entries.
///
/// Each continuation adds one before shifting, so every distance has
/// exactly one encoding.
fn read_offset_varint(data: &[u8], pos: &mut usize) -> Option<usize> {
    let mut byte = *data.get(*pos)?;
    *pos += 1;
    let mut value = usize::from(byte & 0x7f);
    while byte & 0x80 != 0 {
        byte = *data.get(*pos)?;
        *pos += 1;
        value = value
            .checked_add(1)?
            .checked_mul(128)?
            .checked_add(usize::from(byte & 0x7f))?;
    }
    Some(value)
}

fn write_offset_varint(mut value: usize, out: &mut Vec<u8>) {
    let mut bytes = vec![(value & 0x7f) as u8];
    value >>= 7;
    while value > 0 {
        value -= 1;
        bytes.push(((value & 0x7f) as u8) | 0x80);
        value >>= 7;
    }
    bytes.reverse();
    out.extend_from_slice(&bytes);
}

fn write_entry_header(pack: &mut Vec<u8>, type_code: u8, size: usize) {
    // First byte: (MSB=more bytes) (3 bits type) (4 bits size)
    let mut first_byte = (type_code << 4) | ((size & 0x0F) as u8);
    let mut remaining_size = size >> 4;

    if remaining_size > 0 {
        first_byte |= 0x80;
    }
    pack.push(first_byte);

    while remaining_size > 0 {
        let mut byte = (remaining_size & 0x7F) as u8;
        remaining_size >>= 7;
        if remaining_size > 0 {
            byte |= 0x80;
        }
        pack.push(byte);
    }
}

enum BuilderEntry {
    Object(GitObject),
    OfsDelta { base: usize, delta: Vec<u8> },
    RefDelta { base: ObjectId, delta: Vec<u8> },
}

/// Builds a pack file from objects and deltas.
pub struct PackBuilder {
    entries: Vec<BuilderEntry>,
    compression: CompressionLevel,
}

impl PackBuilder {
    /// Creates a new pack builder.
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            compression: CompressionLevel::default(),
        }
    }

    /// Sets the zlib level used for entry payloads.
    pub fn compression(mut self, level: CompressionLevel) -> Self {
        self.compression = level;
        self
    }

    /// Adds a full object and returns its entry index.
    pub fn add(&mut self, object: GitObject) -> usize {
        self.entries.push(BuilderEntry::Object(object));
        self.entries.len() - 1
    }

    /// Adds an object from the store by ID.
    pub fn add_from_store(&mut self, store: &ObjectStore, id: &ObjectId) -> Result<usize> {
        let object = store.read(id)?;
        Ok(self.add(object))
    }

    /// Adds an `ofs_delta` entry against the earlier entry `base`.
    pub fn add_ofs_delta(&mut self, base: usize, delta: Vec<u8>) -> Result<usize> {
        if base >= self.entries.len() {
            return Err(GitError::Protocol(format!(
                "ofs_delta base {base} must be an earlier entry"
            )));
        }
        self.entries.push(BuilderEntry::OfsDelta { base, delta });
        Ok(self.entries.len() - 1)
    }

    /// Adds a `ref_delta` entry against the object `base`.
    pub fn add_ref_delta(&mut self, base: ObjectId, delta: Vec<u8>) -> usize {
        self.entries.push(BuilderEntry::RefDelta { base, delta });
        self.entries.len() - 1
    }

    /// Number of entries added so far.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no entries were added.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Builds the pack file.
    pub fn build(self) -> Result<Vec<u8>> {
        let mut pack = Vec::new();
        let count = u32::try_from(self.entries.len())
            .map_err(|_| GitError::Protocol("too many pack entries".to_string()))?;

        pack.extend_from_slice(PACK_SIGNATURE);
        pack.extend_from_slice(&PACK_VERSION.to_be_bytes());
        pack.extend_from_slice(&count.to_be_bytes());

        let mut offsets = Vec::with_capacity(self.entries.len());
        for entry in &self.entries {
            let offset = pack.len();
            offsets.push(offset);
            let payload = match entry {
                BuilderEntry::Object(object) => {
                    write_entry_header(&mut pack, object.object_type.pack_type(), object.data.len());
                    &object.data[..]
                }
                BuilderEntry::OfsDelta { base, delta } => {
                    write_entry_header(&mut pack, TYPE_OFS_DELTA, delta.len());
                    write_offset_varint(offset - offsets[*base], &mut pack);
                    &delta[..]
                }
                BuilderEntry::RefDelta { base, delta } => {
                    write_entry_header(&mut pack, TYPE_REF_DELTA, delta.len());
                    pack.extend_from_slice(base.as_bytes());
                    &delta[..]
                }
            };
            pack.extend_from_slice(&compress(payload, self.compression)?);
        }

        let checksum = Sha1::digest(&pack);
        pack.extend_from_slice(&checksum);

        Ok(pack)
    }
}

impl Default for PackBuilder {
    fn default() -> Self {
        Self::new()
    }
}
