//! Git delta instruction streams.
//!
//! A delta starts with the base and target lengths as little-endian
//! base-128 varints, followed by copy and insert opcodes.
//! See: https://git-scm.com/docs/pack-format#_deltified_representation

use crate::{GitError, Result};

/// Copy length used when an opcode carries no length bytes.
const DEFAULT_COPY_LEN: usize = 0x10000;
/// Largest length a single copy opcode can express.
const MAX_COPY_LEN: usize = 0x00ff_ffff;
/// Largest literal run a single insert opcode can carry.
const MAX_INSERT_LEN: usize = 0x7f;
/// Upper bound on the output buffer reserved up front.
const MAX_PREALLOC: usize = 1 << 24;

/// One delta opcode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeltaInstruction {
    /// Copy `length` bytes starting at `offset` in the base.
    Copy {
        /// Offset into the base object.
        offset: usize,
        /// Number of bytes to copy.
        length: usize,
    },
    /// Append literal bytes.
    Insert(Vec<u8>),
}

impl DeltaInstruction {
    /// Number of output bytes this instruction produces.
    pub fn output_len(&self) -> usize {
        match self {
            Self::Copy { length, .. } => *length,
            Self::Insert(bytes) => bytes.len(),
        }
    }

    /// Appends the binary form of this instruction to `out`.
    ///
    /// Copies longer than one opcode can express and inserts longer than
    /// 127 bytes are split across several opcodes.
    pub fn encode(&self, out: &mut Vec<u8>) -> Result<()> {
        match self {
            Self::Copy { offset, length } => {
                let mut offset = *offset;
                let mut remaining = *length;
                if remaining == 0 {
                    return Err(GitError::CorruptDelta("empty copy".to_string()));
                }
                while remaining > 0 {
                    let chunk = remaining.min(MAX_COPY_LEN);
                    encode_copy(offset, chunk, out)?;
                    offset += chunk;
                    remaining -= chunk;
                }
            }
            Self::Insert(bytes) => {
                for chunk in bytes.chunks(MAX_INSERT_LEN) {
                    out.push(chunk.len() as u8);
                    out.extend_from_slice(chunk);
                }
            }
        }
        Ok(())
    }
}

fn encode_copy(offset: usize, length: usize, out: &mut Vec<u8>) -> Result<()> {
    let offset = u32::try_from(offset)
        .map_err(|_| GitError::CorruptDelta(format!("copy offset {offset} exceeds 32 bits")))?;

    let opcode_at = out.len();
    let mut opcode = 0x80u8;
    out.push(0);

    for (i, byte) in offset.to_le_bytes().iter().enumerate() {
        if *byte != 0 {
            opcode |= 1 << i;
            out.push(*byte);
        }
    }
    if length != DEFAULT_COPY_LEN {
        for (i, byte) in (length as u32).to_le_bytes()[..3].iter().enumerate() {
            if *byte != 0 {
                opcode |= 0x10 << i;
                out.push(*byte);
            }
        }
    }
    out[opcode_at] = opcode;
    Ok(())
}

/// Reads a little-endian base-128 varint at `*pos`.
pub fn read_varint(data: &[u8], pos: &mut usize) -> Result<usize> {
    let mut value: u64 = 0;
    let mut shift = 0u32;
    loop {
        let byte = *data
            .get(*pos)
            .ok_or_else(|| GitError::CorruptDelta("truncated length header".to_string()))?;
        *pos += 1;
        if shift > 63 {
            return Err(GitError::CorruptDelta("length header overflows".to_string()));
        }
        value |= u64::from(byte & 0x7f) << shift;
        shift += 7;
        if byte & 0x80 == 0 {
            break;
        }
    }
    usize::try_from(value)
        .map_err(|_| GitError::CorruptDelta(format!("length {value} does not fit in memory")))
}

/// Appends `value` as a little-endian base-128 varint.
pub fn write_varint(mut value: usize, out: &mut Vec<u8>) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            break;
        }
        out.push(byte | 0x80);
    }
}

/// A parsed delta: header lengths plus the instruction list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delta {
    /// Length the base object must have.
    pub base_len: usize,
    /// Length of the reconstructed object.
    pub target_len: usize,
    /// Opcodes in order.
    pub instructions: Vec<DeltaInstruction>,
}

impl Delta {
    /// Parses a binary delta.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut pos = 0;
        let base_len = read_varint(data, &mut pos)?;
        let target_len = read_varint(data, &mut pos)?;
        let mut instructions = Vec::new();

        while pos < data.len() {
            let opcode = data[pos];
            pos += 1;

            if opcode & 0x80 != 0 {
                let mut offset = 0usize;
                for i in 0..4 {
                    if opcode & (1 << i) != 0 {
                        offset |= usize::from(take(data, &mut pos)?) << (8 * i);
                    }
                }
                let mut length = 0usize;
                for i in 0..3 {
                    if opcode & (0x10 << i) != 0 {
                        length |= usize::from(take(data, &mut pos)?) << (8 * i);
                    }
                }
                if length == 0 {
                    length = DEFAULT_COPY_LEN;
                }
                instructions.push(DeltaInstruction::Copy { offset, length });
            } else if opcode == 0 {
                return Err(GitError::CorruptDelta(format!(
                    "reserved opcode 0 at byte {}",
                    pos - 1
                )));
            } else {
                let len = usize::from(opcode);
                let literal = data.get(pos..pos + len).ok_or_else(|| {
                    GitError::CorruptDelta(format!("insert of {len} bytes runs past the end"))
                })?;
                instructions.push(DeltaInstruction::Insert(literal.to_vec()));
                pos += len;
            }
        }

        Ok(Self {
            base_len,
            target_len,
            instructions,
        })
    }

    /// Encodes this delta to its binary form.
    pub fn encode(&self) -> Result<Vec<u8>> {
        encode_delta(self.base_len, self.target_len, &self.instructions)
    }

    /// Rebuilds the target object from `base`.
    pub fn apply(&self, base: &[u8]) -> Result<Vec<u8>> {
        if base.len() != self.base_len {
            return Err(GitError::CorruptDelta(format!(
                "base is {} bytes, delta expects {}",
                base.len(),
                self.base_len
            )));
        }

        // The declared length is untrusted until the output actually reaches it.
        let mut out = Vec::with_capacity(self.target_len.min(MAX_PREALLOC));
        for instruction in &self.instructions {
            if out.len() + instruction.output_len() > self.target_len {
                return Err(GitError::CorruptDelta(format!(
                    "output exceeds declared target length {}",
                    self.target_len
                )));
            }
            match instruction {
                DeltaInstruction::Copy { offset, length } => {
                    let range = offset
                        .checked_add(*length)
                        .filter(|end| *end <= base.len())
                        .map(|end| *offset..end)
                        .ok_or_else(|| {
                            GitError::CorruptDelta(format!(
                                "copy {offset}+{length} outside base of {} bytes",
                                base.len()
                            ))
                        })?;
                    out.extend_from_slice(&base[range]);
                }
                DeltaInstruction::Insert(bytes) => out.extend_from_slice(bytes),
            }
        }

        if out.len() != self.target_len {
            return Err(GitError::CorruptDelta(format!(
                "produced {} bytes, declared target length {}",
                out.len(),
                self.target_len
            )));
        }
        Ok(out)
    }
}

fn take(data: &[u8], pos: &mut usize) -> Result<u8> {
    let byte = *data
        .get(*pos)
        .ok_or_else(|| GitError::CorruptDelta("copy opcode truncated".to_string()))?;
    *pos += 1;
    Ok(byte)
}

/// Applies the binary delta `delta` to `base`.
pub fn apply_delta(base: &[u8], delta: &[u8]) -> Result<Vec<u8>> {
    Delta::parse(delta)?.apply(base)
}

/// Encodes a delta header and instruction stream.
pub fn encode_delta(
    base_len: usize,
    target_len: usize,
    instructions: &[DeltaInstruction],
) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    write_varint(base_len, &mut out);
    write_varint(target_len, &mut out);
    for instruction in instructions {
        instruction.encode(&mut out)?;
    }
    Ok(out)
}
