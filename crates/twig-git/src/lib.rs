//! Git protocol support for twig.
//!
//! This crate implements the client side of a clone: pkt-line framing,
//! ref discovery, upload-pack requests, and a pack decoder that resolves
//! deltas and writes every object into a twig object store.

mod clone;
mod delta;
mod error;
mod pack;
mod pktline;
mod protocol;

pub use clone::{clone_repository, CloneOptions, CloneOutcome, Transport, DEFAULT_AGENT};
pub use delta::{
    apply_delta, encode_delta, read_varint, write_varint, Delta, DeltaInstruction,
};
pub use error::GitError;
pub use pack::{DecodeOptions, DecodedPack, EntryKind, PackBuilder, PackDecoder, PackEntry};
pub use pktline::{PktLine, PktLineReader, PktLineWriter, MAX_PKT_PAYLOAD};
pub use protocol::{
    extract_pack, parse_ref_advertisement, Ref, RefAdvertisement, UploadRequest,
};

/// Result type for git protocol operations.
pub type Result<T> = std::result::Result<T, GitError>;
