//! Git smart HTTP protocol, client side.
//!
//! Parses the ref advertisement, builds the upload-pack request and
//! unwraps the pack from the server's response.
//! See: https://git-scm.com/docs/http-protocol

use crate::pktline::{PktLine, PktLineReader, PktLineWriter};
use crate::{GitError, Result};
use std::io::Cursor;
use twig_storage::ObjectId;

/// Name the server uses to announce capabilities on an empty repository.
const EMPTY_REPO_MARKER: &str = "capabilities^{}";
/// Suffix of peeled tag entries.
const PEELED_SUFFIX: &str = "^{}";

/// A reference advertised by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ref {
    /// Reference name, e.g. `refs/heads/main` or `HEAD`.
    pub name: String,
    /// Object the reference points at.
    pub id: ObjectId,
}

impl Ref {
    /// Returns true for `^{}` entries giving the object an annotated tag
    /// points at.
    pub fn is_peeled(&self) -> bool {
        self.name.ends_with(PEELED_SUFFIX)
    }
}

/// A parsed ref advertisement.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefAdvertisement {
    /// References in the order the server sent them.
    pub refs: Vec<Ref>,
    /// Capabilities from the first ref line.
    pub capabilities: Vec<String>,
}

impl RefAdvertisement {
    /// Parses a pkt-line framed ref advertisement.
    ///
    /// `# service=` announcements are skipped, flush packets only separate
    /// sections, and the capability list after the NUL on the first ref
    /// line is split off.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut advertisement = Self::default();
        let mut seen_first = false;
        let mut sections = 0usize;

        for pkt in PktLineReader::new(Cursor::new(data)) {
            let payload = match pkt? {
                PktLine::Data(payload) => payload,
                PktLine::Flush => {
                    sections += 1;
                    continue;
                }
                PktLine::Delimiter | PktLine::ResponseEnd => continue,
            };

            let line = payload.strip_suffix(b"\n").unwrap_or(&payload);
            if line.starts_with(b"#") {
                continue;
            }

            let line = if seen_first {
                line
            } else {
                seen_first = true;
                match line.iter().position(|&b| b == 0) {
                    Some(nul) => {
                        let caps = String::from_utf8_lossy(&line[nul + 1..]);
                        advertisement.capabilities =
                            caps.split_whitespace().map(str::to_string).collect();
                        &line[..nul]
                    }
                    None => line,
                }
            };

            let reference = parse_ref_line(line)?;
            if reference.name != EMPTY_REPO_MARKER {
                advertisement.refs.push(reference);
            }
        }

        tracing::debug!(
            refs = advertisement.refs.len(),
            capabilities = advertisement.capabilities.len(),
            sections = sections,
            "parsed ref advertisement"
        );
        Ok(advertisement)
    }

    /// Returns true if the server advertised `capability` (with or without
    /// a value).
    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| {
            c == capability
                || c.strip_prefix(capability)
                    .is_some_and(|rest| rest.starts_with('='))
        })
    }

    /// Returns the id advertised for `name`.
    pub fn get(&self, name: &str) -> Option<ObjectId> {
        self.refs.iter().find(|r| r.name == name).map(|r| r.id)
    }

    /// Returns the branch HEAD points at, from the `symref` capability.
    pub fn head_symref(&self) -> Option<&str> {
        self.capabilities
            .iter()
            .filter_map(|c| c.strip_prefix("symref=HEAD:"))
            .next()
    }
}

fn parse_ref_line(line: &[u8]) -> Result<Ref> {
    let text = std::str::from_utf8(line)
        .map_err(|_| GitError::Protocol("ref line is not UTF-8".to_string()))?;
    let (hex, name) = text
        .split_once(' ')
        .ok_or_else(|| GitError::Protocol(format!("malformed ref line {text:?}")))?;
    if name.is_empty() || name.contains('\0') {
        return Err(GitError::Protocol(format!("malformed ref name in {text:?}")));
    }
    let id = ObjectId::from_hex(hex)
        .map_err(|_| GitError::Protocol(format!("invalid object id in ref line {text:?}")))?;
    Ok(Ref {
        name: name.to_string(),
        id,
    })
}

/// Parses a ref advertisement into its references, in order.
pub fn parse_ref_advertisement(data: &[u8]) -> Result<Vec<Ref>> {
    Ok(RefAdvertisement::parse(data)?.refs)
}

/// An upload-pack request: a single round of wants followed by `done`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadRequest {
    wants: Vec<ObjectId>,
    capabilities: Vec<String>,
}

impl UploadRequest {
    /// Creates an empty request.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a wanted object. Repeated ids are ignored.
    pub fn want(&mut self, id: ObjectId) -> &mut Self {
        if !self.wants.contains(&id) {
            self.wants.push(id);
        }
        self
    }

    /// Requests a capability on the first want line.
    pub fn capability(&mut self, capability: impl Into<String>) -> &mut Self {
        self.capabilities.push(capability.into());
        self
    }

    /// The wanted ids in request order.
    pub fn wants(&self) -> &[ObjectId] {
        &self.wants
    }

    /// Encodes the request body.
    pub fn encode(&self) -> Result<Vec<u8>> {
        if self.wants.is_empty() {
            return Err(GitError::Protocol("upload request has no wants".to_string()));
        }

        let mut buf = Vec::new();
        let mut writer = PktLineWriter::new(&mut buf);
        for (i, id) in self.wants.iter().enumerate() {
            if i == 0 && !self.capabilities.is_empty() {
                writer.write_line(&format!("want {} {}", id, self.capabilities.join(" ")))?;
            } else {
                writer.write_line(&format!("want {id}"))?;
            }
        }
        writer.flush_pkt()?;
        writer.write_line("done")?;
        Ok(buf)
    }
}

/// Extracts the raw pack from an upload-pack response.
///
/// Leading `NAK`/`ACK` lines are skipped. The pack is either sent raw or
/// multiplexed over side-band channels: 1 carries pack data, 2 progress
/// text and 3 a fatal error.
pub fn extract_pack(response: &[u8]) -> Result<Vec<u8>> {
    let mut reader = PktLineReader::new(Cursor::new(response));
    let mut pack = Vec::new();

    loop {
        let pos = reader.inner_mut().position() as usize;
        let rest = response.get(pos..).unwrap_or_default();
        if pack.is_empty() && rest.starts_with(b"PACK") {
            return Ok(rest.to_vec());
        }

        let data = match reader.read()? {
            None => break,
            Some(PktLine::Data(data)) => data,
            Some(PktLine::Flush) if !pack.is_empty() => break,
            Some(_) => continue,
        };

        if data.starts_with(b"NAK") || data.starts_with(b"ACK ") {
            continue;
        }
        if let Some(message) = data.strip_prefix(b"ERR ") {
            return Err(GitError::Protocol(format!(
                "remote error: {}",
                String::from_utf8_lossy(message).trim_end()
            )));
        }

        match data.split_first() {
            Some((1, chunk)) => pack.extend_from_slice(chunk),
            Some((2, progress)) => {
                tracing::debug!(
                    progress = %String::from_utf8_lossy(progress).trim_end(),
                    "remote"
                );
            }
            Some((3, message)) => {
                return Err(GitError::Protocol(format!(
                    "remote error: {}",
                    String::from_utf8_lossy(message).trim_end()
                )));
            }
            _ => {
                return Err(GitError::Protocol(format!(
                    "unexpected line in upload-pack response: {:?}",
                    String::from_utf8_lossy(&data)
                )));
            }
        }
    }

    if pack.is_empty() {
        return Err(GitError::Protocol(
            "upload-pack response contained no pack".to_string(),
        ));
    }
    Ok(pack)
}
