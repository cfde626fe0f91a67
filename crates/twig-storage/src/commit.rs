//! Commit objects: the line-oriented text body.

use crate::{GitObject, ObjectId, ObjectType, Result, StorageError};
use chrono::{Local, Offset};
use std::fmt;

/// Who made a change and when.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    /// Display name.
    pub name: String,
    /// Email address, without angle brackets.
    pub email: String,
    /// Seconds since the Unix epoch.
    pub time: i64,
    /// Timezone offset from UTC in minutes.
    pub offset_minutes: i32,
}

impl Signature {
    /// Creates a signature, rejecting characters that would break the
    /// header line.
    pub fn new(
        name: impl Into<String>,
        email: impl Into<String>,
        time: i64,
        offset_minutes: i32,
    ) -> Result<Self> {
        let name = name.into();
        let email = email.into();
        for (field, value) in [("name", &name), ("email", &email)] {
            if value.contains(['<', '>', '\n', '\0']) {
                return Err(StorageError::InvalidArgument(format!(
                    "signature {field} contains a reserved character: {value:?}"
                )));
            }
        }
        if offset_minutes.abs() >= 100 * 60 {
            return Err(StorageError::InvalidArgument(format!(
                "timezone offset out of range: {offset_minutes}"
            )));
        }
        Ok(Self {
            name: name.trim().to_string(),
            email: email.trim().to_string(),
            time,
            offset_minutes,
        })
    }

    /// Signature stamped with the current local time.
    pub fn now(name: impl Into<String>, email: impl Into<String>) -> Result<Self> {
        let now = Local::now();
        let offset_minutes = now.offset().fix().local_minus_utc() / 60;
        Self::new(name, email, now.timestamp(), offset_minutes)
    }

    /// Parses `Name <email> 1700000000 +0100`.
    pub fn parse(line: &str) -> Result<Self> {
        let bad = || StorageError::InvalidArgument(format!("malformed signature: {line:?}"));

        let open = line.find('<').ok_or_else(bad)?;
        let close = line[open..].find('>').map(|i| open + i).ok_or_else(bad)?;
        let name = line[..open].trim_end();
        let email = &line[open + 1..close];

        let mut rest = line[close + 1..].split_whitespace();
        let time: i64 = rest.next().and_then(|t| t.parse().ok()).ok_or_else(bad)?;
        let tz = rest.next().ok_or_else(bad)?;
        if tz.len() != 5 || !tz.is_ascii() || !tz[1..].bytes().all(|b| b.is_ascii_digit()) {
            return Err(bad());
        }
        let sign = match &tz[..1] {
            "+" => 1,
            "-" => -1,
            _ => return Err(bad()),
        };
        let hours: i32 = tz[1..3].parse().map_err(|_| bad())?;
        let minutes: i32 = tz[3..5].parse().map_err(|_| bad())?;

        Ok(Self {
            name: name.to_string(),
            email: email.to_string(),
            time,
            offset_minutes: sign * (hours * 60 + minutes),
        })
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.offset_minutes < 0 { '-' } else { '+' };
        let abs = self.offset_minutes.abs();
        write!(
            f,
            "{} <{}> {} {}{:02}{:02}",
            self.name,
            self.email,
            self.time,
            sign,
            abs / 60,
            abs % 60
        )
    }
}

/// Builds a commit body from hex identifiers.
///
/// Every identifier is validated before anything is produced, so a bad
/// argument can never lead to a stored object.
pub fn build_commit_body(
    tree: &str,
    parents: &[&str],
    author: &Signature,
    committer: &Signature,
    message: &str,
) -> Result<Vec<u8>> {
    let tree = ObjectId::from_hex(tree)?;
    let parents = parents
        .iter()
        .map(|p| ObjectId::from_hex(p))
        .collect::<Result<Vec<_>>>()?;

    let commit = Commit {
        tree,
        parents,
        author: author.clone(),
        committer: committer.clone(),
        message: message.to_string(),
    };
    Ok(commit.encode())
}

/// A parsed commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    /// Root tree of the snapshot.
    pub tree: ObjectId,
    /// Parent commits, in order.
    pub parents: Vec<ObjectId>,
    /// Author line.
    pub author: Signature,
    /// Committer line.
    pub committer: Signature,
    /// Message, verbatim.
    pub message: String,
}

impl Commit {
    /// Serializes the commit payload.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = format!("tree {}\n", self.tree);
        for parent in &self.parents {
            out.push_str(&format!("parent {parent}\n"));
        }
        out.push_str(&format!("author {}\n", self.author));
        out.push_str(&format!("committer {}\n", self.committer));
        out.push('\n');
        out.push_str(&self.message);
        out.into_bytes()
    }

    /// Returns the commit as an object ready to be stored.
    pub fn to_object(&self) -> GitObject {
        GitObject::new(ObjectType::Commit, self.encode())
    }

    /// Parses a stored commit object.
    pub fn from_object(object: &GitObject) -> Result<Self> {
        let corrupt = |reason: String| StorageError::CorruptObject {
            id: object.id.to_hex(),
            reason,
        };
        if object.object_type != ObjectType::Commit {
            return Err(StorageError::InvalidArgument(format!(
                "object {} is a {}, not a commit",
                object.id, object.object_type
            )));
        }
        let text = std::str::from_utf8(&object.data)
            .map_err(|_| corrupt("commit is not UTF-8".to_string()))?;
        Self::parse(text).map_err(|e| corrupt(e.to_string()))
    }

    /// Reads only the `tree` header of a stored commit.
    ///
    /// Unlike [`Commit::from_object`] this ignores author and committer
    /// lines, so commits with signatures twig cannot parse still peel.
    pub fn tree_of(object: &GitObject) -> Result<ObjectId> {
        let corrupt = |reason: &str| StorageError::CorruptObject {
            id: object.id.to_hex(),
            reason: reason.to_string(),
        };
        let first = object
            .data
            .split(|&b| b == b'\n')
            .next()
            .unwrap_or_default();
        let hex = first
            .strip_prefix(b"tree ")
            .ok_or_else(|| corrupt("commit does not start with a tree header"))?;
        let hex = std::str::from_utf8(hex).map_err(|_| corrupt("tree id is not hex"))?;
        ObjectId::from_hex(hex).map_err(|_| corrupt("tree id is not hex"))
    }

    /// Parses a commit body.
    pub fn parse(text: &str) -> Result<Self> {
        let (headers, message) = text.split_once("\n\n").unwrap_or((text, ""));

        let mut tree = None;
        let mut parents = Vec::new();
        let mut author = None;
        let mut committer = None;

        for line in headers.lines() {
            // Continuation lines of multi-line headers such as gpgsig.
            if line.starts_with(' ') {
                continue;
            }
            let (key, value) = line.split_once(' ').unwrap_or((line, ""));
            match key {
                "tree" => tree = Some(ObjectId::from_hex(value)?),
                "parent" => parents.push(ObjectId::from_hex(value)?),
                "author" => author = Some(Signature::parse(value)?),
                "committer" => committer = Some(Signature::parse(value)?),
                _ => {}
            }
        }

        let missing = |field: &str| StorageError::InvalidArgument(format!("commit has no {field}"));
        Ok(Self {
            tree: tree.ok_or_else(|| missing("tree"))?,
            parents,
            author: author.ok_or_else(|| missing("author"))?,
            committer: committer.ok_or_else(|| missing("committer"))?,
            message: message.to_string(),
        })
    }
}
