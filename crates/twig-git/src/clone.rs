//! Clone orchestration over a pluggable transport.

use crate::pack::{DecodeOptions, PackDecoder};
use crate::protocol::{extract_pack, RefAdvertisement, UploadRequest};
use crate::{GitError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::path::Path;
use tokio_util::sync::CancellationToken;
use twig_storage::{
    Checkout, CheckoutStats, ObjectId, Repository, StoreConfig, DEFAULT_BRANCH,
};

/// Agent string sent to servers that advertise the `agent` capability.
pub const DEFAULT_AGENT: &str = concat!("twig/", env!("CARGO_PKG_VERSION"));

/// Moves protocol bytes between the client and a remote.
///
/// Implementations own the network; the clone logic only sees bytes.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Fetches the ref advertisement for `url`.
    async fn discover_refs(&self, url: &str) -> Result<Bytes>;

    /// Sends an upload-pack request and returns the raw response.
    async fn upload_pack(&self, url: &str, request: Vec<u8>) -> Result<Bytes>;
}

/// Options for [`clone_repository`].
#[derive(Debug, Clone)]
pub struct CloneOptions {
    /// Layout and compression of the new repository.
    pub store: StoreConfig,
    /// Pack decoding options.
    pub decode: DecodeOptions,
    /// Agent string to announce.
    pub agent: String,
    /// Skip checking out HEAD.
    pub bare: bool,
    /// Aborts decoding and checkout between objects.
    pub cancel: Option<CancellationToken>,
}

impl Default for CloneOptions {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            decode: DecodeOptions::default(),
            agent: DEFAULT_AGENT.to_string(),
            bare: false,
            cancel: None,
        }
    }
}

/// What a clone produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CloneOutcome {
    /// Branch HEAD was pointed at, if any.
    pub head: Option<String>,
    /// Commit HEAD resolves to, if the remote was not empty.
    pub head_id: Option<ObjectId>,
    /// Number of refs written.
    pub refs: usize,
    /// Number of objects received.
    pub objects: usize,
    /// Working tree statistics, if a checkout happened.
    pub checkout: Option<CheckoutStats>,
}

/// Clones `url` into `dest`.
///
/// Creates the repository, fetches every advertised object in one
/// request, stores branch and tag refs, points HEAD at the remote's
/// default branch and checks it out.
pub async fn clone_repository<T>(
    transport: &T,
    url: &str,
    dest: &Path,
    options: &CloneOptions,
) -> Result<CloneOutcome>
where
    T: Transport + ?Sized,
{
    let repo = Repository::init(dest, options.store.clone())?;
    let advertisement = RefAdvertisement::parse(&transport.discover_refs(url).await?)?;
    tracing::info!(url = %url, refs = advertisement.refs.len(), "discovered refs");

    let mut outcome = CloneOutcome::default();
    if advertisement.refs.is_empty() {
        tracing::warn!(url = %url, "remote repository is empty");
        return Ok(outcome);
    }

    let request = build_request(&advertisement, &options.agent);
    let response = transport.upload_pack(url, request.encode()?).await?;
    let pack = extract_pack(&response)?;

    let mut decoder = PackDecoder::new(&pack).options(options.decode);
    if let Some(token) = &options.cancel {
        decoder = decoder.cancel_token(token.clone());
    }
    let decoded = decoder.decode(repo.objects())?;
    outcome.objects = decoded.ids.len();

    for reference in &advertisement.refs {
        let wanted = reference.name.starts_with("refs/heads/")
            || reference.name.starts_with("refs/tags/");
        if !wanted || reference.is_peeled() {
            continue;
        }
        repo.refs().write(&reference.name, &reference.id)?;
        outcome.refs += 1;
    }

    let Some(head_id) = advertisement.get("HEAD") else {
        tracing::warn!(url = %url, "remote did not advertise HEAD, skipping checkout");
        return Ok(outcome);
    };
    outcome.head_id = Some(head_id);

    match default_branch(&advertisement, &head_id) {
        Some(branch) => {
            repo.refs().write_symbolic("HEAD", &branch)?;
            outcome.head = Some(branch);
        }
        None => repo.refs().write("HEAD", &head_id)?,
    }

    if !options.bare {
        let tree = repo.peel_to_tree(&head_id)?;
        let mut checkout = Checkout::new(repo.objects());
        if let Some(token) = &options.cancel {
            checkout = checkout.cancel_token(token.clone());
        }
        outcome.checkout = Some(repo.checkout_with(checkout, &tree).map_err(|e| match e {
            twig_storage::StorageError::Cancelled => GitError::Cancelled,
            other => other.into(),
        })?);
    }

    tracing::info!(
        url = %url,
        dest = %dest.display(),
        objects = outcome.objects,
        refs = outcome.refs,
        head = outcome.head.as_deref().unwrap_or("(detached)"),
        "clone complete"
    );
    Ok(outcome)
}

fn build_request(advertisement: &RefAdvertisement, agent: &str) -> UploadRequest {
    let mut request = UploadRequest::new();
    for reference in &advertisement.refs {
        if !reference.is_peeled() {
            request.want(reference.id);
        }
    }
    for capability in ["ofs-delta", "side-band-64k"] {
        if advertisement.has_capability(capability) {
            request.capability(capability);
        }
    }
    if advertisement.has_capability("agent") {
        request.capability(format!("agent={agent}"));
    }
    request
}

/// Picks the branch HEAD should follow.
///
/// The `symref` capability wins; otherwise a branch pointing at the same
/// commit as HEAD, preferring the default branch name. `None` leaves HEAD
/// detached.
fn default_branch(advertisement: &RefAdvertisement, head_id: &ObjectId) -> Option<String> {
    if let Some(target) = advertisement.head_symref() {
        if advertisement.get(target).is_some() {
            return Some(target.to_string());
        }
    }
    if advertisement.get(DEFAULT_BRANCH) == Some(*head_id) {
        return Some(DEFAULT_BRANCH.to_string());
    }
    advertisement
        .refs
        .iter()
        .find(|r| r.name.starts_with("refs/heads/") && r.id == *head_id)
        .map(|r| r.name.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Ref;

    fn id(byte: u8) -> ObjectId {
        ObjectId::from_bytes([byte; 20])
    }

    fn adv(refs: &[(&str, u8)], capabilities: &[&str]) -> RefAdvertisement {
        RefAdvertisement {
            refs: refs
                .iter()
                .map(|(name, byte)| Ref {
                    name: name.to_string(),
                    id: id(*byte),
                })
                .collect(),
            capabilities: capabilities.iter().map(|c| c.to_string()).collect(),
        }
    }

    #[test]
    fn test_default_branch_prefers_symref() {
        let a = adv(
            &[("HEAD", 1), ("refs/heads/dev", 1), ("refs/heads/main", 1)],
            &["symref=HEAD:refs/heads/dev"],
        );
        assert_eq!(default_branch(&a, &id(1)).as_deref(), Some("refs/heads/dev"));
    }

    #[test]
    fn test_default_branch_by_matching_id() {
        let a = adv(&[("HEAD", 2), ("refs/heads/a", 1), ("refs/heads/b", 2)], &[]);
        assert_eq!(default_branch(&a, &id(2)).as_deref(), Some("refs/heads/b"));

        let a = adv(&[("HEAD", 2), ("refs/heads/b", 2), ("refs/heads/main", 2)], &[]);
        assert_eq!(default_branch(&a, &id(2)).as_deref(), Some("refs/heads/main"));
    }

    #[test]
    fn test_detached_head() {
        let a = adv(&[("HEAD", 3), ("refs/heads/main", 1)], &[]);
        assert_eq!(default_branch(&a, &id(3)), None);
    }

    #[test]
    fn test_request_skips_peeled_and_duplicates() {
        let a = adv(
            &[("HEAD", 1), ("refs/heads/main", 1), ("refs/tags/v1", 2), ("refs/tags/v1^{}", 1)],
            &["ofs-delta", "agent=git/2"],
        );
        let request = build_request(&a, "twig/test");
        assert_eq!(request.wants(), &[id(1), id(2)]);
        let encoded = String::from_utf8(request.encode().unwrap()).unwrap();
        assert!(encoded.contains("ofs-delta agent=twig/test"));
        assert!(!encoded.contains("side-band-64k"));
    }
}
