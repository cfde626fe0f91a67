//! CLI command implementations.
//!
//! Every command takes the working tree root explicitly and writes its
//! output to the given writer.

use crate::config::Config;
use crate::transport::HttpTransport;
use anyhow::{bail, Context, Result};
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use twig_git::{clone_repository, CloneOptions};
use twig_storage::{ObjectStore, Repository, Signature};

fn open(work_tree: &Path, config: &Config) -> Result<Repository> {
    Repository::open(work_tree, config.store_config()).with_context(|| {
        format!(
            "not a twig repository (or missing {}): {}",
            config.git_dir,
            work_tree.display()
        )
    })
}

/// Initialize a new repository.
pub fn init(work_tree: &Path, config: &Config, out: &mut impl Write) -> Result<()> {
    let repo = Repository::init(work_tree, config.store_config())?;
    writeln!(out, "Initialized empty twig repository in {}", repo.git_dir().display())?;
    Ok(())
}

/// Print an object's content.
pub fn cat_file(work_tree: &Path, config: &Config, object: &str, out: &mut impl Write) -> Result<()> {
    let repo = open(work_tree, config)?;
    let content = repo
        .pretty_print(object)
        .with_context(|| format!("cannot show object {object}"))?;
    out.write_all(&content)?;
    Ok(())
}

/// Compute a file's blob id, storing the blob with `write`.
pub fn hash_object(
    work_tree: &Path,
    config: &Config,
    file: &Path,
    write: bool,
    out: &mut impl Write,
) -> Result<()> {
    let path = work_tree.join(file);
    let id = if write {
        open(work_tree, config)?.hash_object(&path, true)
    } else {
        ObjectStore::hash_file(&path)
    }
    .with_context(|| format!("cannot hash {}", path.display()))?;
    writeln!(out, "{id}")?;
    Ok(())
}

/// List a tree's entries.
pub fn ls_tree(
    work_tree: &Path,
    config: &Config,
    tree: &str,
    name_only: bool,
    out: &mut impl Write,
) -> Result<()> {
    let repo = open(work_tree, config)?;
    for line in repo
        .list_tree(tree, name_only)
        .with_context(|| format!("cannot list tree {tree}"))?
    {
        writeln!(out, "{line}")?;
    }
    Ok(())
}

/// Snapshot the working tree.
pub fn write_tree(work_tree: &Path, config: &Config, out: &mut impl Write) -> Result<()> {
    let id = open(work_tree, config)?.write_tree()?;
    writeln!(out, "{id}")?;
    Ok(())
}

/// Create a commit object.
pub fn commit_tree(
    work_tree: &Path,
    config: &Config,
    tree: &str,
    parents: &[String],
    message: &str,
    out: &mut impl Write,
) -> Result<()> {
    let repo = open(work_tree, config)?;
    let signature = Signature::now(config.user_name.as_str(), config.user_email.as_str())?;
    let parents: Vec<&str> = parents.iter().map(String::as_str).collect();

    let mut message = message.to_string();
    if !message.ends_with('\n') {
        message.push('\n');
    }

    let id = repo.commit_tree(tree, &parents, &signature, &signature, &message)?;
    writeln!(out, "{id}")?;
    Ok(())
}

/// Directory name `git clone` would pick for `url`.
pub fn clone_dir_name(url: &str) -> Option<String> {
    let last = url.trim_end_matches('/').rsplit(['/', ':']).next()?;
    let name = last.strip_suffix(".git").unwrap_or(last);
    (!name.is_empty()).then(|| name.to_string())
}

/// Clone a repository over smart HTTP.
pub async fn clone(
    work_tree: &Path,
    config: &Config,
    url: &str,
    dir: Option<&Path>,
    bare: bool,
    out: &mut impl Write,
) -> Result<()> {
    let dest: PathBuf = match dir {
        Some(dir) => work_tree.join(dir),
        None => work_tree.join(
            clone_dir_name(url).with_context(|| format!("cannot derive a directory from {url}"))?,
        ),
    };
    if dest.exists() && dest.read_dir()?.next().is_some() {
        bail!("destination path '{}' already exists and is not empty", dest.display());
    }

    writeln!(out, "Cloning into '{}'...", dest.display())?;

    let transport = HttpTransport::new(&config.user_agent)?;
    let cancel = CancellationToken::new();
    let on_interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupted, stopping clone");
                cancel.cancel();
            }
        })
    };

    let options = CloneOptions {
        store: config.store_config(),
        agent: config.user_agent.clone(),
        bare,
        cancel: Some(cancel),
        ..CloneOptions::default()
    };
    let result = clone_repository(&transport, url, &dest, &options).await;
    on_interrupt.abort();

    let outcome = result.with_context(|| format!("failed to clone {url}"))?;
    match (&outcome.head, outcome.checkout) {
        (_, Some(stats)) => writeln!(
            out,
            "Received {} objects, checked out {} files",
            outcome.objects, stats.files
        )?,
        (None, None) if outcome.objects == 0 => {
            writeln!(out, "warning: You appear to have cloned an empty repository.")?
        }
        _ => writeln!(out, "Received {} objects", outcome.objects)?,
    }
    Ok(())
}
