//! CLI configuration.

use crate::logging::LogFormat;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;
use twig_git::DEFAULT_AGENT;
use twig_storage::{CompressionLevel, StoreConfig, DEFAULT_GIT_DIR};

/// Configuration for the twig CLI, read from an optional YAML file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Log level used when no `-v` flag is given.
    pub log_level: String,
    /// Log output format.
    pub log_format: LogFormat,
    /// zlib level for new loose objects.
    pub compression: CompressionLevel,
    /// Metadata directory name.
    pub git_dir: String,
    /// Author and committer name for new commits.
    pub user_name: String,
    /// Author and committer email for new commits.
    pub user_email: String,
    /// Agent string sent to remotes.
    pub user_agent: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "warn".to_string(),
            log_format: LogFormat::Pretty,
            compression: CompressionLevel::Default,
            git_dir: DEFAULT_GIT_DIR.to_string(),
            user_name: "twig".to_string(),
            user_email: "twig@localhost".to_string(),
            user_agent: DEFAULT_AGENT.to_string(),
        }
    }
}

impl Config {
    /// Loads the configuration at `path`. A missing file yields defaults.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        match std::fs::read_to_string(path) {
            Ok(content) => Self::parse(&content)
                .with_context(|| format!("invalid configuration in {}", path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => {
                Err(e).with_context(|| format!("failed to read configuration {}", path.display()))
            }
        }
    }

    /// Parses YAML configuration text.
    pub fn parse(content: &str) -> anyhow::Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    /// Repository layout settings.
    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            compression: self.compression,
            git_dir: self.git_dir.clone(),
        }
    }
}
