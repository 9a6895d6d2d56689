// src/config/mod.rs
//! Application configuration: TOML file located via env var with fallbacks,
//! plus the semantic validation that must pass before any pipeline runs.

pub mod feed;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::key::SignTable;

pub use feed::FeedSourceConfig;

pub const ENV_CONFIG_PATH: &str = "HORO_CONFIG_PATH";
pub const DEFAULT_CONFIG_PATH: &str = "config/horo.toml";
pub const DEFAULT_MEMORY_CAPACITY: usize = crate::dedup::memory::DEFAULT_MEMORY_CAPACITY;

/// Startup-time configuration errors. Any of these stops the pipeline from running.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("feed '{source_name}': required field '{field}' is missing or empty")]
    MissingField {
        source_name: String,
        field: &'static str,
    },
    #[error("feed name '{0}' is configured more than once")]
    DuplicateSource(String),
    #[error("no repository binding configured")]
    MissingRepository,
    #[error("no feed sources configured")]
    NoSources,
    #[error("feed '{source_name}': unsupported uri '{uri}'")]
    UnsupportedUri { source_name: String, uri: String },
    #[error("feed '{source_name}': {reason}")]
    Invalid { source_name: String, reason: String },
    #[error("sign alias '{alias}': {reason}")]
    InvalidSignAlias { alias: String, reason: String },
}

fn default_memory_capacity() -> usize {
    DEFAULT_MEMORY_CAPACITY
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RepositoryConfig {
    Memory {
        #[serde(default = "default_memory_capacity")]
        capacity: usize,
    },
    Journal {
        path: PathBuf,
    },
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SignsConfig {
    /// alias word -> canonical sign, e.g. `Ram = "Aries"`
    #[serde(default)]
    pub aliases: BTreeMap<String, String>,
}

impl SignsConfig {
    pub fn table(&self) -> Result<SignTable, ConfigError> {
        SignTable::with_aliases(self.aliases.iter().map(|(a, s)| (a.as_str(), s.as_str())))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    pub repository: Option<RepositoryConfig>,
    #[serde(default)]
    pub signs: SignsConfig,
    #[serde(default)]
    pub feeds: Vec<FeedSourceConfig>,
}

impl AppConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).context("parsing pipeline config toml")
    }

    /// Semantic checks; the router repeats the per-feed ones when it is built directly.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.repository.is_none() {
            return Err(ConfigError::MissingRepository);
        }
        if self.feeds.is_empty() {
            return Err(ConfigError::NoSources);
        }
        let mut seen = std::collections::HashSet::new();
        for f in &self.feeds {
            f.validate()?;
            if !seen.insert(f.name.trim()) {
                return Err(ConfigError::DuplicateSource(f.name.clone()));
            }
        }
        self.signs.table()?;
        Ok(())
    }
}

/// Load config from an explicit path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading pipeline config from {}", path.display()))?;
    AppConfig::from_toml_str(&content)
}

/// Load config using env var + fallback:
/// 1) $HORO_CONFIG_PATH
/// 2) config/horo.toml
pub fn load_config_default() -> Result<AppConfig> {
    if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
        let pb = PathBuf::from(p);
        if pb.exists() {
            return load_config_from(&pb);
        } else {
            return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
        }
    }
    let fallback = PathBuf::from(DEFAULT_CONFIG_PATH);
    if fallback.exists() {
        return load_config_from(&fallback);
    }
    Err(anyhow!(
        "no pipeline config found (set {ENV_CONFIG_PATH} or create {DEFAULT_CONFIG_PATH})"
    ))
}
