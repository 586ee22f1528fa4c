//! `ferry.toml` configuration.
//!
//! ```toml
//! [transfer]
//! delete_before_upload = true
//! delete_after_upload = false
//! delete_after_download = false
//!
//! [credentials]
//! username = "loader"
//! password = "secret"
//!
//! [chunking]
//! max_chunk_size = 10485760
//! ```
//!
//! Every section and key is optional. Command-line flags win over the file.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Looked up in the working directory when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "ferry.toml";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FerryConfig {
    #[serde(default)]
    pub transfer: TransferConfig,
    #[serde(default)]
    pub credentials: CredentialsConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferConfig {
    #[serde(default = "default_true")]
    pub delete_before_upload: bool,
    #[serde(default)]
    pub delete_after_upload: bool,
    #[serde(default)]
    pub delete_after_download: bool,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            delete_before_upload: true,
            delete_after_upload: false,
            delete_after_download: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialsConfig {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Falls back to the chunk codec default when unset.
    #[serde(default)]
    pub max_chunk_size: Option<usize>,
}

fn default_true() -> bool {
    true
}

impl FerryConfig {
    /// Load the configuration. An explicit path must exist; the default
    /// `ferry.toml` is used only when present.
    pub fn load(explicit: Option<&Path>) -> anyhow::Result<Self> {
        let (path, required) = match explicit {
            Some(path) => (path.to_path_buf(), true),
            None => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
        };
        if !required && !path.exists() {
            debug!("no {DEFAULT_CONFIG_FILE}, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let config = Self::parse(&content)
            .with_context(|| format!("parsing config file {}", path.display()))?;
        info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }
}
