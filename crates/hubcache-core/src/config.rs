use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::reconcile::ConsistencyMode;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default)]
    pub pagination: PaginationConfig,
    #[serde(default)]
    pub reconcile: ReconcileConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaginationConfig {
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileConfig {
    #[serde(default)]
    pub consistency: ConsistencyMode,
    #[serde(default = "default_true")]
    pub patch_watcher_count: bool,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            consistency: ConsistencyMode::default(),
            patch_watcher_count: default_true(),
        }
    }
}

/// Load `<root>/.hubcache/config.toml`, falling back to defaults when the
/// file does not exist.
///
/// # Errors
///
/// Returns an error naming the file if it exists but cannot be read or
/// parsed.
pub fn load_config(root: &Path) -> Result<CacheConfig> {
    let path = root.join(".hubcache/config.toml");
    if !path.exists() {
        return Ok(CacheConfig::default());
    }

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let config = toml::from_str::<CacheConfig>(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))?;

    if config.pagination.page_size == 0 {
        anyhow::bail!("{}: pagination.page_size must be at least 1", path.display());
    }
    Ok(config)
}

const fn default_true() -> bool {
    true
}

const fn default_page_size() -> u32 {
    5
}
