//! Configuration management for the Shardscroll CLI.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use shardscroll_distributed::topology::ClusterLayout;
use shardscroll_distributed::ScrollConfig;
use std::path::{Path, PathBuf};

/// Name of the configuration file looked up by `Config::load`.
pub const CONFIG_FILE: &str = "shardscroll.toml";

/// Shardscroll configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub scroll: ScrollConfig,
    #[serde(default)]
    pub demo: DemoConfig,
    #[serde(default)]
    pub cluster: ClusterLayout,
}

/// Parameters of the in-process failure demo.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DemoConfig {
    #[serde(default = "default_nodes")]
    pub nodes: u32,
    #[serde(default = "default_shards")]
    pub shards: u32,
    #[serde(default = "default_documents")]
    pub documents: usize,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    /// Pages served before a node is stopped; 0 stops it before the scroll.
    #[serde(default = "default_fail_after_pages")]
    pub fail_after_pages: usize,
}

fn default_nodes() -> u32 { 3 }
fn default_shards() -> u32 { 3 }
fn default_documents() -> usize { 300 }
fn default_page_size() -> usize { 25 }
fn default_fail_after_pages() -> usize { 3 }

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            nodes: default_nodes(),
            shards: default_shards(),
            documents: default_documents(),
            page_size: default_page_size(),
            fail_after_pages: default_fail_after_pages(),
        }
    }
}

impl Config {
    /// Load config from shardscroll.toml in the current or parent directories.
    pub fn load() -> Result<Self> {
        match find_config_file() {
            Some(path) => Self::load_from(&path),
            None => Ok(Config::default()),
        }
    }

    /// Load config from a specific file.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config: {}", path.display()))
    }

    /// Save config to the specified path.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config: {}", path.display()))?;
        Ok(())
    }

    /// Render as a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize config")
    }
}

/// Find shardscroll.toml in current or parent directories.
fn find_config_file() -> Option<PathBuf> {
    let dir = std::env::current_dir().ok()?;
    find_config_file_from(dir)
}

fn find_config_file_from(mut dir: PathBuf) -> Option<PathBuf> {
    loop {
        let config_path = dir.join(CONFIG_FILE);
        if config_path.exists() {
            return Some(config_path);
        }
        if !dir.pop() {
            break;
        }
    }
    None
}
