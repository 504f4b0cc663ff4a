//! Layered configuration: `scenery.toml` in the data root, then `SCENERY_*`
//! environment variables, then command-line flags.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use scenery_store::StashFormat;
use serde::{Deserialize, Serialize};

pub const CONFIG_FILE: &str = "scenery.toml";

mod defaults {
    use std::path::PathBuf;

    pub fn host() -> String {
        "127.0.0.1".to_string()
    }

    pub fn port() -> u16 {
        7891
    }

    pub fn data_dir() -> PathBuf {
        ".scenery".into()
    }

    pub fn max_depth() -> usize {
        scenery_store::DEFAULT_MAX_DEPTH
    }

    pub fn timeout_secs() -> u64 {
        30
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "defaults::host")]
    pub host: String,
    #[serde(default = "defaults::port")]
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreSection {
    #[serde(default = "defaults::data_dir")]
    pub data_dir: PathBuf,
    #[serde(default)]
    pub stash_format: StashFormat,
    /// Generate missing stashes in the background while serving.
    #[serde(default)]
    pub auto_stash: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FederationSection {
    #[serde(default = "defaults::max_depth")]
    pub max_depth: usize,
    #[serde(default = "defaults::timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub store: StoreSection,
    #[serde(default)]
    pub federation: FederationSection,
}

impl Default for ServerSection {
    fn default() -> Self {
        ServerSection {
            host: defaults::host(),
            port: defaults::port(),
        }
    }
}

impl Default for StoreSection {
    fn default() -> Self {
        StoreSection {
            data_dir: defaults::data_dir(),
            stash_format: StashFormat::default(),
            auto_stash: false,
        }
    }
}

impl Default for FederationSection {
    fn default() -> Self {
        FederationSection {
            max_depth: defaults::max_depth(),
            timeout_secs: defaults::timeout_secs(),
        }
    }
}

/// Values given on the command line.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub data_dir: Option<PathBuf>,
    pub host: Option<String>,
    pub port: Option<u16>,
}

impl Config {
    /// Resolve the full configuration for this process.
    pub fn load(overrides: &Overrides) -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        let lookup = |key: &str| std::env::var(key).ok();

        let root = overrides
            .data_dir
            .clone()
            .or_else(|| lookup("SCENERY_DATA_DIR").map(PathBuf::from))
            .unwrap_or_else(defaults::data_dir);

        let mut config = Self::from_file(&root.join(CONFIG_FILE))?;
        config.store.data_dir = root;
        config.apply_env(lookup)?;
        config.apply_overrides(overrides);
        Ok(config)
    }

    /// Read a config file; a missing file gives the defaults.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_toml(&text).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn from_toml(text: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Apply `SCENERY_*` variables as returned by `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<()> {
        if let Some(host) = lookup("SCENERY_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("SCENERY_PORT") {
            self.server.port = port.parse().with_context(|| format!("SCENERY_PORT={port}"))?;
        }
        if let Some(dir) = lookup("SCENERY_DATA_DIR") {
            self.store.data_dir = dir.into();
        }
        if let Some(depth) = lookup("SCENERY_FEDERATION_MAX_DEPTH") {
            self.federation.max_depth = depth
                .parse()
                .with_context(|| format!("SCENERY_FEDERATION_MAX_DEPTH={depth}"))?;
        }
        if let Some(secs) = lookup("SCENERY_FEDERATION_TIMEOUT_SECS") {
            self.federation.timeout_secs = secs
                .parse()
                .with_context(|| format!("SCENERY_FEDERATION_TIMEOUT_SECS={secs}"))?;
        }
        Ok(())
    }

    pub fn apply_overrides(&mut self, overrides: &Overrides) {
        if let Some(dir) = &overrides.data_dir {
            self.store.data_dir = dir.clone();
        }
        if let Some(host) = &overrides.host {
            self.server.host = host.clone();
        }
        if let Some(port) = overrides.port {
            self.server.port = port;
        }
    }

    pub fn federation_timeout(&self) -> Duration {
        Duration::from_secs(self.federation.timeout_secs)
    }
}
