//! Service settings: YAML file plus command-line / environment overrides.
//!
//! ```yaml
//! indexer:
//!   node_url: http://127.0.0.1:8332
//!   prune_window: 6
//! server:
//!   listen: 127.0.0.1:9096
//! storage:
//!   path: ./txindex.db
//! log:
//!   level: info
//!   components: { txindex-core: debug }
//! ```

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use txindex_core::IndexerConfig;

use crate::logging::LogConfig;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub indexer: IndexerConfig,
    pub server: ServerSettings,
    pub storage: StorageSettings,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub listen: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:9096".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// SQLite file path or `sqlite:` URL.
    pub path: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            path: "./txindex.db".into(),
        }
    }
}

/// Values given on the command line or through `TXINDEX_*` variables.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub node_url: Option<String>,
    pub db: Option<String>,
    pub listen: Option<String>,
    pub prune_window: Option<u64>,
    pub log_level: Option<String>,
    pub log_json: bool,
}

impl Settings {
    /// Read `path` if given, otherwise start from defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        serde_yaml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn apply(&mut self, overrides: Overrides) {
        if let Some(url) = overrides.node_url {
            self.indexer.node_url = url;
        }
        if let Some(db) = overrides.db {
            self.storage.path = db;
        }
        if let Some(listen) = overrides.listen {
            self.server.listen = listen;
        }
        if let Some(window) = overrides.prune_window {
            self.indexer.prune_window = window;
        }
        if let Some(level) = overrides.log_level {
            self.log.level = level;
        }
        if overrides.log_json {
            self.log.json = true;
        }
    }
}
