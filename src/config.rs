//! Durable application configuration.
//!
//! Stored as `config.json` in the XDG config directory (`freeshare/`).
//! Missing fields fall back to defaults, so a config written by an older
//! build keeps working.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Default fixed-size partition length (1 MiB).
pub const DEFAULT_CHUNK_SIZE: u64 = 1024 * 1024;

/// The entry node this app is bootstrapped against. It runs the recorder
/// service and serves chunks it holds.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EntryNode {
    pub host: String,
    pub port: u16,
    /// Public port peers reach us through, when different from `port`.
    #[serde(default)]
    pub dht_port: Option<u16>,
}

impl Default for EntryNode {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9000,
            dht_port: None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppConfig {
    /// Domain under which this node's shares are advertised.
    #[serde(default = "default_domain")]
    pub domain: String,
    /// Local HTTP listen port.
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub entry_node: EntryNode,
    /// Partition size used when splitting files for offload.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,
    /// Replication sync tick, in seconds.
    #[serde(default = "default_sync_interval")]
    pub sync_interval_secs: u64,
}

fn default_domain() -> String {
    "test.com".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_chunk_size() -> u64 {
    DEFAULT_CHUNK_SIZE
}

fn default_sync_interval() -> u64 {
    10
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            domain: default_domain(),
            port: default_port(),
            entry_node: EntryNode::default(),
            chunk_size: default_chunk_size(),
            sync_interval_secs: default_sync_interval(),
        }
    }
}

impl AppConfig {
    /// Load from `config.json`, falling back to defaults on first run.
    pub fn load(config_dir: &Path) -> Result<Self> {
        let path = config_dir.join("config.json");
        match std::fs::read(&path) {
            Ok(data) => {
                let config = serde_json::from_slice(&data)
                    .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Write the effective config back so defaults become visible on disk.
    pub fn save(&self, config_dir: &Path) -> Result<()> {
        std::fs::create_dir_all(config_dir)?;
        let data = serde_json::to_vec_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(config_dir.join("config.json"), data)?;
        Ok(())
    }

    /// Base URL of the recorder service on the entry node.
    pub fn recorder_base(&self) -> String {
        format!("http://{}:{}", self.entry_node.host, self.entry_node.port)
    }

    /// URL a missing partition is fetched from.
    pub fn chunk_url(&self, hash_hex: &str) -> String {
        format!("{}/chunks/{}", self.recorder_base(), hash_hex)
    }

    /// Public URL a shared file is reachable at.
    pub fn share_url(&self, name: &str) -> String {
        let port = self.entry_node.dht_port.unwrap_or(self.port);
        format!("http://{}:{}/{}", self.domain, port, name)
    }
}

/// XDG config directory for this app (`~/.config/freeshare` on Linux).
pub fn default_config_dir() -> PathBuf {
    directories::ProjectDirs::from("", "", "freeshare")
        .map(|dirs| dirs.config_dir().to_path_buf())
        .unwrap_or_else(|| std::env::temp_dir().join(".config").join("freeshare"))
}

/// XDG data directory holding the chunk store and persisted maps.
pub fn default_data_dir() -> PathBuf {
    directories::ProjectDirs::from("", "", "freeshare")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| std::env::temp_dir().join("freeshare-store"))
}
