use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::RelayError;

const APP_DIR: &str = "presence-mask";

/// Roster entry of the fake contact the relay shows to the client. Any
/// client traffic naming it must never reach the real chat server.
pub const FAKE_CONTACT: &str = "41c322a1-b328-495b-a004-5ccd3e45eae8@eu1.pvp.net";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RelayConfig {
    /// Upper bound of a single read from either stream
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Largest partial presence fragment held while waiting for the rest of it
    #[serde(default = "default_max_pending_bytes")]
    pub max_pending_bytes: usize,
    /// Further reads a partial presence fragment may wait for
    #[serde(default = "default_max_pending_reads")]
    pub max_pending_reads: usize,
    #[serde(default = "default_fake_contact")]
    pub fake_contact: String,
    #[serde(default = "default_true")]
    pub start_enabled: bool,
    #[serde(default = "default_true")]
    pub relay_lobby_chat: bool,
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

fn default_chunk_size() -> usize {
    8192
}

fn default_max_pending_bytes() -> usize {
    64 * 1024
}

fn default_max_pending_reads() -> usize {
    2
}

fn default_fake_contact() -> String {
    FAKE_CONTACT.to_string()
}

fn default_true() -> bool {
    true
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            max_pending_bytes: default_max_pending_bytes(),
            max_pending_reads: default_max_pending_reads(),
            fake_contact: default_fake_contact(),
            start_enabled: true,
            relay_lobby_chat: true,
            data_dir: None,
        }
    }
}

impl RelayConfig {
    /// Where the status file and logs live
    pub fn data_dir(&self) -> PathBuf {
        match &self.data_dir {
            Some(dir) => dir.clone(),
            None => dirs::data_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join(APP_DIR),
        }
    }
}

pub fn load_config(path: &Path) -> RelayConfig {
    tracing::debug!("Loading config from {}", path.display());

    if !path.exists() {
        return RelayConfig::default();
    }

    let contents = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!("Failed to read config file, using defaults: {}", e);
            return RelayConfig::default();
        }
    };

    if contents.trim().is_empty() {
        tracing::warn!("Config file is empty, using defaults");
        return RelayConfig::default();
    }

    match serde_json::from_str(&contents) {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!("Failed to parse config file, using defaults: {}", e);
            RelayConfig::default()
        }
    }
}

pub fn save_config(path: &Path, config: &RelayConfig) -> Result<(), RelayError> {
    tracing::debug!("Saving config");

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let contents = serde_json::to_string_pretty(config)?;
    fs::write(path, contents)?;
    Ok(())
}
