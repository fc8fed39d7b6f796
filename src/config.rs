//! Persistent settings (`preload.json`).
//!
//! Missing fields fall back to defaults, so an empty `{}` is a valid file.

use anyhow::{Context, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::core::registry::{EVENT_QUEUE, MAX_ENTRIES, POLL_INTERVAL};
use crate::core::session::{DEFAULT_MAX_BYTES, DEFAULT_READAHEAD_SECS};
use crate::core::{Budget, RegistryConfig};
use crate::engines::file::DEFAULT_CHUNK_SIZE;

/// Default REST API port
pub const DEFAULT_API_PORT: u16 = 9020;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreloadConfig {
    /// Maximum concurrent sessions
    pub capacity: usize,
    /// Worker status poll interval
    pub poll_interval_ms: u64,
    /// Read-ahead byte target when a start request passes 0
    pub default_max_bytes: u64,
    /// Read-ahead duration target when a start request passes <= 0
    pub default_readahead_secs: f64,
    /// Pending status notifications before new ones are dropped
    pub event_queue: usize,
    /// File engine read size
    pub chunk_size: usize,
    pub api_port: u16,
}

impl Default for PreloadConfig {
    fn default() -> Self {
        Self {
            capacity: MAX_ENTRIES,
            poll_interval_ms: POLL_INTERVAL.as_millis() as u64,
            default_max_bytes: DEFAULT_MAX_BYTES,
            default_readahead_secs: DEFAULT_READAHEAD_SECS,
            event_queue: EVENT_QUEUE,
            chunk_size: DEFAULT_CHUNK_SIZE,
            api_port: DEFAULT_API_PORT,
        }
    }
}

impl PreloadConfig {
    /// Load from `path`, or defaults if the file does not exist.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        let config: Self = serde_json::from_str(&json)
            .with_context(|| format!("Failed to parse config: {}", path.display()))?;
        info!("Config loaded from {}", path.display());
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write config: {}", path.display()))?;
        info!("Config saved to {}", path.display());
        Ok(())
    }

    /// Registry settings. Zero or negative values fall back to built-in defaults,
    /// except `capacity` where 0 is honored.
    pub fn registry(&self) -> RegistryConfig {
        let poll = if self.poll_interval_ms == 0 {
            POLL_INTERVAL
        } else {
            Duration::from_millis(self.poll_interval_ms)
        };
        RegistryConfig {
            capacity: self.capacity,
            poll_interval: poll,
            defaults: Budget {
                max_bytes: if self.default_max_bytes == 0 {
                    DEFAULT_MAX_BYTES
                } else {
                    self.default_max_bytes
                },
                readahead_secs: if self.default_readahead_secs > 0.0 {
                    self.default_readahead_secs
                } else {
                    DEFAULT_READAHEAD_SECS
                },
            },
            event_queue: self.event_queue.max(1),
        }
    }
}
