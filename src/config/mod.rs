//! Relayer configuration: per-chain listener tuning plus engine-wide knobs.
//!
//! The embedding process owns config discovery and file handling; this
//! module only defines the shapes, their defaults and validation.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constants::{DEFAULT_BLOCK_FETCH_CONCURRENCY, MAX_BLOCK_FETCH_CONCURRENCY};
use crate::listener::BlockSyncConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required field: {0}")]
    MissingField(String),
    #[error("Duplicate chain id: {0}")]
    DuplicateId(String),
    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayerConfig {
    /// Database directory for checkpoints and escalated messages.
    pub db_path: PathBuf,
    /// Wipe the store on start instead of resuming from checkpoints.
    #[serde(default)]
    pub fresh: bool,
    pub chains: Vec<ChainConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    pub id: String,
    /// Sync from this height when non-zero (and below the chain head).
    #[serde(default)]
    pub start_height: u64,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_block_interval_ms")]
    pub block_interval_ms: u64,
    #[serde(default = "default_head_poll_interval_ms")]
    pub head_poll_interval_ms: u64,
}

fn default_concurrency() -> usize {
    DEFAULT_BLOCK_FETCH_CONCURRENCY
}

fn default_block_interval_ms() -> u64 {
    crate::constants::BLOCK_INTERVAL.as_millis() as u64
}

fn default_head_poll_interval_ms() -> u64 {
    crate::constants::BLOCK_HEIGHT_POLL_INTERVAL.as_millis() as u64
}

impl RelayerConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chains.is_empty() {
            return Err(ConfigError::MissingField("chains".into()));
        }
        let mut seen = HashSet::new();
        for chain in &self.chains {
            if chain.id.is_empty() {
                return Err(ConfigError::MissingField("chains[].id".into()));
            }
            if !seen.insert(&chain.id) {
                return Err(ConfigError::DuplicateId(chain.id.clone()));
            }
            chain.validate()?;
        }
        Ok(())
    }
}

impl ChainConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 || self.concurrency > MAX_BLOCK_FETCH_CONCURRENCY {
            return Err(ConfigError::InvalidValue {
                field: format!("chains[{}].concurrency", self.id),
                reason: format!("must be in 1..={MAX_BLOCK_FETCH_CONCURRENCY}"),
            });
        }
        if self.block_interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: format!("chains[{}].block_interval_ms", self.id),
                reason: "must be non-zero".into(),
            });
        }
        Ok(())
    }

    pub fn block_sync_config(&self) -> BlockSyncConfig {
        BlockSyncConfig {
            start_height: self.start_height,
            concurrency: self.concurrency,
            block_interval: Duration::from_millis(self.block_interval_ms),
            head_poll_interval: Duration::from_millis(self.head_poll_interval_ms),
        }
    }
}
