// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Lock table configuration

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{LockTableError, LockTableResult};

/// Lock table tuning knobs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockTableConfig {
    /// Soft cap on the number of tracked keys
    pub max_locks: usize,

    /// Check the cap every N key insertions
    pub lock_count_check_interval: u64,

    /// Fraction of `max_locks` to clear down to once the cap is exceeded
    pub low_watermark_ratio: f64,

    /// Capacity of the finalized side of the transaction status cache
    pub finalized_txn_cache_size: usize,

    /// Capacity of the pushed side of the transaction status cache
    pub pushed_txn_cache_size: usize,

    /// Materialize replicated locks even when nobody waits on them
    pub track_uncontended_replicated_locks: bool,
}

impl Default for LockTableConfig {
    fn default() -> Self {
        Self {
            max_locks: 10_000,
            lock_count_check_interval: 64,
            low_watermark_ratio: 0.5,
            finalized_txn_cache_size: 16,
            pushed_txn_cache_size: 64,
            track_uncontended_replicated_locks: false,
        }
    }
}

impl LockTableConfig {
    /// Small, eagerly checked configuration for tests
    pub fn for_testing() -> Self {
        Self {
            max_locks: 1_000,
            lock_count_check_interval: 1,
            track_uncontended_replicated_locks: true,
            ..Self::default()
        }
    }

    /// Configuration for memory-constrained environments
    pub fn low_memory() -> Self {
        let mut config = Self::default();
        config.max_locks = 1_000;
        config.lock_count_check_interval = 16;
        config.low_watermark_ratio = 0.25;
        config.finalized_txn_cache_size = 8;
        config.pushed_txn_cache_size = 16;
        config
    }

    /// Number of keys memory-bound enforcement clears down to
    pub fn low_watermark(&self) -> usize {
        (self.max_locks as f64 * self.low_watermark_ratio).floor() as usize
    }

    /// Load and validate a JSON configuration file
    pub fn from_json_file(path: impl AsRef<Path>) -> LockTableResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            LockTableError::InvalidConfig(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|e| {
            LockTableError::InvalidConfig(format!("cannot parse {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> LockTableResult<()> {
        if self.max_locks == 0 {
            return Err(LockTableError::InvalidConfig(
                "max_locks must be > 0".to_string(),
            ));
        }
        if self.lock_count_check_interval == 0 {
            return Err(LockTableError::InvalidConfig(
                "lock_count_check_interval must be > 0".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.low_watermark_ratio) {
            return Err(LockTableError::InvalidConfig(format!(
                "low_watermark_ratio must be in [0, 1), got {}",
                self.low_watermark_ratio
            )));
        }
        Ok(())
    }
}
