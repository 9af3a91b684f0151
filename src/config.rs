//! Tunables for the cache core.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Limits applied by the object pools in [`crate::pool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Byte buffers with a larger capacity are dropped instead of pooled.
    pub max_buffer_bytes: usize,
    /// Lookup maps with a larger capacity are dropped instead of pooled.
    pub max_map_entries: usize,
    /// Hash sets with a larger capacity are dropped instead of pooled.
    pub max_set_entries: usize,
    /// Number of idle instances each pool retains.
    pub max_pooled: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            max_buffer_bytes: 64 * 1024,
            max_map_entries: 10_000,
            max_set_entries: 10_000,
            max_pooled: 64,
        }
    }
}

/// Settings a cache layer hands to the core.
#[derive(Debug, Clone, PartialEq)]
pub struct CoreConfig {
    pub pool: PoolConfig,
    /// Window near "now" treated as volatile when a query has no override.
    pub backfill_tolerance: Duration,
    /// Point budget applied by `crop_to_size`; `0` disables size cropping.
    pub max_points: usize,
}

impl Default for CoreConfig {
    fn default() -> Self {
        CoreConfig {
            pool: PoolConfig::default(),
            backfill_tolerance: Duration::ZERO,
            max_points: 0,
        }
    }
}
