// =============================================================================
// Runtime Configuration — watcher settings with atomic save
// =============================================================================
//
// Persistence uses an atomic tmp + rename pattern to prevent corruption on
// crash. All fields carry `#[serde(default)]` so that adding new fields never
// breaks loading an older config file.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_product_id() -> String {
    "BTC-USD".to_string()
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_seed_candle_count() -> usize {
    3000
}

fn default_max_subscribers() -> usize {
    64
}

fn default_update_queue_capacity() -> usize {
    32
}

fn default_bind_addr() -> String {
    "0.0.0.0:3001".to_string()
}

// =============================================================================
// WatchConfig
// =============================================================================

/// Top-level configuration for the watch engine and its HTTP frontend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Instrument to track, e.g. "BTC-USD".
    #[serde(default = "default_product_id")]
    pub product_id: String,

    /// Crawler polling interval in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Hourly candles fetched once at startup to seed the cache.
    #[serde(default = "default_seed_candle_count")]
    pub seed_candle_count: usize,

    /// Maximum number of concurrent update subscribers.
    #[serde(default = "default_max_subscribers")]
    pub max_subscribers: usize,

    /// Bounded length of each subscriber's delivery queue.
    #[serde(default = "default_update_queue_capacity")]
    pub update_queue_capacity: usize,

    /// HTTP listen address. Overridable via the KUMO_BIND_ADDR env var.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            product_id: default_product_id(),
            poll_interval_ms: default_poll_interval_ms(),
            seed_candle_count: default_seed_candle_count(),
            max_subscribers: default_max_subscribers(),
            update_queue_capacity: default_update_queue_capacity(),
            bind_addr: default_bind_addr(),
        }
    }
}

impl WatchConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read watch config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse watch config from {}", path.display()))?;

        info!(
            path = %path.display(),
            product = %config.product_id,
            poll_interval_ms = config.poll_interval_ms,
            "watch config loaded"
        );

        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content =
            serde_json::to_string_pretty(self).context("failed to serialise watch config")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "watch config saved (atomic)");
        Ok(())
    }
}
