// =============================================================================
// Runtime Configuration — hot-editable engine settings with atomic save
// =============================================================================
//
// Central configuration for the engine core.  Every tunable parameter lives
// here so that the process can be reconfigured by editing one JSON file.
//
// Persistence uses an atomic tmp + rename pattern to prevent corruption on
// crash.  All fields carry `#[serde(default)]` so that adding new fields
// never breaks loading an older config file.
//
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_symbols() -> Vec<String> {
    vec!["BTCUSD".to_string()]
}

fn default_bind_addr() -> String {
    "0.0.0.0:7878".to_string()
}

fn default_starting_balance() -> f64 {
    1_000_000.0
}

fn default_order_qty() -> f64 {
    0.01
}

fn default_candle_resolutions_ms() -> Vec<i64> {
    vec![60_000]
}

fn default_candle_buffer_size() -> usize {
    50_000
}

fn default_event_buffer_size() -> usize {
    50_000
}

fn default_candle_cache_size() -> usize {
    100
}

fn default_event_cache_size() -> usize {
    100
}

fn default_flush_interval_secs() -> u64 {
    5
}

fn default_db_path() -> String {
    "engine.sqlite3".to_string()
}

fn default_shutdown_poll_ms() -> u64 {
    100
}

// =============================================================================
// RuntimeConfig
// =============================================================================

/// Top-level runtime configuration for the engine core.
///
/// Every field has a serde default so that older JSON files missing new
/// fields will still deserialise correctly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Symbols the provider subscribes to and the strategy trades.
    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,

    /// Address the external query server binds to.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Starting cash balance for the broker.
    #[serde(default = "default_starting_balance")]
    pub starting_balance: f64,

    /// Quantity the engine orchestrator uses when turning a strategy's
    /// `Buy`/`Sell` decision into an order.
    #[serde(default = "default_order_qty")]
    pub order_qty: f64,

    /// Candle bucket widths in milliseconds; one bucketing pipeline per entry.
    #[serde(default = "default_candle_resolutions_ms")]
    pub candle_resolutions_ms: Vec<i64>,

    /// Store candle write-buffer threshold before a forced flush.
    #[serde(default = "default_candle_buffer_size")]
    pub candle_buffer_size: usize,

    /// Store event write-buffer threshold before a forced flush.
    #[serde(default = "default_event_buffer_size")]
    pub event_buffer_size: usize,

    /// LRU entries retained in the candle read cache.
    #[serde(default = "default_candle_cache_size")]
    pub candle_cache_size: usize,

    /// LRU entries retained in the event read cache.
    #[serde(default = "default_event_cache_size")]
    pub event_cache_size: usize,

    /// Seconds between timer-triggered buffer flushes.
    #[serde(default = "default_flush_interval_secs")]
    pub flush_interval_secs: u64,

    /// Path to the SQLite database file backing the store.
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Cadence in milliseconds at which the run loop and adapters poll the
    /// shutdown flag.
    #[serde(default = "default_shutdown_poll_ms")]
    pub shutdown_poll_ms: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            symbols: default_symbols(),
            bind_addr: default_bind_addr(),
            starting_balance: default_starting_balance(),
            order_qty: default_order_qty(),
            candle_resolutions_ms: default_candle_resolutions_ms(),
            candle_buffer_size: default_candle_buffer_size(),
            event_buffer_size: default_event_buffer_size(),
            candle_cache_size: default_candle_cache_size(),
            event_cache_size: default_event_cache_size(),
            flush_interval_secs: default_flush_interval_secs(),
            db_path: default_db_path(),
            shutdown_poll_ms: default_shutdown_poll_ms(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read runtime config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse runtime config from {}", path.display()))?;

        info!(path = %path.display(), symbols = ?config.symbols, "runtime config loaded");

        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    ///
    /// This prevents corruption if the process crashes mid-write.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = serde_json::to_string_pretty(self)
            .context("failed to serialise runtime config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "runtime config saved (atomic)");
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.symbols, vec!["BTCUSD".to_string()]);
        assert_eq!(cfg.candle_buffer_size, 50_000);
        assert_eq!(cfg.event_buffer_size, 50_000);
        assert_eq!(cfg.candle_cache_size, 100);
        assert_eq!(cfg.event_cache_size, 100);
        assert!((cfg.starting_balance - 1_000_000.0).abs() < f64::EPSILON);
    }

    #[test]
    fn deserialise_empty_json_uses_defaults() {
        let cfg: RuntimeConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.bind_addr, "0.0.0.0:7878");
        assert!((cfg.starting_balance - 1_000_000.0).abs() < f64::EPSILON);
    }

    #[test]
    fn deserialise_partial_json_fills_defaults() {
        let json = r#"{ "symbols": ["ETHUSD"], "order_qty": 0.5 }"#;
        let cfg: RuntimeConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.symbols, vec!["ETHUSD".to_string()]);
        assert!((cfg.order_qty - 0.5).abs() < f64::EPSILON);
        assert_eq!(cfg.candle_buffer_size, 50_000);
    }

    #[test]
    fn roundtrip_serialisation() {
        let cfg = RuntimeConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let cfg2: RuntimeConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg.symbols, cfg2.symbols);
        assert_eq!(cfg.candle_resolutions_ms, cfg2.candle_resolutions_ms);
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = std::env::temp_dir().join("meridian-cfg-test-round-trip");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.json");

        let mut cfg = RuntimeConfig::default();
        cfg.symbols = vec!["XYZ".to_string()];
        cfg.save(&path).unwrap();

        let loaded = RuntimeConfig::load(&path).unwrap();
        assert_eq!(loaded.symbols, vec!["XYZ".to_string()]);

        std::fs::remove_dir_all(&dir).ok();
    }
}
