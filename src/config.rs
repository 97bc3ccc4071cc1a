// =============================================================================
// Configuration — two merged YAML files with validated, typed tunables
// =============================================================================
//
// `base.yaml` holds the durable defaults for an exchange/symbol; `experiment.yaml`
// overlays per-run overrides (a threshold tweak, a different output path). The
// merge is a recursive map overlay performed on untyped `serde_yaml::Value`
// trees before the final typed deserialization, so a partial experiment file
// only has to name the keys it changes.
//
// Every tunable carries `#[serde(default = "...")]` so that a config loaded
// from an older or partial YAML file never fails to parse a known field --
// only the handful of fields with no sensible default (exchange, symbol,
// paths.data_root) are required.
// =============================================================================

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

fn default_tick_interval_ms() -> u64 {
    1_000
}
fn default_stall_threshold_ms() -> u64 {
    30_000
}
fn default_allowed_lateness_ms() -> i64 {
    250
}
fn default_max_buffer_ms() -> i64 {
    2_000
}
fn default_window_events() -> usize {
    500
}
fn default_quarantine_untrusted_rate() -> f64 {
    0.2
}
fn default_late_degraded_rate() -> f64 {
    0.1
}
fn default_late_untrusted_rate() -> f64 {
    0.3
}
fn default_forced_flush_degraded_rate() -> f64 {
    0.05
}
fn default_forced_flush_untrusted_rate() -> f64 {
    0.15
}
fn default_buffer_len_degraded() -> usize {
    50
}
fn default_buffer_len_untrusted() -> usize {
    200
}
fn default_spread_explode_bps() -> f64 {
    50.0
}
fn default_fat_finger_degraded_bps() -> f64 {
    100.0
}
fn default_fat_finger_untrusted_bps() -> f64 {
    300.0
}
fn default_trade_jump_degraded_bps() -> f64 {
    150.0
}
fn default_weak_price_diverge_bps() -> f64 {
    10.0
}
fn default_invalid_price_diverge_bps() -> f64 {
    50.0
}
fn default_stable_min_duration_ms() -> i64 {
    5_000
}
fn default_replay_speed() -> f64 {
    0.0
}
fn default_max_replay_sleep_ms() -> u64 {
    1_000
}
fn default_poll_interval_ms() -> u64 {
    1_000
}
fn default_open_interest_interval_ms() -> u64 {
    60_000
}
fn default_depth_snapshot_limit() -> u32 {
    100
}
fn default_reconnect_delay_ms() -> u64 {
    5_000
}
fn default_rest_url_base() -> String {
    "https://fapi.binance.com".to_string()
}
fn default_depth_limit() -> usize {
    50
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    pub data_root: PathBuf,
    #[serde(default)]
    pub phase: String,
    #[serde(default = "default_log_root")]
    pub log_root: PathBuf,
    pub output_root: PathBuf,
}

fn default_log_root() -> PathBuf {
    PathBuf::from("./logs")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineTunables {
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    #[serde(default = "default_stall_threshold_ms")]
    pub trades_stall_threshold_ms: u64,
    #[serde(default = "default_stall_threshold_ms")]
    pub orderbook_stall_threshold_ms: u64,
    #[serde(default = "default_stall_threshold_ms")]
    pub liquidations_stall_threshold_ms: u64,
    #[serde(default = "default_stall_threshold_ms")]
    pub ticker_stall_threshold_ms: u64,
    /// Number of price levels the order book keeps per side. Every book
    /// needs one; kept here rather than a bespoke top-level table for it.
    #[serde(default = "default_depth_limit")]
    pub orderbook_depth_limit: usize,
}

impl Default for EngineTunables {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            trades_stall_threshold_ms: default_stall_threshold_ms(),
            orderbook_stall_threshold_ms: default_stall_threshold_ms(),
            liquidations_stall_threshold_ms: default_stall_threshold_ms(),
            ticker_stall_threshold_ms: default_stall_threshold_ms(),
            orderbook_depth_limit: default_depth_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeAlignmentConfig {
    #[serde(default = "default_allowed_lateness_ms")]
    pub allowed_lateness_ms: i64,
    #[serde(default = "default_max_buffer_ms")]
    pub max_buffer_ms: i64,
}

impl Default for TimeAlignmentConfig {
    fn default() -> Self {
        Self {
            allowed_lateness_ms: default_allowed_lateness_ms(),
            max_buffer_ms: default_max_buffer_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataTrustConfig {
    #[serde(default = "default_window_events")]
    pub window_events: usize,
    #[serde(default = "default_quarantine_untrusted_rate")]
    pub quarantine_untrusted_rate: f64,
    #[serde(default = "default_late_degraded_rate")]
    pub late_degraded_rate: f64,
    #[serde(default = "default_late_untrusted_rate")]
    pub late_untrusted_rate: f64,
    #[serde(default = "default_forced_flush_degraded_rate")]
    pub forced_flush_degraded_rate: f64,
    #[serde(default = "default_forced_flush_untrusted_rate")]
    pub forced_flush_untrusted_rate: f64,
    #[serde(default = "default_buffer_len_degraded")]
    pub buffer_len_degraded: usize,
    #[serde(default = "default_buffer_len_untrusted")]
    pub buffer_len_untrusted: usize,
    #[serde(default = "default_spread_explode_bps")]
    pub spread_explode_bps: f64,
    #[serde(default = "default_fat_finger_degraded_bps")]
    pub fat_finger_degraded_bps: f64,
    #[serde(default = "default_fat_finger_untrusted_bps")]
    pub fat_finger_untrusted_bps: f64,
    #[serde(default = "default_trade_jump_degraded_bps")]
    pub trade_jump_degraded_bps: f64,
}

impl Default for DataTrustConfig {
    fn default() -> Self {
        Self {
            window_events: default_window_events(),
            quarantine_untrusted_rate: default_quarantine_untrusted_rate(),
            late_degraded_rate: default_late_degraded_rate(),
            late_untrusted_rate: default_late_untrusted_rate(),
            forced_flush_degraded_rate: default_forced_flush_degraded_rate(),
            forced_flush_untrusted_rate: default_forced_flush_untrusted_rate(),
            buffer_len_degraded: default_buffer_len_degraded(),
            buffer_len_untrusted: default_buffer_len_untrusted(),
            spread_explode_bps: default_spread_explode_bps(),
            fat_finger_degraded_bps: default_fat_finger_degraded_bps(),
            fat_finger_untrusted_bps: default_fat_finger_untrusted_bps(),
            trade_jump_degraded_bps: default_trade_jump_degraded_bps(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HypothesisConfig {
    #[serde(default = "default_weak_price_diverge_bps")]
    pub weak_price_diverge_bps: f64,
    #[serde(default = "default_invalid_price_diverge_bps")]
    pub invalid_price_diverge_bps: f64,
    #[serde(default = "default_stable_min_duration_ms")]
    pub stable_min_duration_ms: i64,
}

impl Default for HypothesisConfig {
    fn default() -> Self {
        Self {
            weak_price_diverge_bps: default_weak_price_diverge_bps(),
            invalid_price_diverge_bps: default_invalid_price_diverge_bps(),
            stable_min_duration_ms: default_stable_min_duration_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CsvAdapterConfig {
    #[serde(default = "default_replay_speed")]
    pub replay_speed: f64,
    #[serde(default = "default_max_replay_sleep_ms")]
    pub max_replay_sleep_ms: u64,
}

impl Default for CsvAdapterConfig {
    fn default() -> Self {
        Self {
            replay_speed: default_replay_speed(),
            max_replay_sleep_ms: default_max_replay_sleep_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsAdapterConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_open_interest_interval_ms")]
    pub open_interest_interval_ms: u64,
    #[serde(default = "default_depth_snapshot_limit")]
    pub depth_snapshot_limit: u32,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    #[serde(default = "default_rest_url_base")]
    pub rest_url_base: String,
}

impl Default for WsAdapterConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            open_interest_interval_ms: default_open_interest_interval_ms(),
            depth_snapshot_limit: default_depth_snapshot_limit(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            rest_url_base: default_rest_url_base(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdaptersConfig {
    #[serde(default)]
    pub csv: CsvAdapterConfig,
    #[serde(default)]
    pub ws: WsAdapterConfig,
}

/// Top-level, fully validated engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub paths: PathsConfig,
    pub exchange: String,
    pub symbol: String,
    #[serde(default)]
    pub engine: EngineTunables,
    #[serde(default)]
    pub time_alignment: TimeAlignmentConfig,
    #[serde(default)]
    pub data_trust: DataTrustConfig,
    #[serde(default)]
    pub hypothesis: HypothesisConfig,
    #[serde(default)]
    pub adapters: AdaptersConfig,
}

impl EngineConfig {
    /// Load `base.yaml` from `dir`, overlay `experiment.yaml` if present, and
    /// deserialize the merged document. Fails closed: a missing `base.yaml`,
    /// a key with the wrong type, or an absent required field is a fatal
    /// startup error.
    pub fn load(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let base_path = dir.join("base.yaml");
        let experiment_path = dir.join("experiment.yaml");

        let base_raw = std::fs::read_to_string(&base_path)
            .with_context(|| format!("failed to read {}", base_path.display()))?;
        let mut merged: serde_yaml::Value = serde_yaml::from_str(&base_raw)
            .with_context(|| format!("failed to parse {}", base_path.display()))?;

        if experiment_path.exists() {
            let exp_raw = std::fs::read_to_string(&experiment_path)
                .with_context(|| format!("failed to read {}", experiment_path.display()))?;
            let overlay: serde_yaml::Value = serde_yaml::from_str(&exp_raw)
                .with_context(|| format!("failed to parse {}", experiment_path.display()))?;
            merge_yaml(&mut merged, overlay);
        }

        let config: EngineConfig = serde_yaml::from_value(merged).with_context(|| {
            format!(
                "merged config from {} (+ experiment.yaml) failed validation",
                base_path.display()
            )
        })?;

        if config.exchange.trim().is_empty() {
            anyhow::bail!("config error: `exchange` must not be empty");
        }
        if config.symbol.trim().is_empty() {
            anyhow::bail!("config error: `symbol` must not be empty");
        }

        Ok(config)
    }

    pub fn stall_threshold_us(&self, stream: crate::types::Stream) -> i64 {
        use crate::types::Stream;
        let ms = match stream {
            Stream::Trades => self.engine.trades_stall_threshold_ms,
            Stream::Orderbook => self.engine.orderbook_stall_threshold_ms,
            Stream::Liquidations => self.engine.liquidations_stall_threshold_ms,
            Stream::Ticker => self.engine.ticker_stall_threshold_ms,
        };
        ms as i64 * 1_000
    }

    pub fn output_dir(&self, mode: &str) -> PathBuf {
        self.paths.output_root.join(mode)
    }
}

/// Recursively overlay `overlay` onto `base`: scalars and sequences replace
/// in place, maps merge key-by-key so a partial `experiment.yaml` only has
/// to mention the keys it changes.
fn merge_yaml(base: &mut serde_yaml::Value, overlay: serde_yaml::Value) {
    match (base, overlay) {
        (serde_yaml::Value::Mapping(base_map), serde_yaml::Value::Mapping(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(base_value) => merge_yaml(base_value, overlay_value),
                    None => {
                        base_map.insert(key, overlay_value);
                    }
                }
            }
        }
        (base_slot, overlay_value) => {
            *base_slot = overlay_value;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(dir: &Path, name: &str, contents: &str) {
        let mut f = std::fs::File::create(dir.join(name)).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
    }

    #[test]
    fn loads_base_only() {
        let dir = tempfile::tempdir().unwrap();
        write_file(
            dir.path(),
            "base.yaml",
            r#"
paths:
  data_root: /data
  output_root: /out
exchange: binance-futures
symbol: btcusdt
"#,
        );

        let cfg = EngineConfig::load(dir.path()).unwrap();
        assert_eq!(cfg.exchange, "binance-futures");
        assert_eq!(cfg.symbol, "btcusdt");
        assert_eq!(cfg.engine.tick_interval_ms, default_tick_interval_ms());
        assert_eq!(cfg.data_trust.window_events, default_window_events());
    }

    #[test]
    fn experiment_overlay_overrides_only_named_keys() {
        let dir = tempfile::tempdir().unwrap();
        write_file(
            dir.path(),
            "base.yaml",
            r#"
paths:
  data_root: /data
  output_root: /out
exchange: binance-futures
symbol: btcusdt
data_trust:
  window_events: 500
  fat_finger_degraded_bps: 100.0
"#,
        );
        write_file(
            dir.path(),
            "experiment.yaml",
            r#"
data_trust:
  window_events: 250
symbol: ethusdt
"#,
        );

        let cfg = EngineConfig::load(dir.path()).unwrap();
        assert_eq!(cfg.symbol, "ethusdt");
        assert_eq!(cfg.data_trust.window_events, 250);
        // Untouched key from base.yaml survives the overlay.
        assert_eq!(cfg.data_trust.fat_finger_degraded_bps, 100.0);
    }

    #[test]
    fn missing_exchange_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        write_file(
            dir.path(),
            "base.yaml",
            r#"
paths:
  data_root: /data
  output_root: /out
exchange: ""
symbol: btcusdt
"#,
        );
        let err = EngineConfig::load(dir.path()).unwrap_err();
        assert!(err.to_string().contains("exchange"));
    }

    #[test]
    fn missing_base_yaml_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let err = EngineConfig::load(dir.path()).unwrap_err();
        assert!(err.to_string().contains("base.yaml"));
    }

    #[test]
    fn stall_threshold_converts_ms_to_micros() {
        let dir = tempfile::tempdir().unwrap();
        write_file(
            dir.path(),
            "base.yaml",
            r#"
paths:
  data_root: /data
  output_root: /out
exchange: binance-futures
symbol: btcusdt
engine:
  trades_stall_threshold_ms: 30000
"#,
        );
        let cfg = EngineConfig::load(dir.path()).unwrap();
        assert_eq!(
            cfg.stall_threshold_us(crate::types::Stream::Trades),
            30_000_000
        );
    }
}
