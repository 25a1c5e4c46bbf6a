//! Layered configuration loading utilities.
//!
//! Sources, lowest to highest precedence: `config/default.toml`, an
//! optional `config/{environment}.toml`, `config/local.toml`, then
//! environment variables prefixed `VOLTRA_` (double underscore as the
//! section separator). Every field has a serde default so a partial file
//! (or none at all past the required default layer) still deserializes.

use std::path::Path;

use config::{Config, Environment, File};
use serde::Deserialize;

use voltra_domain::DailyLimits;
use voltra_execution::ExecutionConfig;
use voltra_greeks::RiskThresholds;
use voltra_hedging::{GammaScalpConfig, HedgingConfig};
use voltra_services::{LiquidityConfig, OptionSelectorConfig, SizingConfig};

/// One trading-session window (`HH:MM` local). Overnight spans
/// (`start > end`) wrap midnight.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct SessionWindow {
    pub start: String,
    pub end: String,
}

/// Supervisor/worker runtime knobs.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Empty means trade around the clock.
    pub trading_sessions: Vec<SessionWindow>,
    pub max_restart_count: u32,
    pub restart_base_delay_seconds: f64,
    pub restart_max_delay_seconds: f64,
    pub restart_reset_hours: f64,
    pub gateway_connect_timeout_seconds: f64,
    pub database_connect_timeout_seconds: f64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            trading_sessions: Vec::new(),
            max_restart_count: 10,
            restart_base_delay_seconds: 5.0,
            restart_max_delay_seconds: 300.0,
            restart_reset_hours: 1.0,
            gateway_connect_timeout_seconds: 60.0,
            database_connect_timeout_seconds: 5.0,
        }
    }
}

/// When and how parent orders are handed to the advanced order scheduler.
#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(default)]
pub struct AdvancedOrderPolicy {
    pub enabled: bool,
    /// Parent volumes at or above this go through the scheduler.
    pub iceberg_threshold: i64,
    pub batch_size: i64,
}

impl Default for AdvancedOrderPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            iceberg_threshold: 10,
            batch_size: 5,
        }
    }
}

/// Persistence cadence settings.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct PersistenceSettings {
    pub auto_save_interval_seconds: f64,
    pub keep_days: i64,
}

impl Default for PersistenceSettings {
    fn default() -> Self {
        Self {
            auto_save_interval_seconds: 60.0,
            keep_days: 7,
        }
    }
}

/// Risk-policy settings beyond the raw thresholds.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct RiskPolicy {
    pub thresholds: RiskThresholds,
    /// Refuse new opens while the portfolio is outside its limits.
    pub block_opens_on_breach: bool,
}

impl Default for RiskPolicy {
    fn default() -> Self {
        Self {
            thresholds: RiskThresholds::default(),
            block_opens_on_breach: true,
        }
    }
}

/// Root application configuration.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub strategy_name: String,
    /// Named strategy instance (timeframe variant); scopes snapshots and
    /// monitor rows.
    pub variant: String,
    pub instance_id: String,
    pub log_level: String,
    /// Which gateway implementation the worker wires in (`sim` in-repo;
    /// broker connectors are provided externally).
    pub gateway_driver: String,
    /// Products the engine trades (e.g. `["rb", "MA"]`).
    pub products: Vec<String>,
    /// Window size in minutes; 1 bypasses the bar pipeline.
    pub bar_window: u32,
    /// Bars required before indicators are trusted.
    pub min_history_len: usize,
    /// Maximum bars buffered inside the pipeline before the oldest are
    /// dropped as stale.
    pub max_buffered_bars: usize,
    pub risk: RiskPolicy,
    pub limits: DailyLimits,
    pub sizing: SizingConfig,
    pub execution: ExecutionConfig,
    pub advanced_orders: AdvancedOrderPolicy,
    pub liquidity: LiquidityConfig,
    pub option_selector: OptionSelectorConfig,
    pub hedging: HedgingConfig,
    pub gamma_scalp: GammaScalpConfig,
    pub persistence: PersistenceSettings,
    pub runtime: RuntimeConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            strategy_name: "VolStrategy".into(),
            variant: "default".into(),
            instance_id: "default".into(),
            log_level: "info".into(),
            gateway_driver: "sim".into(),
            products: Vec::new(),
            bar_window: 15,
            min_history_len: 60,
            max_buffered_bars: 512,
            risk: RiskPolicy::default(),
            limits: DailyLimits::default(),
            sizing: SizingConfig::default(),
            execution: ExecutionConfig::default(),
            advanced_orders: AdvancedOrderPolicy::default(),
            liquidity: LiquidityConfig::default(),
            option_selector: OptionSelectorConfig::default(),
            hedging: HedgingConfig::default(),
            gamma_scalp: GammaScalpConfig::default(),
            persistence: PersistenceSettings::default(),
            runtime: RuntimeConfig::default(),
        }
    }
}

/// Load configuration by merging files and environment variables.
pub fn load_config(environment: Option<&str>) -> Result<AppConfig, config::ConfigError> {
    let base_path = Path::new("config");

    let mut builder =
        Config::builder().add_source(File::from(base_path.join("default.toml")).required(false));
    if let Some(name) = environment {
        builder =
            builder.add_source(File::from(base_path.join(format!("{name}.toml"))).required(false));
    }
    builder = builder.add_source(File::from(base_path.join("local.toml")).required(false));
    builder = builder.add_source(
        Environment::with_prefix("VOLTRA")
            .separator("__")
            .ignore_empty(true),
    );

    builder.build()?.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_every_field() {
        let config = AppConfig::default();
        assert_eq!(config.bar_window, 15);
        assert_eq!(config.runtime.max_restart_count, 10);
        assert!(config.risk.block_opens_on_breach);
        assert_eq!(config.persistence.keep_days, 7);
        assert_eq!(config.limits.contract_daily_limit, 2);
    }

    #[test]
    fn partial_json_deserializes_over_defaults() {
        let raw = r#"{
            "strategy_name": "VolStrategy15m",
            "variant": "15m",
            "products": ["rb"],
            "runtime": { "max_restart_count": 3 }
        }"#;
        let config: AppConfig = serde_json::from_str(raw).unwrap();
        assert_eq!(config.strategy_name, "VolStrategy15m");
        assert_eq!(config.products, vec!["rb".to_string()]);
        assert_eq!(config.runtime.max_restart_count, 3);
        // Untouched sections keep their defaults.
        assert_eq!(config.runtime.restart_base_delay_seconds, 5.0);
        assert_eq!(config.bar_window, 15);
    }

    #[test]
    fn session_windows_deserialize() {
        let raw = r#"{
            "runtime": {
                "trading_sessions": [
                    {"start": "09:00", "end": "15:00"},
                    {"start": "21:00", "end": "02:30"}
                ]
            }
        }"#;
        let config: AppConfig = serde_json::from_str(raw).unwrap();
        assert_eq!(config.runtime.trading_sessions.len(), 2);
        assert_eq!(config.runtime.trading_sessions[1].start, "21:00");
    }

    #[test]
    fn loads_without_any_files_present() {
        let config = load_config(None).unwrap();
        assert_eq!(config.strategy_name, "VolStrategy");
    }
}
