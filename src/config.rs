use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;

use crate::exchange::DEFAULT_LATEST_ORDERS_LIMIT;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub exchange: ExchangeConfig,
    #[serde(default)]
    pub markets: MarketsConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub reconciliation: ReconciliationConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub dry_run: DryRunConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeConfig {
    /// REST API endpoint
    pub rest_url: String,
    #[serde(default)]
    pub api_key: String,
    /// Hex-encoded HMAC secret
    #[serde(default)]
    pub api_secret: String,
    /// Subaccount all orders are placed on
    #[serde(default = "default_subaccount_id")]
    pub subaccount_id: u64,
    /// Maximum retry attempts for transient failures
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_subaccount_id() -> u64 {
    1
}

fn default_max_retries() -> u32 {
    3
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

#[derive(Debug, Clone, Deserialize)]
pub struct MarketsConfig {
    /// Path to the market catalogue (JSON, `result.markets[]`)
    #[serde(default = "default_catalogue_path")]
    pub catalogue_path: String,
}

fn default_catalogue_path() -> String {
    "markets.json".to_string()
}

impl Default for MarketsConfig {
    fn default() -> Self {
        Self {
            catalogue_path: default_catalogue_path(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL. Without one the engine keeps state in memory.
    #[serde(default)]
    pub url: Option<String>,
    /// Maximum connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: default_max_connections(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Upper bound on concurrently executing strategy ticks
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    /// Pause between strategy ticks in milliseconds
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
}

fn default_max_workers() -> usize {
    10
}

fn default_tick_interval_ms() -> u64 {
    100
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            tick_interval_ms: default_tick_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReconciliationConfig {
    #[serde(default = "default_reconcile_interval_ms")]
    pub interval_ms: u64,
    /// How many recent exchange orders each pass pulls
    #[serde(default = "default_latest_orders_limit")]
    pub latest_orders_limit: u32,
    /// Consecutive passes a live order may be absent before it is closed out
    #[serde(default = "default_missing_threshold")]
    pub missing_threshold: u32,
    /// Age after which an unacknowledged pending order is rejected
    #[serde(default = "default_pending_timeout_secs")]
    pub pending_timeout_secs: u64,
}

fn default_reconcile_interval_ms() -> u64 {
    1000
}

fn default_latest_orders_limit() -> u32 {
    DEFAULT_LATEST_ORDERS_LIMIT
}

fn default_missing_threshold() -> u32 {
    3
}

fn default_pending_timeout_secs() -> u64 {
    300
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_reconcile_interval_ms(),
            latest_orders_limit: default_latest_orders_limit(),
            missing_threshold: default_missing_threshold(),
            pending_timeout_secs: default_pending_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_bind")]
    pub bind: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_api_bind() -> String {
    "127.0.0.1:8000".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind: default_api_bind(),
            enabled: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct DryRunConfig {
    /// Route orders to the in-process paper exchange instead of the venue
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            // Start with default values
            .set_default("exchange.rest_url", "https://api.cube.exchange/os/v0")?
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            .set_default("dry_run.enabled", false)?
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Load environment-specific config (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("TRANCHE_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (TRANCHE_EXCHANGE__API_KEY, etc.)
            .add_source(
                Environment::with_prefix("TRANCHE")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Configuration for local runs against the paper exchange
    pub fn default_config(dry_run: bool) -> Self {
        Self {
            exchange: ExchangeConfig {
                rest_url: "https://api.cube.exchange/os/v0".to_string(),
                api_key: String::new(),
                api_secret: String::new(),
                subaccount_id: default_subaccount_id(),
                max_retries: default_max_retries(),
                request_timeout_ms: default_request_timeout_ms(),
            },
            markets: MarketsConfig::default(),
            database: DatabaseConfig::default(),
            scheduler: SchedulerConfig::default(),
            reconciliation: ReconciliationConfig::default(),
            api: ApiConfig::default(),
            dry_run: DryRunConfig { enabled: dry_run },
            logging: LoggingConfig::default(),
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if !self.dry_run.enabled {
            if self.exchange.api_key.is_empty() {
                errors.push("exchange.api_key is required unless dry_run is enabled".to_string());
            }
            if hex::decode(&self.exchange.api_secret).map_or(true, |s| s.is_empty()) {
                errors.push("exchange.api_secret must be a non-empty hex string".to_string());
            }
        }

        if self.scheduler.max_workers == 0 {
            errors.push("scheduler.max_workers must be at least 1".to_string());
        }

        if self.scheduler.tick_interval_ms == 0 {
            errors.push("scheduler.tick_interval_ms must be positive".to_string());
        }

        if self.reconciliation.interval_ms == 0 {
            errors.push("reconciliation.interval_ms must be positive".to_string());
        }

        if self.reconciliation.missing_threshold == 0 {
            errors.push("reconciliation.missing_threshold must be at least 1".to_string());
        }

        if self.api.enabled && self.api.bind.parse::<std::net::SocketAddr>().is_err() {
            errors.push(format!("api.bind is not a socket address: {}", self.api.bind));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
