//! Configuration management for BtcBot
//!
//! Loads from YAML files + environment variables via .env

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::time::Duration;

/// Legacy override for the feed HTTP timeout, in milliseconds
const AGG_HTTP_TIMEOUT_ENV: &str = "AGG_HTTP_TIMEOUT_MS";

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub oracle: OracleConfig,
    pub exchange: ExchangeConfig,
    pub bot: BotConfig,
    pub logging: LoggingConfig,
    pub dashboard: DashboardConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OracleConfig {
    /// Interval between aggregation cycles in milliseconds
    pub poll_interval_ms: u64,
    /// HTTP timeout for every feed request, also the per-cycle deadline
    pub http_timeout_ms: u64,
    /// Buffered snapshots per subscriber before new ones are dropped
    pub subscriber_capacity: usize,
    /// Enable Binance price feed
    pub binance_enabled: bool,
    /// Enable Coinbase price feed
    pub coinbase_enabled: bool,
    /// Enable Kraken price feed
    pub kraken_enabled: bool,
    pub binance_url: String,
    pub coinbase_url: String,
    pub kraken_url: String,
}

impl OracleConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms.max(1))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeConfig {
    /// LN Markets REST endpoint (mainnet)
    pub rest_url: String,
    /// LN Markets REST endpoint (testnet)
    pub testnet_rest_url: String,
    /// LN Markets WebSocket endpoint (mainnet)
    pub ws_url: String,
    /// LN Markets WebSocket endpoint (testnet)
    pub testnet_ws_url: String,
    /// Channel carrying last-price ticks
    pub price_channel: String,
    /// REST request timeout in milliseconds
    pub request_timeout_ms: u64,
    /// WebSocket handshake deadline in milliseconds
    pub connect_timeout_ms: u64,
    /// WebSocket ping interval in seconds
    pub heartbeat_secs: u64,
    /// Reconnect the price stream when the connection drops
    pub reconnect: bool,
    /// Upper bound of the reconnect backoff in seconds
    pub reconnect_max_backoff_secs: u64,
}

impl ExchangeConfig {
    pub fn rest_url_for(&self, is_testnet: bool) -> &str {
        if is_testnet {
            &self.testnet_rest_url
        } else {
            &self.rest_url
        }
    }

    pub fn ws_url_for(&self, is_testnet: bool) -> &str {
        if is_testnet {
            &self.testnet_ws_url
        } else {
            &self.ws_url
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BotConfig {
    /// YAML file with users to load into the in-memory store
    pub seed_file: Option<String>,
    /// Start a bot for every seeded user with credentials
    pub autostart: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Emit JSON log lines instead of the human format
    pub json: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DashboardConfig {
    /// Listen address for the HTTP/WebSocket API
    pub bind: String,
}

impl AppConfig {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self> {
        // Load .env file first
        dotenvy::dotenv().ok();

        let config = Self::builder()?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            // Override with environment variables (BTCBOT__*)
            .add_source(Environment::with_prefix("BTCBOT").separator("__"))
            .build()
            .context("Failed to build configuration")?;

        let mut app_config: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        if let Some(ms) = parse_timeout_override(std::env::var(AGG_HTTP_TIMEOUT_ENV).ok()) {
            app_config.oracle.http_timeout_ms = ms;
        }

        Ok(app_config)
    }

    /// Configuration made of defaults only
    pub fn defaults() -> Result<Self> {
        Self::builder()?
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    fn builder() -> Result<config::ConfigBuilder<config::builder::DefaultState>> {
        let builder = Config::builder()
            // Oracle defaults
            .set_default("oracle.poll_interval_ms", 1000)?
            .set_default("oracle.http_timeout_ms", 1200)?
            .set_default("oracle.subscriber_capacity", 1)?
            .set_default("oracle.binance_enabled", true)?
            .set_default("oracle.coinbase_enabled", true)?
            .set_default("oracle.kraken_enabled", true)?
            .set_default(
                "oracle.binance_url",
                "https://api.binance.com/api/v3/ticker/price?symbol=BTCUSDT",
            )?
            .set_default(
                "oracle.coinbase_url",
                "https://api.coinbase.com/v2/prices/spot?currency=USD",
            )?
            .set_default(
                "oracle.kraken_url",
                "https://api.kraken.com/0/public/Ticker?pair=XBTUSD",
            )?
            // Exchange defaults
            .set_default("exchange.rest_url", "https://api.lnmarkets.com/v2")?
            .set_default(
                "exchange.testnet_rest_url",
                "https://api.testnet4.lnmarkets.com/v2",
            )?
            .set_default("exchange.ws_url", "wss://api.lnmarkets.com")?
            .set_default("exchange.testnet_ws_url", "wss://api.testnet4.lnmarkets.com")?
            .set_default("exchange.price_channel", "futures:btc_usd:last-price")?
            .set_default("exchange.request_timeout_ms", 30_000)?
            .set_default("exchange.connect_timeout_ms", 45_000)?
            .set_default("exchange.heartbeat_secs", 5)?
            .set_default("exchange.reconnect", false)?
            .set_default("exchange.reconnect_max_backoff_secs", 60)?
            // Bot defaults
            .set_default("bot.autostart", false)?
            // Logging defaults
            .set_default("logging.json", false)?
            // Dashboard defaults
            .set_default("dashboard.bind", "127.0.0.1:8080")?;
        Ok(builder)
    }

    /// Generate a digest of the config (without secrets) for logging
    pub fn digest(&self) -> String {
        format!(
            "poll={}ms feed_timeout={}ms feeds=[{}] reconnect={} autostart={} seed={}",
            self.oracle.poll_interval_ms,
            self.oracle.http_timeout_ms,
            self.enabled_feeds().join(","),
            self.exchange.reconnect,
            self.bot.autostart,
            self.bot.seed_file.as_deref().unwrap_or("-"),
        )
    }

    /// Names of the price feeds switched on
    pub fn enabled_feeds(&self) -> Vec<&'static str> {
        let mut feeds = Vec::new();
        if self.oracle.binance_enabled {
            feeds.push("binance");
        }
        if self.oracle.coinbase_enabled {
            feeds.push("coinbase");
        }
        if self.oracle.kraken_enabled {
            feeds.push("kraken");
        }
        feeds
    }
}

impl std::fmt::Display for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.digest())
    }
}

/// Only strictly positive integers override the configured timeout
fn parse_timeout_override(raw: Option<String>) -> Option<u64> {
    raw?.trim().parse::<u64>().ok().filter(|ms| *ms > 0)
}
