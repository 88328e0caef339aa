//! Core types used throughout BtcBot
//!
//! Prices, ticks, orders and the per-user rule configurations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Identifier of a user owning a bot
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for UserId {
    fn from(id: i64) -> Self {
        UserId(id)
    }
}

/// One aggregated price observation.
///
/// A zero `timestamp` means "no data yet"; published snapshots always carry
/// at least one entry in `sources`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PriceSnapshot {
    pub price: f64,
    /// Unix epoch milliseconds
    pub timestamp: i64,
    pub sources: HashMap<String, f64>,
}

impl PriceSnapshot {
    pub fn is_empty(&self) -> bool {
        self.timestamp == 0
    }
}

/// Single price update delivered to a bot instance
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceTick {
    pub price: f64,
    /// Exchange time in Unix milliseconds
    #[serde(default)]
    pub time: i64,
}

/// Trade direction on the futures market
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    #[serde(alias = "b", alias = "long")]
    Buy,
    #[serde(alias = "s", alias = "short")]
    Sell,
}

impl Default for OrderSide {
    fn default() -> Self {
        OrderSide::Buy
    }
}

impl OrderSide {
    /// Wire code used by LN Markets (`b` / `s`)
    pub fn code(&self) -> &'static str {
        match self {
            OrderSide::Buy => "b",
            OrderSide::Sell => "s",
        }
    }

    /// Parse from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "buy" | "b" | "long" => Some(OrderSide::Buy),
            "sell" | "s" | "short" => Some(OrderSide::Sell),
            _ => None,
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "buy"),
            OrderSide::Sell => write!(f, "sell"),
        }
    }
}

/// Lifecycle of a persisted order. Transitions are advisory; closing
/// happens on the exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Open,
    Running,
    Closed,
    Canceled,
    /// Status the exchange reported that we do not recognise; never open
    #[serde(other)]
    Unknown,
}

impl OrderStatus {
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "open" => OrderStatus::Open,
            "running" => OrderStatus::Running,
            "closed" => OrderStatus::Closed,
            "canceled" | "cancelled" => OrderStatus::Canceled,
            _ => OrderStatus::Unknown,
        }
    }
}

/// Position opened by entry automation and adjusted by the protection rules
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub user_id: UserId,
    /// Exchange-assigned identifier
    pub order_id: String,
    pub side: OrderSide,
    pub amount: f64,
    pub price: f64,
    pub leverage: f64,
    pub status: OrderStatus,
    pub take_profit_price: Option<f64>,
    pub stop_loss_price: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn is_open(&self) -> bool {
        self.status == OrderStatus::Open
    }

    /// Price at which the leveraged position is force-closed
    pub fn liquidation_price(&self) -> f64 {
        self.price * (1.0 - self.leverage / 100.0)
    }
}

/// API credentials for the user's exchange account
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct ExchangeCredentials {
    pub api_key: String,
    pub secret_key: String,
    pub passphrase: String,
    #[serde(default)]
    pub is_testnet: bool,
}

impl fmt::Debug for ExchangeCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExchangeCredentials")
            .field("api_key", &"***")
            .field("is_testnet", &self.is_testnet)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarginProtectionConfig {
    pub is_enabled: bool,
    /// Distance to liquidation (percent) at which protection kicks in
    pub activation_distance: f64,
    /// Distance above liquidation (percent) for the protective take-profit
    pub new_liquidation_distance: f64,
}

impl Default for MarginProtectionConfig {
    fn default() -> Self {
        Self {
            is_enabled: false,
            activation_distance: 5.0,
            new_liquidation_distance: 10.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TakeProfitConfig {
    pub is_enabled: bool,
    pub daily_percentage: f64,
    pub last_update: DateTime<Utc>,
}

impl Default for TakeProfitConfig {
    fn default() -> Self {
        Self {
            is_enabled: false,
            daily_percentage: 1.0,
            last_update: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EntryAutomationConfig {
    pub is_enabled: bool,
    pub amount_per_order: f64,
    pub margin_per_order: i64,
    pub number_of_orders: u32,
    pub filled_slots: u32,
    pub price_variation: f64,
    pub initial_price: f64,
    /// Take-profit distance per order in percent
    pub take_profit_per_order: f64,
    pub operation_type: OrderSide,
    pub leverage: f64,
}

impl Default for EntryAutomationConfig {
    fn default() -> Self {
        Self {
            is_enabled: false,
            amount_per_order: 10.0,
            margin_per_order: 855,
            number_of_orders: 9,
            filled_slots: 0,
            price_variation: 50.0,
            initial_price: 116_000.0,
            take_profit_per_order: 0.25,
            operation_type: OrderSide::Buy,
            leverage: 10.0,
        }
    }
}

impl EntryAutomationConfig {
    /// Target price of the next unfilled slot
    pub fn next_target(&self) -> f64 {
        self.initial_price + f64::from(self.filled_slots) * self.price_variation
    }

    pub fn is_exhausted(&self) -> bool {
        self.filled_slots >= self.number_of_orders
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PriceAlertConfig {
    pub is_enabled: bool,
    pub min_price: f64,
    pub max_price: f64,
    /// Minimum seconds between two alerts
    pub check_interval: i64,
    pub last_alert: DateTime<Utc>,
}

impl Default for PriceAlertConfig {
    fn default() -> Self {
        Self {
            is_enabled: false,
            min_price: 100_000.0,
            max_price: 120_000.0,
            check_interval: 60,
            last_alert: Utc::now(),
        }
    }
}

/// Snapshot of everything the rules need for one tick
#[derive(Debug, Clone, Default)]
pub struct TradingConfig {
    pub user_id: UserId,
    pub margin_protection: Option<MarginProtectionConfig>,
    pub take_profit: Option<TakeProfitConfig>,
    pub entry_automation: Option<EntryAutomationConfig>,
    pub price_alert: Option<PriceAlertConfig>,
    pub credentials: Option<ExchangeCredentials>,
}

/// Read-only view of a bot for status queries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BotStatus {
    pub user_id: UserId,
    pub is_running: bool,
    pub last_price: Option<f64>,
    pub last_update: Option<DateTime<Utc>>,
}

impl BotStatus {
    pub fn stopped(user_id: UserId) -> Self {
        Self {
            user_id,
            is_running: false,
            last_price: None,
            last_update: None,
        }
    }
}

/// Fired when the price leaves a user's configured range
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    pub user_id: UserId,
    pub price: f64,
    pub min_price: f64,
    pub max_price: f64,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn liquidation_price_uses_leverage_percent() {
        let now = Utc::now();
        let order = Order {
            user_id: UserId(1),
            order_id: "abc".to_string(),
            side: OrderSide::Buy,
            amount: 10.0,
            price: 100_000.0,
            leverage: 10.0,
            status: OrderStatus::Open,
            take_profit_price: None,
            stop_loss_price: None,
            created_at: now,
            updated_at: now,
        };
        assert!((order.liquidation_price() - 90_000.0).abs() < 1e-9);
    }

    #[test]
    fn entry_target_advances_per_slot() {
        let mut cfg = EntryAutomationConfig::default();
        assert_eq!(cfg.next_target(), 116_000.0);
        cfg.filled_slots = 3;
        assert_eq!(cfg.next_target(), 116_150.0);
        cfg.filled_slots = cfg.number_of_orders;
        assert!(cfg.is_exhausted());
    }

    #[test]
    fn side_parses_aliases() {
        assert_eq!(OrderSide::from_str("BUY"), Some(OrderSide::Buy));
        assert_eq!(OrderSide::from_str("s"), Some(OrderSide::Sell));
        assert_eq!(OrderSide::from_str("hold"), None);
    }

    #[test]
    fn unrecognised_status_is_not_open() {
        assert_eq!(OrderStatus::from_str("Open"), OrderStatus::Open);
        assert_eq!(OrderStatus::from_str("cancelled"), OrderStatus::Canceled);
        assert_eq!(OrderStatus::from_str("pending"), OrderStatus::Unknown);

        let stored: OrderStatus = serde_json::from_str("\"pending\"").unwrap();
        assert_eq!(stored, OrderStatus::Unknown);

        let now = Utc::now();
        let order = Order {
            user_id: UserId(1),
            order_id: "abc".to_string(),
            side: OrderSide::Buy,
            amount: 10.0,
            price: 100_000.0,
            leverage: 10.0,
            status: OrderStatus::from_str("pending"),
            take_profit_price: None,
            stop_loss_price: None,
            created_at: now,
            updated_at: now,
        };
        assert!(!order.is_open());
    }

    #[test]
    fn credentials_debug_hides_secrets() {
        let creds = ExchangeCredentials {
            api_key: "key".into(),
            secret_key: "secret".into(),
            passphrase: "pass".into(),
            is_testnet: true,
        };
        let printed = format!("{:?}", creds);
        assert!(!printed.contains("secret"));
        assert!(!printed.contains("pass\""));
    }

    #[test]
    fn zero_timestamp_snapshot_is_empty() {
        assert!(PriceSnapshot::default().is_empty());
    }
}
