//! Persistence contracts for per-user configuration and orders
//!
//! The rules read a fresh `TradingConfig` every tick and write back through
//! these traits. `MemoryStore` is the in-process implementation.

mod memory;

pub use memory::{MemoryStore, SeedFile, UserRecord};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::types::{ExchangeCredentials, Order, TradingConfig, UserId};

/// Per-user rule configuration and credentials
#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn credentials(&self, user_id: UserId) -> Result<Option<ExchangeCredentials>>;

    /// Snapshot of all rule configs; absent kinds are `None`
    async fn trading_config(&self, user_id: UserId) -> Result<TradingConfig>;

    /// Advance the entry grid by one slot
    async fn increment_filled_slots(&self, user_id: UserId) -> Result<()>;

    /// Stamp the take-profit ratchet's `last_update`
    async fn touch_take_profit(&self, user_id: UserId, at: DateTime<Utc>) -> Result<()>;

    /// Stamp the price alert's `last_alert`
    async fn touch_price_alert(&self, user_id: UserId, at: DateTime<Utc>) -> Result<()>;
}

/// Orders opened by entry automation
#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn open_orders(&self, user_id: UserId) -> Result<Vec<Order>>;

    async fn save_order(&self, order: Order) -> Result<()>;

    async fn update_take_profit(&self, order_id: &str, price: f64, at: DateTime<Utc>)
        -> Result<()>;
}

/// Both stores behind one handle
pub trait TradingStore: ConfigStore + OrderStore {}

impl<T: ConfigStore + OrderStore> TradingStore for T {}
