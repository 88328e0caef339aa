//! In-memory store with optional YAML seeding

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use super::{ConfigStore, OrderStore};
use crate::types::{
    EntryAutomationConfig, ExchangeCredentials, MarginProtectionConfig, Order, PriceAlertConfig,
    TakeProfitConfig, TradingConfig, UserId,
};

/// Everything stored for one user
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UserRecord {
    pub user_id: UserId,
    pub credentials: Option<ExchangeCredentials>,
    pub margin_protection: Option<MarginProtectionConfig>,
    pub take_profit: Option<TakeProfitConfig>,
    pub entry_automation: Option<EntryAutomationConfig>,
    pub price_alert: Option<PriceAlertConfig>,
    pub orders: Vec<Order>,
}

/// Seed file layout: `users: [UserRecord, ..]`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SeedFile {
    #[serde(default)]
    pub users: Vec<UserRecord>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    users: RwLock<HashMap<UserId, UserRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a YAML seed document
    pub fn from_seed_str(yaml: &str) -> Result<Self> {
        let seed: SeedFile = serde_yaml::from_str(yaml).context("Invalid seed YAML")?;
        let store = Self::new();
        {
            let mut users = store.users.write();
            for record in seed.users {
                if users.contains_key(&record.user_id) {
                    bail!("duplicate user {} in seed", record.user_id);
                }
                users.insert(record.user_id, record);
            }
        }
        Ok(store)
    }

    /// Load users from a YAML seed file
    pub fn from_seed_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read seed file {}", path.display()))?;
        let store = Self::from_seed_str(&raw)
            .with_context(|| format!("Failed to load seed file {}", path.display()))?;
        tracing::info!(path = %path.display(), users = store.user_count(), "Seeded user store");
        Ok(store)
    }

    pub fn user_ids(&self) -> Vec<UserId> {
        let mut ids: Vec<UserId> = self.users.read().keys().copied().collect();
        ids.sort();
        ids
    }

    /// Users that can start a bot, sorted
    pub fn credentialed_user_ids(&self) -> Vec<UserId> {
        let mut ids: Vec<UserId> = self
            .users
            .read()
            .values()
            .filter(|r| r.credentials.is_some())
            .map(|r| r.user_id)
            .collect();
        ids.sort();
        ids
    }

    pub fn user_count(&self) -> usize {
        self.users.read().len()
    }

    fn upsert(&self, user_id: UserId, apply: impl FnOnce(&mut UserRecord)) {
        let mut users = self.users.write();
        let record = users.entry(user_id).or_insert_with(|| UserRecord {
            user_id,
            ..UserRecord::default()
        });
        apply(record);
    }

    pub fn set_credentials(&self, user_id: UserId, credentials: ExchangeCredentials) {
        self.upsert(user_id, |r| r.credentials = Some(credentials));
    }

    pub fn set_margin_protection(&self, user_id: UserId, config: MarginProtectionConfig) {
        self.upsert(user_id, |r| r.margin_protection = Some(config));
    }

    pub fn set_take_profit(&self, user_id: UserId, config: TakeProfitConfig) {
        self.upsert(user_id, |r| r.take_profit = Some(config));
    }

    pub fn set_entry_automation(&self, user_id: UserId, config: EntryAutomationConfig) {
        self.upsert(user_id, |r| r.entry_automation = Some(config));
    }

    pub fn set_price_alert(&self, user_id: UserId, config: PriceAlertConfig) {
        self.upsert(user_id, |r| r.price_alert = Some(config));
    }

    /// All orders of a user regardless of status
    pub fn orders(&self, user_id: UserId) -> Vec<Order> {
        self.users
            .read()
            .get(&user_id)
            .map(|r| r.orders.clone())
            .unwrap_or_default()
    }

    fn update_existing(
        &self,
        user_id: UserId,
        what: &str,
        apply: impl FnOnce(&mut UserRecord) -> bool,
    ) -> Result<()> {
        let mut users = self.users.write();
        let Some(record) = users.get_mut(&user_id) else {
            bail!("no {} config for user {}", what, user_id);
        };
        if !apply(record) {
            bail!("no {} config for user {}", what, user_id);
        }
        Ok(())
    }
}

#[async_trait]
impl ConfigStore for MemoryStore {
    async fn credentials(&self, user_id: UserId) -> Result<Option<ExchangeCredentials>> {
        Ok(self
            .users
            .read()
            .get(&user_id)
            .and_then(|r| r.credentials.clone()))
    }

    async fn trading_config(&self, user_id: UserId) -> Result<TradingConfig> {
        let users = self.users.read();
        let Some(record) = users.get(&user_id) else {
            return Ok(TradingConfig {
                user_id,
                ..TradingConfig::default()
            });
        };
        Ok(TradingConfig {
            user_id,
            margin_protection: record.margin_protection.clone(),
            take_profit: record.take_profit.clone(),
            entry_automation: record.entry_automation.clone(),
            price_alert: record.price_alert.clone(),
            credentials: record.credentials.clone(),
        })
    }

    async fn increment_filled_slots(&self, user_id: UserId) -> Result<()> {
        self.update_existing(user_id, "entry automation", |r| match &mut r.entry_automation {
            Some(entry) => {
                entry.filled_slots += 1;
                true
            }
            None => false,
        })
    }

    async fn touch_take_profit(&self, user_id: UserId, at: DateTime<Utc>) -> Result<()> {
        self.update_existing(user_id, "take profit", |r| match &mut r.take_profit {
            Some(tp) => {
                tp.last_update = at;
                true
            }
            None => false,
        })
    }

    async fn touch_price_alert(&self, user_id: UserId, at: DateTime<Utc>) -> Result<()> {
        self.update_existing(user_id, "price alert", |r| match &mut r.price_alert {
            Some(alert) => {
                alert.last_alert = at;
                true
            }
            None => false,
        })
    }
}

#[async_trait]
impl OrderStore for MemoryStore {
    async fn open_orders(&self, user_id: UserId) -> Result<Vec<Order>> {
        Ok(self
            .users
            .read()
            .get(&user_id)
            .map(|r| r.orders.iter().filter(|o| o.is_open()).cloned().collect())
            .unwrap_or_default())
    }

    async fn save_order(&self, order: Order) -> Result<()> {
        self.upsert(order.user_id, |r| {
            let existing = r.orders.iter().position(|o| o.order_id == order.order_id);
            match existing {
                Some(idx) => r.orders[idx] = order,
                None => r.orders.push(order),
            }
        });
        Ok(())
    }

    async fn update_take_profit(
        &self,
        order_id: &str,
        price: f64,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let mut users = self.users.write();
        let order = users
            .values_mut()
            .flat_map(|r| r.orders.iter_mut())
            .find(|o| o.order_id == order_id)
            .with_context(|| format!("order {} not found", order_id))?;
        order.take_profit_price = Some(price);
        order.updated_at = at;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{OrderSide, OrderStatus};

    const SEED: &str = r#"
users:
  - user_id: 1
    credentials:
      api_key: key
      secret_key: secret
      passphrase: phrase
      is_testnet: true
    entry_automation:
      is_enabled: true
      initial_price: 116000
  - user_id: 2
    price_alert:
      is_enabled: true
"#;

    fn order(user: i64, id: &str, status: OrderStatus) -> Order {
        let now = Utc::now();
        Order {
            user_id: UserId(user),
            order_id: id.to_string(),
            side: OrderSide::Buy,
            amount: 10.0,
            price: 100_000.0,
            leverage: 10.0,
            status,
            take_profit_price: None,
            stop_loss_price: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn seed_fills_defaults() {
        let store = MemoryStore::from_seed_str(SEED).unwrap();
        assert_eq!(store.user_ids(), vec![UserId(1), UserId(2)]);
        assert_eq!(store.credentialed_user_ids(), vec![UserId(1)]);

        let creds = store.credentials(UserId(1)).await.unwrap().unwrap();
        assert!(creds.is_testnet);
        assert!(store.credentials(UserId(2)).await.unwrap().is_none());

        let config = store.trading_config(UserId(1)).await.unwrap();
        let entry = config.entry_automation.unwrap();
        assert!(entry.is_enabled);
        assert_eq!(entry.number_of_orders, 9);
        assert_eq!(entry.margin_per_order, 855);
        assert!(config.margin_protection.is_none());

        let alert = store
            .trading_config(UserId(2))
            .await
            .unwrap()
            .price_alert
            .unwrap();
        assert_eq!(alert.check_interval, 60);
        assert_eq!(alert.min_price, 100_000.0);
    }

    #[test]
    fn example_seed_parses() {
        let store =
            MemoryStore::from_seed_str(include_str!("../../config/users.example.yaml")).unwrap();
        assert_eq!(store.user_ids(), vec![UserId(1)]);
    }

    #[test]
    fn duplicate_seed_users_are_rejected() {
        let yaml = "users:\n  - user_id: 1\n  - user_id: 1\n";
        assert!(MemoryStore::from_seed_str(yaml).is_err());
    }

    #[tokio::test]
    async fn unknown_user_has_empty_config() {
        let store = MemoryStore::new();
        let config = store.trading_config(UserId(9)).await.unwrap();
        assert_eq!(config.user_id, UserId(9));
        assert!(config.price_alert.is_none());
        assert!(store.increment_filled_slots(UserId(9)).await.is_err());
    }

    #[tokio::test]
    async fn open_orders_filter_by_status() {
        let store = MemoryStore::new();
        store.save_order(order(1, "a", OrderStatus::Open)).await.unwrap();
        store.save_order(order(1, "b", OrderStatus::Closed)).await.unwrap();
        store.save_order(order(2, "c", OrderStatus::Open)).await.unwrap();

        let open = store.open_orders(UserId(1)).await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].order_id, "a");
        assert_eq!(store.orders(UserId(1)).len(), 2);
    }

    #[tokio::test]
    async fn update_take_profit_stamps_order() {
        let store = MemoryStore::new();
        store.save_order(order(1, "a", OrderStatus::Open)).await.unwrap();
        let at = Utc::now();
        store.update_take_profit("a", 99_000.0, at).await.unwrap();

        let saved = &store.orders(UserId(1))[0];
        assert_eq!(saved.take_profit_price, Some(99_000.0));
        assert_eq!(saved.updated_at, at);
        assert!(store.update_take_profit("missing", 1.0, at).await.is_err());
    }

    #[tokio::test]
    async fn counters_and_stamps_update_in_place() {
        let store = MemoryStore::new();
        store.set_entry_automation(UserId(1), EntryAutomationConfig::default());
        store.set_price_alert(UserId(1), PriceAlertConfig::default());
        store.set_take_profit(UserId(1), TakeProfitConfig::default());

        store.increment_filled_slots(UserId(1)).await.unwrap();
        store.increment_filled_slots(UserId(1)).await.unwrap();
        let at = Utc::now() + chrono::Duration::seconds(5);
        store.touch_price_alert(UserId(1), at).await.unwrap();
        store.touch_take_profit(UserId(1), at).await.unwrap();

        let config = store.trading_config(UserId(1)).await.unwrap();
        assert_eq!(config.entry_automation.unwrap().filled_slots, 2);
        assert_eq!(config.price_alert.unwrap().last_alert, at);
        assert_eq!(config.take_profit.unwrap().last_update, at);
    }
}
