//! Exchange module - LN Markets futures account and price stream
//!
//! Defines the narrow contracts the bots need from an exchange:
//! - `ExchangeClient`: order placement and take-profit/stop-loss adjustments
//! - `PriceStream`: push-style last-price ticks over a live connection
//! - `Connector`: builds both for one user's credentials

mod rest;
mod websocket;

pub use rest::LnMarketsClient;
pub use websocket::LnMarketsPriceStream;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::ExchangeConfig;
use crate::types::{ExchangeCredentials, OrderSide, PriceTick};

/// New futures position request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TradeRequest {
    #[serde(rename = "type")]
    pub side: OrderSide,
    pub amount: f64,
    pub price: f64,
    pub leverage: f64,
}

/// Position as reported by the exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeResponse {
    pub id: String,
    #[serde(rename = "type")]
    pub side: OrderSide,
    pub amount: f64,
    pub price: f64,
    pub leverage: f64,
    pub status: String,
}

/// Account balance summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountBalance {
    pub id: String,
    pub balance: f64,
    #[serde(default)]
    pub currency: String,
}

/// Which positions to list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PositionFilter {
    #[default]
    Running,
    Open,
    Closed,
}

impl PositionFilter {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionFilter::Running => "running",
            PositionFilter::Open => "open",
            PositionFilter::Closed => "closed",
        }
    }
}

/// Futures account operations used by the rules
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    /// Open a position; the response carries the exchange order id
    async fn create_order(&self, request: &TradeRequest) -> Result<TradeResponse>;

    async fn update_take_profit(&self, order_id: &str, price: f64) -> Result<()>;

    async fn update_stop_loss(&self, order_id: &str, price: f64) -> Result<()>;

    async fn close_order(&self, order_id: &str) -> Result<()>;

    async fn balance(&self) -> Result<AccountBalance>;

    async fn positions(&self, filter: PositionFilter) -> Result<Vec<TradeResponse>>;
}

/// Callback invoked for every tick received on a subscribed channel
pub type TickHandler = Box<dyn Fn(PriceTick) + Send + Sync>;

/// Live price connection delivering ticks through a callback.
///
/// When the connection ends for good the implementation drops its handler,
/// which is how consumers observe the disconnect.
#[async_trait]
pub trait PriceStream: Send + Sync {
    async fn connect(&mut self) -> Result<()>;

    async fn subscribe(&mut self, channel: &str) -> Result<()>;

    fn on_tick(&mut self, handler: TickHandler);

    async fn disconnect(&mut self) -> Result<()>;
}

/// Builds the per-user exchange collaborators
pub trait Connector: Send + Sync {
    fn exchange(&self, credentials: &ExchangeCredentials) -> Result<Arc<dyn ExchangeClient>>;

    fn price_stream(&self, credentials: &ExchangeCredentials) -> Box<dyn PriceStream>;

    /// Channel carrying the last-price ticks
    fn price_channel(&self) -> &str;
}

/// Connector for LN Markets mainnet/testnet
#[derive(Debug, Clone)]
pub struct LnMarketsConnector {
    config: ExchangeConfig,
}

impl LnMarketsConnector {
    pub fn new(config: ExchangeConfig) -> Self {
        Self { config }
    }
}

impl Connector for LnMarketsConnector {
    fn exchange(&self, credentials: &ExchangeCredentials) -> Result<Arc<dyn ExchangeClient>> {
        let client = LnMarketsClient::new(
            self.config.rest_url_for(credentials.is_testnet),
            credentials.clone(),
            std::time::Duration::from_millis(self.config.request_timeout_ms),
        )?;
        Ok(Arc::new(client))
    }

    fn price_stream(&self, credentials: &ExchangeCredentials) -> Box<dyn PriceStream> {
        Box::new(LnMarketsPriceStream::new(
            self.config.ws_url_for(credentials.is_testnet),
            &self.config,
        ))
    }

    fn price_channel(&self) -> &str {
        &self.config.price_channel
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trade_request_uses_type_field() {
        let req = TradeRequest {
            side: OrderSide::Buy,
            amount: 10.0,
            price: 116_020.0,
            leverage: 10.0,
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["type"], "buy");
        assert_eq!(json["leverage"], 10.0);
    }

    #[test]
    fn trade_response_accepts_short_side_codes() {
        let resp: TradeResponse = serde_json::from_str(
            r#"{"id":"t-1","type":"b","amount":10,"price":116020,"leverage":10,"status":"open"}"#,
        )
        .unwrap();
        assert_eq!(resp.side, OrderSide::Buy);
        assert_eq!(resp.id, "t-1");
    }

    #[test]
    fn connector_picks_testnet_endpoints() {
        let config = crate::config::AppConfig::defaults().unwrap().exchange;
        let connector = LnMarketsConnector::new(config);
        let creds = ExchangeCredentials {
            api_key: "k".into(),
            secret_key: "s".into(),
            passphrase: "p".into(),
            is_testnet: true,
        };
        assert!(connector.exchange(&creds).is_ok());
        assert_eq!(connector.price_channel(), "futures:btc_usd:last-price");
    }
}
