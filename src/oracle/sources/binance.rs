//! Binance spot ticker feed
//!
//! Polls the public ticker endpoint for the BTCUSDT last price.

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use super::{get_json, parse_decimal, PriceFeed};

const NAME: &str = "binance";

#[derive(Debug, Clone, Deserialize)]
struct TickerPrice {
    price: String,
}

impl TickerPrice {
    fn into_price(self) -> Result<f64> {
        parse_decimal(&self.price, NAME)
    }
}

#[derive(Debug, Clone)]
pub struct BinanceFeed {
    client: Client,
    url: String,
}

impl BinanceFeed {
    pub fn new(client: Client, url: &str) -> Self {
        Self {
            client,
            url: url.to_string(),
        }
    }
}

#[async_trait]
impl PriceFeed for BinanceFeed {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn fetch_price(&self) -> Result<f64> {
        let payload: TickerPrice = get_json(&self.client, &self.url, NAME).await?;
        payload.into_price()
    }
}
