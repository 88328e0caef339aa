//! Coinbase spot price feed
//!
//! Polls the v2 spot price endpoint for BTC in USD.

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use super::{get_json, parse_decimal, PriceFeed};

const NAME: &str = "coinbase";

#[derive(Debug, Clone, Deserialize)]
struct SpotResponse {
    data: SpotData,
}

#[derive(Debug, Clone, Deserialize)]
struct SpotData {
    amount: String,
}

impl SpotResponse {
    fn into_price(self) -> Result<f64> {
        parse_decimal(&self.data.amount, NAME)
    }
}

#[derive(Debug, Clone)]
pub struct CoinbaseFeed {
    client: Client,
    url: String,
}

impl CoinbaseFeed {
    pub fn new(client: Client, url: &str) -> Self {
        Self {
            client,
            url: url.to_string(),
        }
    }
}

#[async_trait]
impl PriceFeed for CoinbaseFeed {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn fetch_price(&self) -> Result<f64> {
        let payload: SpotResponse = get_json(&self.client, &self.url, NAME).await?;
        payload.into_price()
    }
}
