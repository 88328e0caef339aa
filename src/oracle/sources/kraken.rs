//! Kraken public ticker feed
//!
//! Polls the XBTUSD ticker; the last trade price is the first element of `c`.

use anyhow::{bail, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;

use super::{get_json, parse_decimal, PriceFeed};

const NAME: &str = "kraken";

#[derive(Debug, Clone, Deserialize)]
struct TickerResponse {
    #[serde(default)]
    result: HashMap<String, PairTicker>,
}

#[derive(Debug, Clone, Deserialize)]
struct PairTicker {
    /// Last trade closed: [price, lot volume]
    #[serde(default)]
    c: Vec<String>,
}

impl TickerResponse {
    fn into_price(self) -> Result<f64> {
        match self.result.values().find_map(|pair| pair.c.first()) {
            Some(last) => parse_decimal(last, NAME),
            None => bail!("kraken malformed"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct KrakenFeed {
    client: Client,
    url: String,
}

impl KrakenFeed {
    pub fn new(client: Client, url: &str) -> Self {
        Self {
            client,
            url: url.to_string(),
        }
    }
}

#[async_trait]
impl PriceFeed for KrakenFeed {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn fetch_price(&self) -> Result<f64> {
        let payload: TickerResponse = get_json(&self.client, &self.url, NAME).await?;
        payload.into_price()
    }
}
