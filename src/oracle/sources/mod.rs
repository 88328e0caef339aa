//! Price feed implementations (Binance, Coinbase, Kraken)

mod binance;
mod coinbase;
mod kraken;

pub use binance::BinanceFeed;
pub use coinbase::CoinbaseFeed;
pub use kraken::KrakenFeed;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use reqwest::Client;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;

use crate::config::OracleConfig;

const FEED_USER_AGENT: &str = "btc-trading-bot/1.0";

/// A source that returns one BTC/USD price per call or fails.
///
/// Callers bound every call with their own deadline.
#[async_trait]
pub trait PriceFeed: Send + Sync {
    /// Name used as the key in snapshot `sources`
    fn name(&self) -> &'static str;

    /// Fetch the current price
    async fn fetch_price(&self) -> Result<f64>;
}

/// Shared HTTP client for all feeds, with the per-request timeout applied
pub fn feed_http_client(timeout: Duration) -> Result<Client> {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(FEED_USER_AGENT));

    Client::builder()
        .timeout(timeout)
        .pool_max_idle_per_host(10)
        .pool_idle_timeout(Duration::from_secs(30))
        .default_headers(headers)
        .build()
        .context("Failed to create feed HTTP client")
}

/// Build the feeds enabled in `config`, sharing one HTTP client
pub fn build_feeds(config: &OracleConfig) -> Result<Vec<Arc<dyn PriceFeed>>> {
    let client = feed_http_client(config.http_timeout())?;
    let mut feeds: Vec<Arc<dyn PriceFeed>> = Vec::new();

    if config.binance_enabled {
        feeds.push(Arc::new(BinanceFeed::new(client.clone(), &config.binance_url)));
    }
    if config.coinbase_enabled {
        feeds.push(Arc::new(CoinbaseFeed::new(
            client.clone(),
            &config.coinbase_url,
        )));
    }
    if config.kraken_enabled {
        feeds.push(Arc::new(KrakenFeed::new(client, &config.kraken_url)));
    }

    Ok(feeds)
}

/// GET `url` and decode the JSON body, failing on any non-success status
async fn get_json<T: DeserializeOwned>(client: &Client, url: &str, feed: &str) -> Result<T> {
    let response = client
        .get(url)
        .send()
        .await
        .with_context(|| format!("Failed to reach {}", feed))?;

    if !response.status().is_success() {
        bail!("{} non-success status: {}", feed, response.status());
    }

    response
        .json::<T>()
        .await
        .with_context(|| format!("Failed to parse {} payload", feed))
}

/// Exchanges quote prices as decimal strings
fn parse_decimal(raw: &str, feed: &str) -> Result<f64> {
    let price = raw
        .trim()
        .parse::<f64>()
        .with_context(|| format!("{} returned a non-numeric price: {:?}", feed, raw))?;
    if !price.is_finite() {
        bail!("{} returned a non-finite price", feed);
    }
    Ok(price)
}
