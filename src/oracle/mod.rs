//! Oracle module - Multi-source price aggregation
//!
//! Polls Binance, Coinbase and Kraken and produces one averaged BTC/USD
//! snapshot stream with non-blocking fan-out to subscribers.

mod aggregator;
mod hub;
pub mod sources;

pub use aggregator::{aggregate, FeedResult, PriceAggregator};
pub use hub::{BroadcastHub, Subscription};
pub use sources::PriceFeed;
