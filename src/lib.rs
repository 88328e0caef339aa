//! BtcBot Library
//!
//! Multi-feed BTC price aggregation and per-user automation bots for
//! LN Markets futures.

pub mod bot;
pub mod config;
pub mod error;
pub mod exchange;
pub mod oracle;
pub mod rules;
pub mod store;
pub mod types;

#[cfg(feature = "dashboard")]
pub mod dashboard;

pub use error::BotError;
