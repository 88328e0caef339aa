//! Dashboard Module
//!
//! HTTP/WebSocket surface for the price feed and bot control.
//! Only compiled when the `dashboard` feature is enabled.

mod api;
mod types;

pub use api::create_router;
pub use types::*;

use std::sync::Arc;

use crate::bot::BotSupervisor;
use crate::oracle::PriceAggregator;

/// Shared handler state
#[derive(Clone)]
pub struct DashboardState {
    pub aggregator: Arc<PriceAggregator>,
    pub supervisor: BotSupervisor,
}

impl DashboardState {
    pub fn new(aggregator: Arc<PriceAggregator>, supervisor: BotSupervisor) -> Self {
        Self {
            aggregator,
            supervisor,
        }
    }
}
