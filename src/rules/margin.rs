//! Margin protection
//!
//! When the price comes within `activation_distance` percent of an order's
//! liquidation price, move the order's take-profit to
//! `new_liquidation_distance` percent above liquidation.

use anyhow::Result;
use chrono::{DateTime, Utc};

use super::{apply_take_profit, RuleContext, RuleKind, TakeProfitUpdate};
use crate::types::{MarginProtectionConfig, Order};

/// Percent distance between `price` and the liquidation price
pub fn liquidation_distance(price: f64, liquidation_price: f64) -> f64 {
    (price - liquidation_price).abs() / liquidation_price * 100.0
}

pub fn plan(config: &MarginProtectionConfig, orders: &[Order], price: f64) -> Vec<TakeProfitUpdate> {
    if !config.is_enabled {
        return Vec::new();
    }

    orders
        .iter()
        .filter(|order| order.is_open())
        .filter_map(|order| {
            let liquidation = order.liquidation_price();
            if liquidation <= 0.0 {
                return None;
            }
            if liquidation_distance(price, liquidation) > config.activation_distance {
                return None;
            }
            Some(TakeProfitUpdate {
                order_id: order.order_id.clone(),
                price: liquidation * (1.0 + config.new_liquidation_distance / 100.0),
            })
        })
        .collect()
}

/// Apply protection to every open order near liquidation; returns the
/// number of orders touched.
pub async fn evaluate(
    ctx: &RuleContext,
    config: &MarginProtectionConfig,
    price: f64,
    now: DateTime<Utc>,
) -> Result<usize> {
    if !config.is_enabled {
        return Ok(0);
    }

    let orders = ctx.store.open_orders(ctx.user_id).await?;
    let updates = plan(config, &orders, price);

    for update in &updates {
        tracing::info!(
            user_id = %ctx.user_id,
            order_id = %update.order_id,
            take_profit = update.price,
            price,
            "Margin protection activated"
        );
        if let Err(e) = apply_take_profit(ctx, update, now, RuleKind::MarginProtection).await {
            tracing::warn!(
                user_id = %ctx.user_id,
                order_id = %update.order_id,
                error = %e,
                "Failed to persist protective take-profit"
            );
        }
    }

    Ok(updates.len())
}
