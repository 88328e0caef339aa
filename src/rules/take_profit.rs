//! Daily take-profit ratchet

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};

use super::{apply_take_profit, RuleContext, RuleKind, TakeProfitUpdate};
use crate::types::{Order, TakeProfitConfig};

/// Minimum time between two ratchet passes
pub const RATCHET_PERIOD_HOURS: i64 = 24;

pub fn is_due(config: &TakeProfitConfig, now: DateTime<Utc>) -> bool {
    config.is_enabled && now - config.last_update >= Duration::hours(RATCHET_PERIOD_HOURS)
}

pub fn plan(config: &TakeProfitConfig, orders: &[Order]) -> Vec<TakeProfitUpdate> {
    orders
        .iter()
        .filter(|order| order.is_open())
        .map(|order| TakeProfitUpdate {
            order_id: order.order_id.clone(),
            price: order.price * (1.0 + config.daily_percentage / 100.0),
        })
        .collect()
}

/// Ratchet every open order once the period has elapsed, then stamp
/// `last_update` once for the whole pass.
pub async fn evaluate(
    ctx: &RuleContext,
    config: &TakeProfitConfig,
    now: DateTime<Utc>,
) -> Result<usize> {
    if !is_due(config, now) {
        return Ok(0);
    }

    let orders = ctx.store.open_orders(ctx.user_id).await?;
    let updates = plan(config, &orders);

    for update in &updates {
        tracing::info!(
            user_id = %ctx.user_id,
            order_id = %update.order_id,
            take_profit = update.price,
            "Ratcheting take-profit"
        );
        if let Err(e) = apply_take_profit(ctx, update, now, RuleKind::TakeProfit).await {
            tracing::warn!(
                user_id = %ctx.user_id,
                order_id = %update.order_id,
                error = %e,
                "Failed to persist ratcheted take-profit"
            );
        }
    }

    ctx.store.touch_take_profit(ctx.user_id, now).await?;
    Ok(updates.len())
}
