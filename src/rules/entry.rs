//! Grid entry automation
//!
//! Slot `n` targets `initial_price + n * price_variation`. A tick within half
//! a variation of the next target opens one order and advances the grid.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

use super::RuleContext;
use crate::exchange::TradeRequest;
use crate::types::{EntryAutomationConfig, Order, OrderStatus};

pub fn plan(config: &EntryAutomationConfig, price: f64) -> Option<TradeRequest> {
    if !config.is_enabled || config.is_exhausted() {
        return None;
    }

    let target = config.next_target();
    if (price - target).abs() > config.price_variation / 2.0 {
        return None;
    }

    Some(TradeRequest {
        side: config.operation_type,
        amount: config.amount_per_order,
        price,
        leverage: config.leverage,
    })
}

/// Take-profit assigned to a freshly opened grid order
pub fn take_profit_for(config: &EntryAutomationConfig, price: f64) -> f64 {
    price * (1.0 + config.take_profit_per_order / 100.0)
}

/// Open the next grid order if the price is in its window. Nothing is
/// persisted when the exchange rejects the order.
pub async fn evaluate(
    ctx: &RuleContext,
    config: &EntryAutomationConfig,
    price: f64,
    now: DateTime<Utc>,
) -> Result<Option<Order>> {
    let Some(request) = plan(config, price) else {
        return Ok(None);
    };

    let response = ctx
        .exchange
        .create_order(&request)
        .await
        .context("Failed to create grid order")?;

    let take_profit = take_profit_for(config, price);
    if let Err(e) = ctx
        .exchange
        .update_take_profit(&response.id, take_profit)
        .await
    {
        tracing::warn!(
            user_id = %ctx.user_id,
            order_id = %response.id,
            error = %e,
            "Failed to set take-profit on new order"
        );
    }

    let status = OrderStatus::from_str(&response.status);
    if status == OrderStatus::Unknown {
        tracing::warn!(
            user_id = %ctx.user_id,
            order_id = %response.id,
            status = %response.status,
            "Unrecognised order status from exchange"
        );
    }

    let order = Order {
        user_id: ctx.user_id,
        order_id: response.id.clone(),
        side: response.side,
        amount: response.amount,
        price: response.price,
        leverage: response.leverage,
        status,
        take_profit_price: Some(take_profit),
        stop_loss_price: None,
        created_at: now,
        updated_at: now,
    };

    ctx.store
        .save_order(order.clone())
        .await
        .context("Failed to save grid order")?;
    ctx.store
        .increment_filled_slots(ctx.user_id)
        .await
        .context("Failed to advance grid slot")?;

    tracing::info!(
        user_id = %ctx.user_id,
        order_id = %order.order_id,
        slot = config.filled_slots + 1,
        price,
        "Created grid order"
    );
    Ok(Some(order))
}
