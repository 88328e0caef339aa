//! Price range alert

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};

use super::RuleContext;
use crate::types::{AlertEvent, PriceAlertConfig};

pub fn out_of_range(config: &PriceAlertConfig, price: f64) -> bool {
    price < config.min_price || price > config.max_price
}

/// Out of range and at least `check_interval` seconds since the last alert.
/// An interval too large to represent is never due.
pub fn should_fire(config: &PriceAlertConfig, price: f64, now: DateTime<Utc>) -> bool {
    let Some(interval) = Duration::try_seconds(config.check_interval) else {
        return false;
    };
    config.is_enabled && out_of_range(config, price) && now - config.last_alert >= interval
}

/// Emit an alert and stamp `last_alert` when due
pub async fn evaluate(
    ctx: &RuleContext,
    config: &PriceAlertConfig,
    price: f64,
    now: DateTime<Utc>,
) -> Result<Option<AlertEvent>> {
    if !should_fire(config, price, now) {
        return Ok(None);
    }

    tracing::warn!(
        user_id = %ctx.user_id,
        price,
        min_price = config.min_price,
        max_price = config.max_price,
        "PRICE ALERT: price outside configured range"
    );

    let event = AlertEvent {
        user_id: ctx.user_id,
        price,
        min_price: config.min_price,
        max_price: config.max_price,
        timestamp: now,
    };
    // no listeners is fine
    let _ = ctx.alerts.send(event.clone());

    ctx.store.touch_price_alert(ctx.user_id, now).await?;
    Ok(Some(event))
}
