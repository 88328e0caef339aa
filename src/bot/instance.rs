//! Per-user bot instance and its event loop

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

use crate::exchange::PriceStream;
use crate::rules::RuleEngine;
use crate::types::{PriceTick, UserId};

/// Fields refreshed by the loop after each tick
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BotStats {
    pub last_price: Option<f64>,
    pub last_update: Option<DateTime<Utc>>,
}

/// Single-slot tick queue: a newer unread tick replaces an older one
pub type TickReceiver = watch::Receiver<Option<PriceTick>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    Cancelled,
    /// The stream released its tick callback
    StreamClosed,
}

/// Wait for ticks until cancelled or the stream goes away.
///
/// Rules are dispatched without waiting for them, so the loop is ready for
/// the next tick immediately.
pub async fn run_event_loop(
    user_id: UserId,
    engine: RuleEngine,
    mut ticks: TickReceiver,
    mut cancel_rx: oneshot::Receiver<()>,
    stats: Arc<RwLock<BotStats>>,
) -> LoopExit {
    loop {
        tokio::select! {
            biased;
            _ = &mut cancel_rx => return LoopExit::Cancelled,
            changed = ticks.changed() => {
                if changed.is_err() {
                    return LoopExit::StreamClosed;
                }
                let tick = *ticks.borrow_and_update();
                let Some(tick) = tick else { continue };

                let now = Utc::now();
                {
                    let mut stats = stats.write();
                    stats.last_price = Some(tick.price);
                    stats.last_update = Some(now);
                }
                tracing::debug!(user_id = %user_id, price = tick.price, "Processing tick");
                engine.dispatch(tick.price, now);
            }
        }
    }
}

/// Running bot as owned by the supervisor
pub(crate) struct BotHandle {
    pub instance_id: u64,
    pub stats: Arc<RwLock<BotStats>>,
    pub cancel_tx: Option<oneshot::Sender<()>>,
    pub stream: Box<dyn PriceStream>,
    pub task: Option<JoinHandle<()>>,
}

impl BotHandle {
    /// Cancel the loop once, then close the stream
    pub async fn shutdown(mut self, user_id: UserId) {
        if let Some(tx) = self.cancel_tx.take() {
            let _ = tx.send(());
        }
        if let Err(e) = self.stream.disconnect().await {
            tracing::warn!(user_id = %user_id, error = %e, "Price stream disconnect failed");
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}
