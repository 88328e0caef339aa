//! Automation rules evaluated on every price tick
//!
//! Four independent rules (margin protection, take-profit ratchet, entry
//! automation, price alert). Each rule has a pure planning function and an
//! async `evaluate` that applies the plan through the exchange and store.
//! `RuleEngine` dispatches them concurrently per tick while keeping at most
//! one evaluation of a given rule in flight per user.

pub mod alert;
pub mod entry;
pub mod margin;
pub mod take_profit;

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;

use crate::exchange::ExchangeClient;
use crate::store::TradingStore;
use crate::types::{AlertEvent, UserId};

/// New take-profit target for one order
#[derive(Debug, Clone, PartialEq)]
pub struct TakeProfitUpdate {
    pub order_id: String,
    pub price: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuleKind {
    MarginProtection,
    TakeProfit,
    EntryAutomation,
    PriceAlert,
}

impl RuleKind {
    pub const ALL: [RuleKind; 4] = [
        RuleKind::MarginProtection,
        RuleKind::TakeProfit,
        RuleKind::EntryAutomation,
        RuleKind::PriceAlert,
    ];

    fn index(self) -> usize {
        match self {
            RuleKind::MarginProtection => 0,
            RuleKind::TakeProfit => 1,
            RuleKind::EntryAutomation => 2,
            RuleKind::PriceAlert => 3,
        }
    }
}

impl fmt::Display for RuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RuleKind::MarginProtection => "margin_protection",
            RuleKind::TakeProfit => "take_profit",
            RuleKind::EntryAutomation => "entry_automation",
            RuleKind::PriceAlert => "price_alert",
        };
        f.write_str(name)
    }
}

/// Collaborators a rule may act through
pub struct RuleContext {
    pub user_id: UserId,
    pub exchange: Arc<dyn ExchangeClient>,
    pub store: Arc<dyn TradingStore>,
    pub alerts: broadcast::Sender<AlertEvent>,
}

/// One in-flight guard per rule kind.
///
/// Owned per user rather than per engine, so an evaluation left running by a
/// stopped bot still blocks the same rule in the user's next bot.
#[derive(Clone, Default)]
pub struct RuleGuards([Arc<Mutex<()>>; 4]);

impl RuleGuards {
    fn slot(&self, kind: RuleKind) -> Arc<Mutex<()>> {
        Arc::clone(&self.0[kind.index()])
    }
}

/// Per-user rule dispatcher
pub struct RuleEngine {
    ctx: Arc<RuleContext>,
    guards: RuleGuards,
}

impl RuleEngine {
    pub fn new(ctx: RuleContext) -> Self {
        Self::with_guards(ctx, RuleGuards::default())
    }

    pub fn with_guards(ctx: RuleContext, guards: RuleGuards) -> Self {
        Self {
            ctx: Arc::new(ctx),
            guards,
        }
    }

    pub fn user_id(&self) -> UserId {
        self.ctx.user_id
    }

    /// Start every rule for one tick without waiting for them.
    ///
    /// A rule whose previous evaluation is still running is skipped for this
    /// tick. The configuration is read after the rule's guard is taken, so
    /// each evaluation sees its predecessor's writes.
    pub fn dispatch(&self, price: f64, now: DateTime<Utc>) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::with_capacity(RuleKind::ALL.len());

        for kind in RuleKind::ALL {
            let guard = match self.guards.slot(kind).try_lock_owned() {
                Ok(guard) => guard,
                Err(_) => {
                    tracing::debug!(
                        user_id = %self.ctx.user_id,
                        rule = %kind,
                        "Previous evaluation still running, skipping tick"
                    );
                    continue;
                }
            };

            let ctx = Arc::clone(&self.ctx);
            handles.push(tokio::spawn(async move {
                let _guard = guard;
                if let Err(e) = run_rule(&ctx, kind, price, now).await {
                    tracing::warn!(
                        user_id = %ctx.user_id,
                        rule = %kind,
                        error = %e,
                        "Rule evaluation failed"
                    );
                }
            }));
        }

        handles
    }
}

async fn run_rule(ctx: &RuleContext, kind: RuleKind, price: f64, now: DateTime<Utc>) -> Result<()> {
    let config = ctx.store.trading_config(ctx.user_id).await?;
    match kind {
        RuleKind::MarginProtection => {
            if let Some(rule) = &config.margin_protection {
                margin::evaluate(ctx, rule, price, now).await?;
            }
        }
        RuleKind::TakeProfit => {
            if let Some(rule) = &config.take_profit {
                take_profit::evaluate(ctx, rule, now).await?;
            }
        }
        RuleKind::EntryAutomation => {
            if let Some(rule) = &config.entry_automation {
                entry::evaluate(ctx, rule, price, now).await?;
            }
        }
        RuleKind::PriceAlert => {
            if let Some(rule) = &config.price_alert {
                alert::evaluate(ctx, rule, price, now).await?;
            }
        }
    }
    Ok(())
}

/// Push a take-profit to the exchange, then persist it.
///
/// The stored target is kept even when the exchange call fails.
pub(crate) async fn apply_take_profit(
    ctx: &RuleContext,
    update: &TakeProfitUpdate,
    now: DateTime<Utc>,
    rule: RuleKind,
) -> Result<()> {
    if let Err(e) = ctx
        .exchange
        .update_take_profit(&update.order_id, update.price)
        .await
    {
        tracing::warn!(
            user_id = %ctx.user_id,
            rule = %rule,
            order_id = %update.order_id,
            error = %e,
            "Exchange take-profit update failed"
        );
    }
    ctx.store
        .update_take_profit(&update.order_id, update.price, now)
        .await
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::exchange::MockExchangeClient;
    use crate::store::MemoryStore;
    use crate::types::{Order, OrderSide, OrderStatus};

    pub fn open_order(user: i64, id: &str, price: f64, leverage: f64) -> Order {
        let now = Utc::now();
        Order {
            user_id: UserId(user),
            order_id: id.to_string(),
            side: OrderSide::Buy,
            amount: 10.0,
            price,
            leverage,
            status: OrderStatus::Open,
            take_profit_price: None,
            stop_loss_price: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn context(
        exchange: MockExchangeClient,
        store: Arc<MemoryStore>,
    ) -> (RuleContext, broadcast::Receiver<AlertEvent>) {
        let (alerts, rx) = broadcast::channel(8);
        let ctx = RuleContext {
            user_id: UserId(1),
            exchange: Arc::new(exchange),
            store,
            alerts,
        };
        (ctx, rx)
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::exchange::MockExchangeClient;
    use crate::store::{MemoryStore, OrderStore};
    use crate::types::{MarginProtectionConfig, PriceAlertConfig};

    #[test]
    fn rule_names_are_snake_case() {
        let names: Vec<String> = RuleKind::ALL.iter().map(|k| k.to_string()).collect();
        assert_eq!(
            names,
            vec![
                "margin_protection",
                "take_profit",
                "entry_automation",
                "price_alert"
            ]
        );
    }

    #[tokio::test]
    async fn dispatch_runs_enabled_rules_only() {
        let store = Arc::new(MemoryStore::new());
        store.set_margin_protection(
            UserId(1),
            MarginProtectionConfig {
                is_enabled: true,
                ..Default::default()
            },
        );
        store.set_price_alert(
            UserId(1),
            PriceAlertConfig {
                is_enabled: false,
                ..Default::default()
            },
        );
        store
            .save_order(open_order(1, "o-1", 100_000.0, 10.0))
            .await
            .unwrap();

        let mut exchange = MockExchangeClient::new();
        exchange
            .expect_update_take_profit()
            .times(1)
            .returning(|_, _| Ok(()));
        exchange.expect_create_order().never();

        let (ctx, mut alerts) = context(exchange, store.clone());
        let engine = RuleEngine::new(ctx);
        for handle in engine.dispatch(94_000.0, Utc::now()) {
            handle.await.unwrap();
        }

        assert!(store.orders(UserId(1))[0].take_profit_price.is_some());
        assert!(alerts.try_recv().is_err());
    }

    #[tokio::test]
    async fn busy_rule_is_skipped() {
        let store = Arc::new(MemoryStore::new());
        let (ctx, _alerts) = context(MockExchangeClient::new(), store);
        let engine = RuleEngine::new(ctx);

        let held = engine
            .guards
            .slot(RuleKind::EntryAutomation)
            .try_lock_owned()
            .unwrap();
        let handles = engine.dispatch(100_000.0, Utc::now());
        assert_eq!(handles.len(), 3);
        for handle in handles {
            handle.await.unwrap();
        }
        drop(held);

        assert_eq!(engine.dispatch(100_000.0, Utc::now()).len(), 4);
    }

    #[tokio::test]
    async fn shared_guards_span_engines() {
        let guards = RuleGuards::default();
        let (first, _a) = context(MockExchangeClient::new(), Arc::new(MemoryStore::new()));
        let (second, _b) = context(MockExchangeClient::new(), Arc::new(MemoryStore::new()));
        let old = RuleEngine::with_guards(first, guards.clone());
        let new = RuleEngine::with_guards(second, guards);

        let held = old
            .guards
            .slot(RuleKind::PriceAlert)
            .try_lock_owned()
            .unwrap();
        let handles = new.dispatch(100_000.0, Utc::now());
        assert_eq!(handles.len(), 3);
        for handle in handles {
            handle.await.unwrap();
        }
        drop(held);
    }
}
