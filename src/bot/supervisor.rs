//! Bot supervisor - owns the set of running per-user bots
//!
//! Start and stop for a user are linearised through one table lock. `start`
//! reserves the user's slot before connecting, so a concurrent start sees
//! `AlreadyRunning`; the lock is never held across an await.

use futures_util::future::join_all;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, oneshot, watch};

use super::instance::{run_event_loop, BotHandle, BotStats, LoopExit, TickReceiver};
use crate::error::BotError;
use crate::exchange::{Connector, PriceStream};
use crate::rules::{RuleContext, RuleEngine, RuleGuards};
use crate::store::TradingStore;
use crate::types::{AlertEvent, BotStatus, UserId};

const ALERT_CHANNEL_CAPACITY: usize = 64;

enum Slot {
    /// Reserved by an in-flight `start`
    Starting(u64),
    Running(BotHandle),
}

struct Inner {
    bots: RwLock<HashMap<UserId, Slot>>,
    /// Outlive bot instances so a restart cannot overlap a running rule
    rule_guards: Mutex<HashMap<UserId, RuleGuards>>,
    store: Arc<dyn TradingStore>,
    connector: Arc<dyn Connector>,
    alerts: broadcast::Sender<AlertEvent>,
    next_instance: AtomicU64,
}

impl Inner {
    /// Drop a bot whose stream went away, if it is still the registered one
    fn take_if_current(&self, user_id: UserId, instance_id: u64) -> Option<BotHandle> {
        let mut bots = self.bots.write();
        match bots.get(&user_id) {
            Some(Slot::Running(handle)) if handle.instance_id == instance_id => {}
            _ => return None,
        }
        match bots.remove(&user_id) {
            Some(Slot::Running(handle)) => Some(handle),
            _ => None,
        }
    }
}

/// Connected stream and engine waiting to be committed
struct Prepared {
    stream: Box<dyn PriceStream>,
    engine: RuleEngine,
    ticks: TickReceiver,
}

/// Releases a `Starting` slot unless committed
struct Reservation<'a> {
    inner: &'a Arc<Inner>,
    user_id: UserId,
    instance_id: u64,
    committed: bool,
}

impl<'a> Reservation<'a> {
    fn acquire(inner: &'a Arc<Inner>, user_id: UserId) -> Result<Self, BotError> {
        let mut bots = inner.bots.write();
        if bots.contains_key(&user_id) {
            return Err(BotError::AlreadyRunning(user_id));
        }
        let instance_id = inner.next_instance.fetch_add(1, Ordering::Relaxed);
        bots.insert(user_id, Slot::Starting(instance_id));
        Ok(Self {
            inner,
            user_id,
            instance_id,
            committed: false,
        })
    }

    /// Swap the reservation for a running bot and spawn its loop
    fn commit(mut self, prepared: Prepared) {
        let Prepared {
            stream,
            engine,
            ticks,
        } = prepared;
        let user_id = self.user_id;
        let instance_id = self.instance_id;
        let stats = Arc::new(RwLock::new(BotStats::default()));
        let (cancel_tx, cancel_rx) = oneshot::channel();

        let mut bots = self.inner.bots.write();
        // spawned under the lock so a fast stream loss cannot run before the entry exists
        let inner = Arc::clone(self.inner);
        let loop_stats = Arc::clone(&stats);
        let task = tokio::spawn(async move {
            let exit = run_event_loop(user_id, engine, ticks, cancel_rx, loop_stats).await;
            if exit == LoopExit::StreamClosed {
                tracing::error!(user_id = %user_id, "Price stream lost, bot stopped");
                if let Some(mut handle) = inner.take_if_current(user_id, instance_id) {
                    handle.task = None;
                    handle.shutdown(user_id).await;
                }
            }
        });

        bots.insert(
            user_id,
            Slot::Running(BotHandle {
                instance_id,
                stats,
                cancel_tx: Some(cancel_tx),
                stream,
                task: Some(task),
            }),
        );
        self.committed = true;
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        let mut bots = self.inner.bots.write();
        if matches!(bots.get(&self.user_id), Some(Slot::Starting(id)) if *id == self.instance_id) {
            bots.remove(&self.user_id);
        }
    }
}

/// Supervisor of per-user bots
#[derive(Clone)]
pub struct BotSupervisor {
    inner: Arc<Inner>,
}

impl BotSupervisor {
    pub fn new(store: Arc<dyn TradingStore>, connector: Arc<dyn Connector>) -> Self {
        let (alerts, _) = broadcast::channel(ALERT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                bots: RwLock::new(HashMap::new()),
                rule_guards: Mutex::new(HashMap::new()),
                store,
                connector,
                alerts,
                next_instance: AtomicU64::new(1),
            }),
        }
    }

    /// Start the user's bot: load credentials, connect and subscribe the
    /// price stream, then spawn the event loop.
    pub async fn start(&self, user_id: UserId) -> Result<(), BotError> {
        let reservation = Reservation::acquire(&self.inner, user_id)?;
        let prepared = self.prepare(user_id).await?;
        reservation.commit(prepared);

        tracing::info!(user_id = %user_id, "Bot started");
        Ok(())
    }

    async fn prepare(&self, user_id: UserId) -> Result<Prepared, BotError> {
        let credentials = self
            .inner
            .store
            .credentials(user_id)
            .await
            .map_err(BotError::Store)?
            .ok_or(BotError::ConfigMissing(user_id))?;

        let connect_failed = |source| BotError::ConnectFailed { user_id, source };

        let exchange = self
            .inner
            .connector
            .exchange(&credentials)
            .map_err(connect_failed)?;

        let mut stream = self.inner.connector.price_stream(&credentials);
        let (tick_tx, ticks) = watch::channel(None);
        stream.on_tick(Box::new(move |tick| {
            let _ = tick_tx.send(Some(tick));
        }));

        stream.connect().await.map_err(connect_failed)?;
        let channel = self.inner.connector.price_channel().to_string();
        if let Err(e) = stream.subscribe(&channel).await {
            let _ = stream.disconnect().await;
            return Err(connect_failed(e));
        }

        let guards = self
            .inner
            .rule_guards
            .lock()
            .entry(user_id)
            .or_default()
            .clone();
        let engine = RuleEngine::with_guards(
            RuleContext {
                user_id,
                exchange,
                store: Arc::clone(&self.inner.store),
                alerts: self.inner.alerts.clone(),
            },
            guards,
        );

        Ok(Prepared {
            stream,
            engine,
            ticks,
        })
    }

    /// Stop the user's bot. The entry is removed under the lock; cancel and
    /// disconnect then run on the now exclusively owned instance.
    pub async fn stop(&self, user_id: UserId) -> Result<(), BotError> {
        let handle = {
            let mut bots = self.inner.bots.write();
            match bots.remove(&user_id) {
                Some(Slot::Running(handle)) => handle,
                Some(starting) => {
                    bots.insert(user_id, starting);
                    return Err(BotError::NotRunning(user_id));
                }
                None => return Err(BotError::NotRunning(user_id)),
            }
        };

        handle.shutdown(user_id).await;
        tracing::info!(user_id = %user_id, "Bot stopped");
        Ok(())
    }

    /// Stop every running bot
    pub async fn stop_all(&self) {
        let handles: Vec<(UserId, BotHandle)> = {
            let mut bots = self.inner.bots.write();
            let running: Vec<UserId> = bots
                .iter()
                .filter(|(_, slot)| matches!(slot, Slot::Running(_)))
                .map(|(id, _)| *id)
                .collect();
            running
                .into_iter()
                .filter_map(|id| match bots.remove(&id) {
                    Some(Slot::Running(handle)) => Some((id, handle)),
                    _ => None,
                })
                .collect()
        };

        let count = handles.len();
        join_all(
            handles
                .into_iter()
                .map(|(user_id, handle)| handle.shutdown(user_id)),
        )
        .await;
        tracing::info!(count, "All bots stopped");
    }

    pub fn is_running(&self, user_id: UserId) -> bool {
        matches!(self.inner.bots.read().get(&user_id), Some(Slot::Running(_)))
    }

    /// Snapshot for one user; a user without a running bot reports stopped
    pub fn status(&self, user_id: UserId) -> BotStatus {
        match self.inner.bots.read().get(&user_id) {
            Some(Slot::Running(handle)) => running_status(user_id, handle),
            _ => BotStatus::stopped(user_id),
        }
    }

    /// Snapshots of every running bot, ordered by user
    pub fn status_all(&self) -> Vec<BotStatus> {
        let mut statuses: Vec<BotStatus> = self
            .inner
            .bots
            .read()
            .iter()
            .filter_map(|(user_id, slot)| match slot {
                Slot::Running(handle) => Some(running_status(*user_id, handle)),
                Slot::Starting(_) => None,
            })
            .collect();
        statuses.sort_by_key(|s| s.user_id);
        statuses
    }

    /// Receive every fired price alert from now on
    pub fn subscribe_alerts(&self) -> broadcast::Receiver<AlertEvent> {
        self.inner.alerts.subscribe()
    }
}

fn running_status(user_id: UserId, handle: &BotHandle) -> BotStatus {
    let stats = *handle.stats.read();
    BotStatus {
        user_id,
        is_running: true,
        last_price: stats.last_price,
        last_update: stats.last_update,
    }
}
