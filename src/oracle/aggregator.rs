//! Oracle Aggregator - Combines price data from multiple feeds
//!
//! Polls every configured feed concurrently on a fixed interval, averages the
//! valid answers into one snapshot, stores it as the latest and broadcasts it
//! to subscribers. A cycle where no feed answers publishes nothing.

use anyhow::Result;
use futures_util::future::join_all;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant, MissedTickBehavior};

use crate::config::OracleConfig;
use crate::oracle::hub::{BroadcastHub, Subscription};
use crate::oracle::sources::{build_feeds, PriceFeed};
use crate::types::PriceSnapshot;

/// Outcome of one feed in one cycle
#[derive(Debug)]
pub struct FeedResult {
    pub name: &'static str,
    pub price: Result<f64>,
}

/// Average the valid prices of one cycle.
///
/// Failed feeds and non-positive prices are excluded; `None` when nothing
/// valid remains.
pub fn aggregate(results: &[FeedResult], timestamp: i64) -> Option<PriceSnapshot> {
    let sources: HashMap<String, f64> = results
        .iter()
        .filter_map(|r| match &r.price {
            Ok(price) if *price > 0.0 && price.is_finite() => Some((r.name.to_string(), *price)),
            _ => None,
        })
        .collect();

    if sources.is_empty() {
        return None;
    }

    let price = sources.values().sum::<f64>() / sources.len() as f64;
    Some(PriceSnapshot {
        price,
        timestamp,
        sources,
    })
}

/// Multi-feed price aggregator with snapshot fan-out
pub struct PriceAggregator {
    feeds: Vec<Arc<dyn PriceFeed>>,
    poll_interval: Duration,
    /// Shared deadline for all feed calls of one cycle
    cycle_timeout: Duration,
    latest: RwLock<PriceSnapshot>,
    hub: BroadcastHub<PriceSnapshot>,
    started: AtomicBool,
    shutdown_tx: Mutex<Option<oneshot::Sender<()>>>,
}

impl PriceAggregator {
    pub fn new(
        feeds: Vec<Arc<dyn PriceFeed>>,
        poll_interval: Duration,
        cycle_timeout: Duration,
        subscriber_capacity: usize,
    ) -> Self {
        Self {
            feeds,
            poll_interval,
            cycle_timeout,
            latest: RwLock::new(PriceSnapshot::default()),
            hub: BroadcastHub::new(subscriber_capacity),
            started: AtomicBool::new(false),
            shutdown_tx: Mutex::new(None),
        }
    }

    /// Build the aggregator with the feeds enabled in `config`
    pub fn from_config(config: &OracleConfig) -> Result<Self> {
        let feeds = build_feeds(config)?;
        Ok(Self::new(
            feeds,
            config.poll_interval(),
            config.http_timeout(),
            config.subscriber_capacity,
        ))
    }

    /// Names of the configured feeds
    pub fn feed_names(&self) -> Vec<&'static str> {
        self.feeds.iter().map(|f| f.name()).collect()
    }

    /// Spawn the polling loop. Only the first call starts a loop.
    pub fn start(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        if self.started.swap(true, Ordering::SeqCst) {
            tracing::warn!("Price aggregator already started");
            return None;
        }

        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        *self.shutdown_tx.lock() = Some(shutdown_tx);

        let aggregator = Arc::clone(self);
        tracing::info!(
            feeds = ?aggregator.feed_names(),
            interval_ms = aggregator.poll_interval.as_millis() as u64,
            "Price aggregator started"
        );

        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(aggregator.poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = ticker.tick() => {
                        aggregator.poll_once().await;
                    }
                }
            }

            tracing::info!("Price aggregator stopped");
        }))
    }

    /// Stop the polling loop. Later calls are no-ops.
    pub fn stop(&self) {
        if let Some(tx) = self.shutdown_tx.lock().take() {
            let _ = tx.send(());
        }
    }

    /// Most recent snapshot, or an empty one (timestamp 0) before the first
    pub fn latest(&self) -> PriceSnapshot {
        self.latest.read().clone()
    }

    /// Subscribe to future snapshots; the latest one, if any, is queued first
    pub fn subscribe(&self) -> Subscription<PriceSnapshot> {
        self.hub.subscribe_with(|| {
            let latest = self.latest();
            (!latest.is_empty()).then_some(latest)
        })
    }

    pub fn subscriber_count(&self) -> usize {
        self.hub.subscriber_count()
    }

    /// Run one aggregation cycle and publish its snapshot, if any
    pub async fn poll_once(&self) -> Option<PriceSnapshot> {
        let results = self.fetch_all().await;
        // wall clock may step back; published timestamps must not
        let timestamp = chrono::Utc::now()
            .timestamp_millis()
            .max(self.latest.read().timestamp);

        let Some(snapshot) = aggregate(&results, timestamp) else {
            tracing::warn!(
                feeds = self.feeds.len(),
                "No price feed answered this cycle, keeping previous snapshot"
            );
            return None;
        };

        *self.latest.write() = snapshot.clone();
        let delivered = self.hub.publish(&snapshot);

        tracing::debug!(
            price = snapshot.price,
            sources = snapshot.sources.len(),
            delivered,
            "Published price snapshot"
        );

        Some(snapshot)
    }

    /// Query every feed concurrently under one shared deadline
    async fn fetch_all(&self) -> Vec<FeedResult> {
        let deadline = Instant::now() + self.cycle_timeout;

        let calls = self.feeds.iter().map(|feed| {
            let feed = Arc::clone(feed);
            async move {
                let name = feed.name();
                let price = match timeout_at(deadline, feed.fetch_price()).await {
                    Ok(Ok(price)) if price > 0.0 => Ok(price),
                    Ok(Ok(price)) => Err(anyhow::anyhow!("invalid price {}", price)),
                    Ok(Err(e)) => Err(e),
                    Err(_) => Err(anyhow::anyhow!("deadline exceeded")),
                };
                if let Err(e) = &price {
                    tracing::warn!(source = %name, error = %e, "Price feed failed");
                }
                FeedResult { name, price }
            }
        });

        join_all(calls).await
    }
}
