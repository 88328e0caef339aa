//! BtcBot - price aggregator and per-user LN Markets bots

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use btcbot::bot::BotSupervisor;
use btcbot::config::AppConfig;
use btcbot::exchange::LnMarketsConnector;
use btcbot::oracle::PriceAggregator;
use btcbot::store::MemoryStore;

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.compact().init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load()?;
    init_logging(config.logging.json);
    tracing::info!(config = %config.digest(), "Configuration loaded");

    let aggregator = Arc::new(PriceAggregator::from_config(&config.oracle)?);
    let poll_task = aggregator.start();

    let store = Arc::new(match &config.bot.seed_file {
        Some(path) => MemoryStore::from_seed_file(path)?,
        None => MemoryStore::new(),
    });
    let supervisor = BotSupervisor::new(
        store.clone(),
        Arc::new(LnMarketsConnector::new(config.exchange.clone())),
    );

    if config.bot.autostart {
        for user_id in store.credentialed_user_ids() {
            if let Err(e) = supervisor.start(user_id).await {
                tracing::warn!(user_id = %user_id, error = %e, "Autostart failed");
            }
        }
    }

    let mut snapshots = aggregator.subscribe();
    let snapshot_log = tokio::spawn(async move {
        while let Some(snapshot) = snapshots.recv().await {
            tracing::debug!(
                price = snapshot.price,
                sources = snapshot.sources.len(),
                timestamp = snapshot.timestamp,
                "Price snapshot"
            );
        }
    });

    let mut alerts = supervisor.subscribe_alerts();
    let alert_log = tokio::spawn(async move {
        use tokio::sync::broadcast::error::RecvError;
        loop {
            match alerts.recv().await {
                Ok(alert) => {
                    tracing::debug!(user_id = %alert.user_id, price = alert.price, "Alert delivered")
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Alert listener lagged")
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    #[cfg(feature = "dashboard")]
    let server = {
        let state = btcbot::dashboard::DashboardState::new(aggregator.clone(), supervisor.clone());
        let app = btcbot::dashboard::create_router(state);
        let listener = tokio::net::TcpListener::bind(config.dashboard.bind.as_str())
            .await
            .with_context(|| format!("Failed to bind dashboard on {}", config.dashboard.bind))?;
        tracing::info!(bind = %config.dashboard.bind, "Dashboard listening");
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!(error = %e, "Dashboard server failed");
            }
        })
    };

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Shutdown requested");

    supervisor.stop_all().await;
    aggregator.stop();
    if let Some(task) = poll_task {
        let _ = task.await;
    }

    #[cfg(feature = "dashboard")]
    server.abort();
    snapshot_log.abort();
    alert_log.abort();

    tracing::info!("BtcBot stopped");
    Ok(())
}
