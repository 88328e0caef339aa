//! Bot supervisor tests with in-process fakes for the exchange and stream

#[cfg(test)]
mod tests {
    use anyhow::{bail, Result};
    use async_trait::async_trait;
    use btcbot::bot::BotSupervisor;
    use btcbot::exchange::{
        AccountBalance, Connector, ExchangeClient, PositionFilter, PriceStream, TickHandler,
        TradeRequest, TradeResponse,
    };
    use btcbot::store::{ConfigStore, MemoryStore};
    use btcbot::types::{
        EntryAutomationConfig, ExchangeCredentials, PriceAlertConfig, PriceTick, UserId,
    };
    use btcbot::BotError;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_test::{assert_err, assert_ok};

    // ============================================================================
    // Fakes
    // ============================================================================

    #[derive(Default)]
    struct FakeExchange {
        orders: Mutex<Vec<TradeRequest>>,
        take_profits: Mutex<Vec<(String, f64)>>,
        create_delay: Mutex<Duration>,
    }

    #[async_trait]
    impl ExchangeClient for FakeExchange {
        async fn create_order(&self, request: &TradeRequest) -> Result<TradeResponse> {
            let delay = *self.create_delay.lock();
            tokio::time::sleep(delay).await;
            let mut orders = self.orders.lock();
            orders.push(request.clone());
            Ok(TradeResponse {
                id: format!("order-{}", orders.len()),
                side: request.side,
                amount: request.amount,
                price: request.price,
                leverage: request.leverage,
                status: "open".to_string(),
            })
        }

        async fn update_take_profit(&self, order_id: &str, price: f64) -> Result<()> {
            self.take_profits.lock().push((order_id.to_string(), price));
            Ok(())
        }

        async fn update_stop_loss(&self, _order_id: &str, _price: f64) -> Result<()> {
            Ok(())
        }

        async fn close_order(&self, _order_id: &str) -> Result<()> {
            Ok(())
        }

        async fn balance(&self) -> Result<AccountBalance> {
            Ok(AccountBalance {
                id: "fake".to_string(),
                balance: 0.0,
                currency: "sat".to_string(),
            })
        }

        async fn positions(&self, _filter: PositionFilter) -> Result<Vec<TradeResponse>> {
            Ok(Vec::new())
        }
    }

    /// Test-side view of one fake stream
    #[derive(Default)]
    struct StreamProbe {
        handler: Mutex<Option<TickHandler>>,
        subscribed: Mutex<Vec<String>>,
        disconnects: AtomicUsize,
    }

    impl StreamProbe {
        fn push(&self, price: f64) {
            if let Some(handler) = self.handler.lock().as_ref() {
                handler(PriceTick { price, time: 0 });
            }
        }

        /// Simulate a lost connection
        fn lose(&self) {
            self.handler.lock().take();
        }
    }

    struct FakeStream {
        probe: Arc<StreamProbe>,
        fail_connect: bool,
        connect_delay: Duration,
    }

    #[async_trait]
    impl PriceStream for FakeStream {
        async fn connect(&mut self) -> Result<()> {
            tokio::time::sleep(self.connect_delay).await;
            if self.fail_connect {
                bail!("connection refused");
            }
            Ok(())
        }

        async fn subscribe(&mut self, channel: &str) -> Result<()> {
            self.probe.subscribed.lock().push(channel.to_string());
            Ok(())
        }

        fn on_tick(&mut self, handler: TickHandler) {
            *self.probe.handler.lock() = Some(handler);
        }

        async fn disconnect(&mut self) -> Result<()> {
            self.probe.disconnects.fetch_add(1, Ordering::SeqCst);
            self.probe.handler.lock().take();
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeConnector {
        exchange: Arc<FakeExchange>,
        probes: Mutex<Vec<Arc<StreamProbe>>>,
        fail_connect: AtomicBool,
        connect_delay: Mutex<Duration>,
    }

    impl FakeConnector {
        fn last_probe(&self) -> Arc<StreamProbe> {
            self.probes.lock().last().cloned().unwrap()
        }

        fn streams_created(&self) -> usize {
            self.probes.lock().len()
        }
    }

    impl Connector for FakeConnector {
        fn exchange(&self, _credentials: &ExchangeCredentials) -> Result<Arc<dyn ExchangeClient>> {
            Ok(self.exchange.clone())
        }

        fn price_stream(&self, _credentials: &ExchangeCredentials) -> Box<dyn PriceStream> {
            let probe = Arc::new(StreamProbe::default());
            self.probes.lock().push(probe.clone());
            Box::new(FakeStream {
                probe,
                fail_connect: self.fail_connect.load(Ordering::SeqCst),
                connect_delay: *self.connect_delay.lock(),
            })
        }

        fn price_channel(&self) -> &str {
            "futures:btc_usd:last-price"
        }
    }

    fn credentials() -> ExchangeCredentials {
        ExchangeCredentials {
            api_key: "key".to_string(),
            secret_key: "secret".to_string(),
            passphrase: "phrase".to_string(),
            is_testnet: true,
        }
    }

    fn setup() -> (BotSupervisor, Arc<MemoryStore>, Arc<FakeConnector>) {
        let store = Arc::new(MemoryStore::new());
        store.set_credentials(UserId(1), credentials());
        store.set_credentials(UserId(2), credentials());
        let connector = Arc::new(FakeConnector::default());
        let supervisor = BotSupervisor::new(store.clone(), connector.clone());
        (supervisor, store, connector)
    }

    async fn eventually(check: impl Fn() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    // ============================================================================
    // Lifecycle
    // ============================================================================

    #[tokio::test]
    async fn test_start_twice_keeps_one_instance() {
        let (supervisor, _store, connector) = setup();

        assert_ok!(supervisor.start(UserId(1)).await);
        let second = supervisor.start(UserId(1)).await;
        assert!(matches!(second, Err(BotError::AlreadyRunning(UserId(1)))));

        assert_eq!(connector.streams_created(), 1);
        assert_eq!(supervisor.status_all().len(), 1);
        assert!(supervisor.status(UserId(1)).is_running);
        assert_eq!(
            connector.last_probe().subscribed.lock().clone(),
            vec!["futures:btc_usd:last-price".to_string()]
        );
    }

    #[tokio::test]
    async fn test_stop_twice_reports_not_running() {
        let (supervisor, _store, connector) = setup();
        assert_ok!(supervisor.start(UserId(1)).await);

        assert_ok!(supervisor.stop(UserId(1)).await);
        let again = supervisor.stop(UserId(1)).await;
        assert!(matches!(again, Err(BotError::NotRunning(UserId(1)))));

        assert!(!supervisor.status(UserId(1)).is_running);
        assert!(supervisor.status_all().is_empty());
        assert_eq!(connector.last_probe().disconnects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_restart_creates_fresh_instance() {
        let (supervisor, _store, connector) = setup();
        assert_ok!(supervisor.start(UserId(1)).await);
        connector.last_probe().push(100_000.0);
        eventually(|| supervisor.status(UserId(1)).last_price == Some(100_000.0)).await;

        assert_ok!(supervisor.stop(UserId(1)).await);
        assert_ok!(supervisor.start(UserId(1)).await);

        assert_eq!(connector.streams_created(), 2);
        let status = supervisor.status(UserId(1));
        assert!(status.is_running);
        assert_eq!(status.last_price, None);
    }

    #[tokio::test]
    async fn test_missing_credentials_leaves_no_entry() {
        let (supervisor, _store, connector) = setup();
        let result = supervisor.start(UserId(42)).await;
        assert!(matches!(result, Err(BotError::ConfigMissing(UserId(42)))));
        assert_eq!(connector.streams_created(), 0);
        assert!(!supervisor.is_running(UserId(42)));
    }

    #[tokio::test]
    async fn test_connect_failure_releases_reservation() {
        let (supervisor, _store, connector) = setup();
        connector.fail_connect.store(true, Ordering::SeqCst);

        let err = assert_err!(supervisor.start(UserId(1)).await);
        assert!(matches!(err, BotError::ConnectFailed { .. }));
        assert!(!supervisor.is_running(UserId(1)));

        connector.fail_connect.store(false, Ordering::SeqCst);
        assert_ok!(supervisor.start(UserId(1)).await);
    }

    #[tokio::test]
    async fn test_concurrent_starts_admit_one() {
        let (supervisor, _store, connector) = setup();
        *connector.connect_delay.lock() = Duration::from_millis(50);

        let (a, b) = tokio::join!(supervisor.start(UserId(1)), supervisor.start(UserId(1)));
        let started = [a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count();
        assert_eq!(started, 1);
        assert!(matches!(
            a.err().or(b.err()),
            Some(BotError::AlreadyRunning(UserId(1)))
        ));
        assert_eq!(connector.streams_created(), 1);
    }

    #[tokio::test]
    async fn test_stop_all_stops_every_bot() {
        let (supervisor, _store, _connector) = setup();
        assert_ok!(supervisor.start(UserId(1)).await);
        assert_ok!(supervisor.start(UserId(2)).await);
        assert_eq!(supervisor.status_all().len(), 2);

        supervisor.stop_all().await;
        assert!(supervisor.status_all().is_empty());
    }

    // ============================================================================
    // Ticks
    // ============================================================================

    #[tokio::test]
    async fn test_tick_drives_entry_automation() {
        let (supervisor, store, connector) = setup();
        store.set_entry_automation(
            UserId(1),
            EntryAutomationConfig {
                is_enabled: true,
                initial_price: 116_000.0,
                price_variation: 50.0,
                ..Default::default()
            },
        );
        assert_ok!(supervisor.start(UserId(1)).await);

        connector.last_probe().push(116_020.0);
        eventually(|| store.orders(UserId(1)).len() == 1).await;

        let orders = connector.exchange.orders.lock().clone();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].price, 116_020.0);
        let status = supervisor.status(UserId(1));
        assert_eq!(status.last_price, Some(116_020.0));
        assert!(status.last_update.is_some());
    }

    #[tokio::test]
    async fn test_restart_during_slow_order_fills_slot_once() {
        let (supervisor, store, connector) = setup();
        store.set_entry_automation(
            UserId(1),
            EntryAutomationConfig {
                is_enabled: true,
                initial_price: 116_000.0,
                price_variation: 50.0,
                ..Default::default()
            },
        );
        *connector.exchange.create_delay.lock() = Duration::from_millis(300);

        assert_ok!(supervisor.start(UserId(1)).await);
        connector.last_probe().push(116_000.0);
        tokio::time::sleep(Duration::from_millis(50)).await;

        // first order still in flight on the exchange
        assert_ok!(supervisor.stop(UserId(1)).await);
        assert_ok!(supervisor.start(UserId(1)).await);
        connector.last_probe().push(116_000.0);
        eventually(|| supervisor.status(UserId(1)).last_price == Some(116_000.0)).await;

        eventually(|| store.orders(UserId(1)).len() == 1).await;
        tokio::time::sleep(Duration::from_millis(400)).await;

        assert_eq!(connector.exchange.orders.lock().len(), 1);
        assert_eq!(store.orders(UserId(1)).len(), 1);
        let entry = store
            .trading_config(UserId(1))
            .await
            .unwrap()
            .entry_automation
            .unwrap();
        assert_eq!(entry.filled_slots, 1);
    }

    #[tokio::test]
    async fn test_alerts_are_broadcast() {
        let (supervisor, store, connector) = setup();
        store.set_price_alert(
            UserId(1),
            PriceAlertConfig {
                is_enabled: true,
                last_alert: chrono::Utc::now() - chrono::Duration::days(1),
                ..Default::default()
            },
        );
        let mut alerts = supervisor.subscribe_alerts();
        assert_ok!(supervisor.start(UserId(1)).await);

        connector.last_probe().push(99_000.0);
        let alert = tokio::time::timeout(Duration::from_secs(2), alerts.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(alert.user_id, UserId(1));
        assert_eq!(alert.price, 99_000.0);
    }

    #[tokio::test]
    async fn test_lost_stream_removes_bot() {
        let (supervisor, _store, connector) = setup();
        assert_ok!(supervisor.start(UserId(1)).await);

        connector.last_probe().lose();
        eventually(|| !supervisor.is_running(UserId(1))).await;

        let stop = supervisor.stop(UserId(1)).await;
        assert!(matches!(stop, Err(BotError::NotRunning(UserId(1)))));
        assert_ok!(supervisor.start(UserId(1)).await);
    }
}
