use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{interval_at, Duration, Instant, MissedTickBehavior};

use super::dispatcher::{validate_lot_size, OrderDispatcher};
use super::journal::{Journal, LoopEvent};
use crate::broker::{Broker, MAX_BAR_COUNT};
use crate::classifier::{ClassifierConfig, WindowClassifier};
use crate::error::{Result, TradingError};
use crate::features::build_features;
use crate::models::{AccountInfo, Credentials, Timeframe, TradeRecord};

/// Parameters for one trading session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradingParams {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub bar_count: usize,
    pub lot_size: f64,
    pub classifier: ClassifierConfig,
}

impl Default for TradingParams {
    fn default() -> Self {
        Self {
            symbol: "BTCUSD".to_string(),
            timeframe: Timeframe::M15,
            bar_count: 1000,
            lot_size: 0.1,
            classifier: ClassifierConfig::default(),
        }
    }
}

impl TradingParams {
    pub fn validate(&self) -> Result<()> {
        if self.symbol.trim().is_empty() {
            return Err(TradingError::InvalidParameter("symbol is empty".to_string()));
        }
        if self.classifier.window == 0 {
            return Err(TradingError::InvalidParameter(
                "window must be at least 1".to_string(),
            ));
        }
        if self.bar_count > MAX_BAR_COUNT {
            return Err(TradingError::InvalidParameter(format!(
                "bar count {} exceeds the limit of {}",
                self.bar_count, MAX_BAR_COUNT
            )));
        }
        if self.bar_count <= self.classifier.window.saturating_add(1) {
            return Err(TradingError::InvalidParameter(format!(
                "bar count {} too small for window {}",
                self.bar_count, self.classifier.window
            )));
        }
        validate_lot_size(self.lot_size)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Connected,
    Looping,
}

/// Where in the cycle a skip happened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleStage {
    Fetch,
    Classify,
    Dispatch,
}

#[derive(Debug)]
pub enum CycleOutcome {
    Executed(TradeRecord),
    Skipped {
        stage: CycleStage,
        error: TradingError,
    },
}

/// Fetch → features → classify → dispatch, repeated once per bar period
pub struct TradingLoop {
    broker: Arc<dyn Broker>,
    params: TradingParams,
    classifier: WindowClassifier,
    dispatcher: OrderDispatcher,
    journal: Journal,
    state: LoopState,
}

impl TradingLoop {
    pub fn new(broker: Arc<dyn Broker>, params: TradingParams, journal: Journal) -> Result<Self> {
        params.validate()?;
        Ok(Self {
            classifier: WindowClassifier::new(params.classifier.clone()),
            dispatcher: OrderDispatcher::new(broker.clone(), journal.clone()),
            broker,
            params,
            journal,
            state: LoopState::Idle,
        })
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn params(&self) -> &TradingParams {
        &self.params
    }

    /// Idle → Connected; returns the account snapshot
    pub async fn connect(&mut self, credentials: &Credentials) -> Result<AccountInfo> {
        self.broker.connect(credentials).await?;
        let account = self.broker.account_info().await?;

        tracing::info!("Successfully connected to account #{}", account.login);
        tracing::info!("  Server: {}", account.server);
        tracing::info!("  Name: {}", account.name);
        tracing::info!("  Balance: {:.2} {}", account.balance, account.currency);
        tracing::info!("  Equity: {:.2} {}", account.equity, account.currency);
        tracing::info!("  Free margin: {:.2}", account.free_margin);
        tracing::info!("  Leverage: 1:{}", account.leverage);

        self.state = LoopState::Connected;
        Ok(account)
    }

    /// Back to Idle, closing the terminal connection
    pub async fn disconnect(&mut self) {
        self.broker.shutdown().await;
        self.state = LoopState::Idle;
    }

    /// Run one full cycle
    ///
    /// A fetch that fails or returns nothing ends the cycle before the
    /// classifier or dispatcher is touched.
    pub async fn run_cycle(&self, cycle: u64) -> CycleOutcome {
        self.journal.publish(LoopEvent::CycleStarted { cycle });
        let params = &self.params;

        let bars = match self
            .broker
            .fetch_bars(&params.symbol, params.timeframe, params.bar_count)
            .await
        {
            Ok(bars) if !bars.is_empty() => bars,
            Ok(_) => {
                let error = TradingError::DataUnavailable(format!(
                    "empty bar set for {}",
                    params.symbol
                ));
                return self.skip(cycle, CycleStage::Fetch, error);
            }
            Err(error) => return self.skip(cycle, CycleStage::Fetch, error),
        };

        let rows = build_features(&bars);
        let prediction = match self.classifier.predict(&rows) {
            Ok(prediction) => prediction,
            Err(error) => return self.skip(cycle, CycleStage::Classify, error),
        };

        tracing::info!(
            cycle,
            direction = %prediction.direction,
            train = prediction.train_size,
            accuracy = ?prediction.test_accuracy,
            "Signal generated"
        );
        self.journal.publish(LoopEvent::Signal {
            cycle,
            direction: prediction.direction,
            test_accuracy: prediction.test_accuracy,
        });

        match self
            .dispatcher
            .dispatch(&params.symbol, prediction.direction, params.lot_size)
            .await
        {
            Ok(record) => CycleOutcome::Executed(record),
            Err(error) => {
                self.journal.publish(LoopEvent::OrderFailed {
                    cycle,
                    reason: error.to_string(),
                });
                tracing::warn!(cycle, "Order not placed: {}", error);
                CycleOutcome::Skipped {
                    stage: CycleStage::Dispatch,
                    error,
                }
            }
        }
    }

    fn skip(&self, cycle: u64, stage: CycleStage, error: TradingError) -> CycleOutcome {
        if error.is_data_side() {
            tracing::error!(cycle, "No data fetched, retrying next cycle: {}", error);
        } else {
            tracing::warn!(cycle, ?stage, "No trading signal generated: {}", error);
        }
        self.journal.publish(LoopEvent::CycleSkipped {
            cycle,
            reason: error.to_string(),
        });
        CycleOutcome::Skipped { stage, error }
    }

    /// Connected → Looping; spawns the loop on a background task
    pub fn start(mut self) -> Result<LoopHandle> {
        if self.state != LoopState::Connected {
            return Err(TradingError::ConnectionFailure(
                "connect to the terminal before starting the loop".to_string(),
            ));
        }
        self.state = LoopState::Looping;

        tracing::info!(
            symbol = %self.params.symbol,
            timeframe = %self.params.timeframe,
            "Starting continuous trading"
        );

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let task = tokio::spawn(self.run(cancel_rx));
        Ok(LoopHandle {
            cancel: cancel_tx,
            task,
        })
    }

    async fn run(mut self, mut cancel: watch::Receiver<bool>) -> Self {
        let period = Duration::from_secs(self.params.timeframe.seconds());
        let mut ticker = interval_at(Instant::now(), period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut cycle = 0u64;

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = cancel.changed() => break,
            }
            if *cancel.borrow() {
                break;
            }

            cycle += 1;
            if let CycleOutcome::Executed(record) = self.run_cycle(cycle).await {
                tracing::debug!(cycle, ticket = record.ticket, "Cycle executed a trade");
            }
            tracing::info!(
                "Waiting {} minutes before the next cycle...",
                period.as_secs() / 60
            );
        }

        tracing::info!(cycles = cycle, "Trading loop stopped");
        self.journal.publish(LoopEvent::Stopped);
        self.state = LoopState::Connected;
        self
    }
}

/// Control handle for a running loop
pub struct LoopHandle {
    cancel: watch::Sender<bool>,
    task: JoinHandle<TradingLoop>,
}

impl LoopHandle {
    /// Cancel, wait for the in-flight cycle to finish, and disconnect (Looping → Idle)
    pub async fn stop(self) -> std::result::Result<TradingLoop, JoinError> {
        let _ = self.cancel.send(true);
        let mut trading_loop = self.task.await?;
        trading_loop.disconnect().await;
        Ok(trading_loop)
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::PaperBroker;
    use crate::execution::journal::journal;
    use crate::models::Bar;
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};

    fn credentials() -> Credentials {
        Credentials {
            account_id: 123456789,
            password: "paper".to_string(),
            server: "MetaQuotes-Demo".to_string(),
        }
    }

    fn bars_from_closes(closes: &[f64]) -> Vec<Bar> {
        let start = Utc.with_ymd_and_hms(2025, 2, 7, 0, 0, 0).unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, &close)| Bar {
                timestamp: start + ChronoDuration::minutes(15 * i as i64),
                open: close,
                high: close,
                low: close,
                close,
                volume: 100,
                spread: 0,
                real_volume: 0,
            })
            .collect()
    }

    fn alternating_bars(n: usize) -> Vec<Bar> {
        let mut closes = vec![100.0];
        for i in 1..n {
            let prev = closes[i - 1];
            closes.push(if i % 2 == 1 { prev * 1.01 } else { prev * 0.99 });
        }
        bars_from_closes(&closes)
    }

    fn params() -> TradingParams {
        TradingParams {
            symbol: "EURUSD".to_string(),
            ..TradingParams::default()
        }
    }

    #[test]
    fn test_params_validation() {
        assert!(params().validate().is_ok());

        let mut bad = params();
        bad.lot_size = 0.0;
        assert!(bad.validate().is_err());

        let mut bad = params();
        bad.bar_count = 5;
        assert!(bad.validate().is_err());

        let mut bad = params();
        bad.bar_count = MAX_BAR_COUNT + 1;
        assert!(bad.validate().is_err());
    }

    #[tokio::test]
    async fn test_connect_moves_to_connected() {
        let broker = Arc::new(PaperBroker::default());
        let (journal, _history) = journal();
        let mut trading_loop = TradingLoop::new(broker, params(), journal).unwrap();

        assert_eq!(trading_loop.state(), LoopState::Idle);
        let account = trading_loop.connect(&credentials()).await.unwrap();
        assert_eq!(account.login, 123456789);
        assert_eq!(trading_loop.state(), LoopState::Connected);
    }

    #[tokio::test]
    async fn test_start_requires_connection() {
        let broker = Arc::new(PaperBroker::default());
        let (journal, _history) = journal();
        let trading_loop = TradingLoop::new(broker, params(), journal).unwrap();

        assert!(trading_loop.start().is_err());
    }

    #[tokio::test]
    async fn test_failed_fetch_stops_before_dispatch() {
        let broker = Arc::new(PaperBroker::default().failing_fetches());
        let (journal, mut history) = journal();
        let mut trading_loop = TradingLoop::new(broker.clone(), params(), journal).unwrap();
        trading_loop.connect(&credentials()).await.unwrap();

        let outcome = trading_loop.run_cycle(1).await;

        assert!(matches!(
            outcome,
            CycleOutcome::Skipped {
                stage: CycleStage::Fetch,
                error: TradingError::DataUnavailable(_)
            }
        ));
        let calls = broker.calls().await;
        assert_eq!(calls.fetches, 1);
        assert_eq!(calls.quotes, 0);
        assert_eq!(calls.orders, 0);

        let events = history.drain();
        assert!(!events.iter().any(|e| matches!(e, LoopEvent::Signal { .. })));
    }

    #[tokio::test]
    async fn test_single_class_history_skips_at_classifier() {
        let closes: Vec<f64> = (0..100).map(|i| 100.0 + i as f64).collect();
        let broker = Arc::new(PaperBroker::default().with_bars("EURUSD", bars_from_closes(&closes)));
        let (journal, _history) = journal();
        let mut trading_loop = TradingLoop::new(broker.clone(), params(), journal).unwrap();
        trading_loop.connect(&credentials()).await.unwrap();

        let outcome = trading_loop.run_cycle(1).await;

        assert!(matches!(
            outcome,
            CycleOutcome::Skipped {
                stage: CycleStage::Classify,
                error: TradingError::InsufficientData(_)
            }
        ));
        assert_eq!(broker.calls().await.orders, 0);
    }

    #[tokio::test]
    async fn test_cycle_executes_predicted_trade() {
        let broker =
            Arc::new(PaperBroker::default().with_bars("EURUSD", alternating_bars(1000)));
        let (journal, mut history) = journal();
        let mut trading_loop = TradingLoop::new(broker.clone(), params(), journal).unwrap();
        trading_loop.connect(&credentials()).await.unwrap();

        let outcome = trading_loop.run_cycle(1).await;

        // Last change is +1%, so the alternating pattern calls for a down move
        match outcome {
            CycleOutcome::Executed(record) => {
                assert_eq!(record.direction, crate::models::Direction::Down);
                assert!(record.take_profit < record.entry_price);
            }
            other => panic!("expected a trade, got {:?}", other),
        }
        history.drain();
        assert_eq!(history.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_runs_on_period_until_stopped() {
        let broker =
            Arc::new(PaperBroker::default().with_bars("EURUSD", alternating_bars(1000)));
        let (journal, mut history) = journal();
        let mut trading_loop = TradingLoop::new(broker.clone(), params(), journal).unwrap();
        trading_loop.connect(&credentials()).await.unwrap();

        let handle = trading_loop.start().unwrap();
        // Cycles at t = 0, 900, 1800 and 2700 seconds
        tokio::time::sleep(Duration::from_secs(900 * 3 + 10)).await;
        let trading_loop = handle.stop().await.unwrap();

        assert_eq!(trading_loop.state(), LoopState::Idle);
        assert!(!broker.is_connected().await);

        let events = history.drain();
        assert_eq!(history.len(), 4);
        assert_eq!(broker.calls().await.fetches, 4);
        assert_eq!(events.last(), Some(&LoopEvent::Stopped));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_fetches_do_not_end_loop() {
        let broker = Arc::new(PaperBroker::default().failing_fetches());
        let (journal, mut history) = journal();
        let mut trading_loop = TradingLoop::new(broker.clone(), params(), journal).unwrap();
        trading_loop.connect(&credentials()).await.unwrap();

        let handle = trading_loop.start().unwrap();
        tokio::time::sleep(Duration::from_secs(900 * 2 + 10)).await;
        assert!(!handle.is_finished());
        handle.stop().await.unwrap();

        let skipped = history
            .drain()
            .into_iter()
            .filter(|e| matches!(e, LoopEvent::CycleSkipped { .. }))
            .count();
        assert_eq!(skipped, 3);
        assert!(history.is_empty());
    }
}
