use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use knntrader::classifier::{ClassifierConfig, WindowClassifier};
use knntrader::execution::{journal, LoopEvent, TradingLoop, TradingParams};
use knntrader::features::build_features;
use knntrader::*;
use std::sync::Arc;
use tokio::time::Duration;

fn credentials() -> Credentials {
    Credentials {
        account_id: 123456789,
        password: "paper".to_string(),
        server: "MetaQuotes-Demo".to_string(),
    }
}

/// Closes alternating +1% / -1%, starting with an up move
fn alternating_bars(n: usize) -> Vec<Bar> {
    let start = Utc.with_ymd_and_hms(2025, 2, 7, 0, 0, 0).unwrap();
    let mut close = 100.0;
    (0..n)
        .map(|i| {
            if i > 0 {
                close *= if i % 2 == 1 { 1.01 } else { 0.99 };
            }
            Bar {
                timestamp: start + ChronoDuration::minutes(15 * i as i64),
                open: close,
                high: close,
                low: close,
                close,
                volume: 100,
                spread: 0,
                real_volume: 0,
            }
        })
        .collect()
}

fn params() -> TradingParams {
    TradingParams {
        symbol: "EURUSD".to_string(),
        timeframe: Timeframe::M15,
        bar_count: 1000,
        lot_size: 0.1,
        classifier: ClassifierConfig::default(),
    }
}

#[test]
fn test_alternating_series_trailing_window() {
    let rows = build_features(&alternating_bars(1000));
    assert_eq!(rows.len(), 999);

    let classifier = WindowClassifier::new(ClassifierConfig::default());
    let first = classifier.predict(&rows).unwrap();
    let second = classifier.predict(&rows).unwrap();

    assert_eq!(first.latest_window.len(), 10);
    for (i, change) in first.latest_window.iter().enumerate() {
        let expected = if i % 2 == 0 { -1.0 } else { 1.0 };
        assert!((change - expected).abs() < 1e-9, "window[{}] = {}", i, change);
    }
    assert_eq!(first, second);
    assert_eq!(first.direction, Direction::Down);
}

#[tokio::test(start_paused = true)]
async fn test_e2e_trading_session() {
    let _ = tracing_subscriber::fmt::try_init();

    println!("=== Starting E2E Test ===\n");

    // 1. Connect
    println!("1. Connecting to paper terminal...");
    let broker = Arc::new(PaperBroker::default().with_bars("EURUSD", alternating_bars(1000)));
    let (journal, mut history) = journal();
    let mut trading_loop = TradingLoop::new(broker.clone(), params(), journal).unwrap();
    let account = trading_loop.connect(&credentials()).await.unwrap();
    println!("   ✓ Account #{} on {}", account.login, account.server);
    assert_eq!(trading_loop.state(), LoopState::Connected);

    // 2. Run while the display drains concurrently
    println!("\n2. Running the loop for five periods...");
    let handle = trading_loop.start().unwrap();
    let display = tokio::spawn(async move {
        let mut seen = 0;
        while let Some(event) = history.next_event().await {
            if matches!(event, LoopEvent::TradeExecuted(_)) {
                seen += 1;
            }
            if event == LoopEvent::Stopped {
                break;
            }
        }
        (history, seen)
    });

    tokio::time::sleep(Duration::from_secs(900 * 4 + 30)).await;

    // 3. Stop
    println!("\n3. Stopping...");
    let trading_loop = handle.stop().await.unwrap();
    assert_eq!(trading_loop.state(), LoopState::Idle);

    let (history, seen) = display.await.unwrap();
    let orders = broker.calls().await.orders;
    println!("   ✓ {} orders, {} trades in history", orders, history.len());

    assert_eq!(orders, 5);
    assert_eq!(seen, 5);
    assert_eq!(history.len(), 5);

    for trade in history.trades() {
        assert_eq!(trade.symbol, "EURUSD");
        assert_eq!(trade.direction, Direction::Down);
        assert_eq!(trade.lot_size, 0.1);
        assert!(trade.take_profit < trade.entry_price);
    }

    let tickets: Vec<u64> = history.trades().iter().map(|t| t.ticket).collect();
    let mut sorted = tickets.clone();
    sorted.sort_unstable();
    sorted.dedup();
    assert_eq!(tickets.len(), sorted.len());

    println!("\n=== E2E Test Complete ===");
}

#[tokio::test(start_paused = true)]
async fn test_rejected_orders_leave_history_empty() {
    let broker = Arc::new(
        PaperBroker::default()
            .with_bars("EURUSD", alternating_bars(1000))
            .rejecting_orders(10019),
    );
    let (journal, mut history) = journal();
    let mut trading_loop = TradingLoop::new(broker.clone(), params(), journal).unwrap();
    trading_loop.connect(&credentials()).await.unwrap();

    let handle = trading_loop.start().unwrap();
    tokio::time::sleep(Duration::from_secs(900 + 30)).await;
    handle.stop().await.unwrap();

    let failures = history
        .drain()
        .into_iter()
        .filter(|e| matches!(e, LoopEvent::OrderFailed { .. }))
        .count();
    assert_eq!(failures, 2);
    assert_eq!(broker.calls().await.orders, 2);
    assert!(history.is_empty());
}
