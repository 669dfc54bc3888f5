use tokio::sync::mpsc;

use crate::models::{Direction, TradeRecord};

/// Event published by the trading loop to the display layer
#[derive(Debug, Clone, PartialEq)]
pub enum LoopEvent {
    CycleStarted { cycle: u64 },
    CycleSkipped { cycle: u64, reason: String },
    Signal {
        cycle: u64,
        direction: Direction,
        test_accuracy: Option<f64>,
    },
    TradeExecuted(TradeRecord),
    OrderFailed { cycle: u64, reason: String },
    Stopped,
}

/// Create the single-writer journal and the history that drains it
pub fn journal() -> (Journal, TradeHistory) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        Journal { tx },
        TradeHistory {
            rx,
            trades: Vec::new(),
        },
    )
}

/// Writing end, owned by the trading loop
#[derive(Clone)]
pub struct Journal {
    tx: mpsc::UnboundedSender<LoopEvent>,
}

impl Journal {
    /// Publish an event; a dropped display is not an error for the loop
    pub fn publish(&self, event: LoopEvent) {
        if self.tx.send(event).is_err() {
            tracing::debug!("Trade history receiver dropped, event discarded");
        }
    }

    pub fn record_trade(&self, record: TradeRecord) {
        self.publish(LoopEvent::TradeExecuted(record));
    }
}

/// Session-scoped trade history, read side of the journal
///
/// Only the loop writes; the display drains pending events and keeps the
/// executed trades in arrival order.
pub struct TradeHistory {
    rx: mpsc::UnboundedReceiver<LoopEvent>,
    trades: Vec<TradeRecord>,
}

impl TradeHistory {
    /// Take every event already queued without waiting
    pub fn drain(&mut self) -> Vec<LoopEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            self.absorb(&event);
            events.push(event);
        }
        events
    }

    /// Wait for the next event; `None` once every journal handle is gone
    pub async fn next_event(&mut self) -> Option<LoopEvent> {
        let event = self.rx.recv().await?;
        self.absorb(&event);
        Some(event)
    }

    pub fn trades(&self) -> &[TradeRecord] {
        &self.trades
    }

    pub fn len(&self) -> usize {
        self.trades.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trades.is_empty()
    }

    fn absorb(&mut self, event: &LoopEvent) {
        if let LoopEvent::TradeExecuted(record) = event {
            self.trades.push(record.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TradeStatus;
    use chrono::Utc;
    use uuid::Uuid;

    fn record(price: f64) -> TradeRecord {
        TradeRecord {
            id: Uuid::new_v4(),
            symbol: "EURUSD".to_string(),
            direction: Direction::Up,
            entry_price: price,
            take_profit: price + 0.0001,
            lot_size: 0.1,
            ticket: 1,
            status: TradeStatus::Executed,
            executed_at: Utc::now(),
        }
    }

    #[test]
    fn test_drain_keeps_only_trades() {
        let (journal, mut history) = journal();
        journal.publish(LoopEvent::CycleStarted { cycle: 1 });
        journal.record_trade(record(1.1));
        journal.publish(LoopEvent::CycleSkipped {
            cycle: 2,
            reason: "no data".to_string(),
        });

        let events = history.drain();
        assert_eq!(events.len(), 3);
        assert_eq!(history.len(), 1);
        assert_eq!(history.trades()[0].entry_price, 1.1);
        assert!(history.drain().is_empty());
    }

    #[test]
    fn test_publish_after_history_dropped() {
        let (journal, history) = journal();
        drop(history);
        journal.record_trade(record(1.0));
    }

    #[tokio::test]
    async fn test_concurrent_writer_and_reader() {
        let (journal, mut history) = journal();

        let writer = tokio::spawn(async move {
            for i in 0..500 {
                journal.record_trade(record(1.0 + i as f64));
                if i % 50 == 0 {
                    tokio::task::yield_now().await;
                }
            }
        });

        // Drain while the writer is still publishing
        while history.next_event().await.is_some() {}
        writer.await.unwrap();

        assert_eq!(history.len(), 500);
        assert_eq!(history.trades()[499].entry_price, 500.0);
    }
}
