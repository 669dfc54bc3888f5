use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

use super::journal::Journal;
use crate::broker::Broker;
use crate::error::{Result, TradingError};
use crate::models::{
    Direction, FillPolicy, OrderRequest, Quote, TimeInForce, TradeRecord, TradeStatus,
};

/// Fixed take-profit distance from entry, in price units
///
/// Not scaled to the instrument's tick size or volatility.
pub const TAKE_PROFIT_OFFSET: f64 = 0.00010;
/// Maximum accepted slippage, in points
pub const PRICE_DEVIATION: u32 = 20;
/// Expert id stamped on every order
pub const ORDER_MAGIC: u64 = 234000;
pub const MIN_LOT: f64 = 0.01;
const LOT_STEP: f64 = 0.01;
// Decimals needed to represent the take-profit offset
const OFFSET_DECIMALS: u32 = 5;

/// Lot must be positive and on the 0.01 step
pub fn validate_lot_size(lot_size: f64) -> Result<()> {
    if !lot_size.is_finite() || lot_size < MIN_LOT - 1e-9 {
        return Err(TradingError::InvalidParameter(format!(
            "lot size {} below minimum {}",
            lot_size, MIN_LOT
        )));
    }
    let steps = lot_size / LOT_STEP;
    if (steps - steps.round()).abs() > 1e-6 {
        return Err(TradingError::InvalidParameter(format!(
            "lot size {} is not a multiple of {}",
            lot_size, LOT_STEP
        )));
    }
    Ok(())
}

fn round_price(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}

/// Entry at the ask for Up, the bid for Down; take-profit offset in the trade's favour
pub fn entry_and_take_profit(direction: Direction, quote: &Quote) -> (f64, f64) {
    let decimals = quote.digits.max(OFFSET_DECIMALS);
    match direction {
        Direction::Up => (quote.ask, round_price(quote.ask + TAKE_PROFIT_OFFSET, decimals)),
        Direction::Down => (quote.bid, round_price(quote.bid - TAKE_PROFIT_OFFSET, decimals)),
    }
}

/// Market order for a predicted direction at the current quote
pub fn build_order(symbol: &str, direction: Direction, lot_size: f64, quote: &Quote) -> OrderRequest {
    let (price, take_profit) = entry_and_take_profit(direction, quote);
    let comment = match direction {
        Direction::Up => "KNN Buy Order",
        Direction::Down => "KNN Sell Order",
    };

    OrderRequest {
        symbol: symbol.to_string(),
        volume: lot_size,
        side: direction.side(),
        price,
        take_profit,
        deviation: PRICE_DEVIATION,
        magic: ORDER_MAGIC,
        comment: comment.to_string(),
        time_in_force: TimeInForce::GoodTillCancelled,
        filling: FillPolicy::ImmediateOrCancel,
    }
}

/// Turns a predicted direction into a submitted market order
pub struct OrderDispatcher {
    broker: Arc<dyn Broker>,
    journal: Journal,
}

impl OrderDispatcher {
    pub fn new(broker: Arc<dyn Broker>, journal: Journal) -> Self {
        Self { broker, journal }
    }

    /// Quote, build, submit; record the trade only when the terminal reports done
    pub async fn dispatch(
        &self,
        symbol: &str,
        direction: Direction,
        lot_size: f64,
    ) -> Result<TradeRecord> {
        validate_lot_size(lot_size)?;

        let quote = self.broker.quote(symbol).await?;
        let order = build_order(symbol, direction, lot_size, &quote);
        let result = self.broker.submit_order(&order).await?;

        if !result.is_done() {
            tracing::warn!(
                symbol = %symbol,
                retcode = result.retcode,
                "Trade failed: {}",
                result.comment
            );
            return Err(TradingError::OrderRejected {
                retcode: result.retcode,
                comment: result.comment,
            });
        }

        let record = TradeRecord {
            id: Uuid::new_v4(),
            symbol: symbol.to_string(),
            direction,
            entry_price: order.price,
            take_profit: order.take_profit,
            lot_size,
            ticket: result.order,
            status: TradeStatus::Executed,
            executed_at: Utc::now(),
        };

        tracing::info!(
            "Trade executed: {} at price {} with TP {}",
            order.comment,
            order.price,
            order.take_profit
        );
        self.journal.record_trade(record.clone());
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::PaperBroker;
    use crate::execution::journal::journal;
    use crate::models::{Credentials, OrderSide};

    fn quote(bid: f64, ask: f64, digits: u32) -> Quote {
        Quote {
            symbol: "EURUSD".to_string(),
            bid,
            ask,
            digits,
        }
    }

    async fn connected_paper(broker: PaperBroker) -> Arc<PaperBroker> {
        let broker = Arc::new(broker);
        broker
            .connect(&Credentials {
                account_id: 1,
                password: "paper".to_string(),
                server: "Paper".to_string(),
            })
            .await
            .unwrap();
        broker
    }

    #[test]
    fn test_take_profit_exact_for_up() {
        let q = quote(99.99990, 100.00000, 5);
        for _ in 0..1000 {
            let (entry, tp) = entry_and_take_profit(Direction::Up, &q);
            assert_eq!(entry, 100.0);
            assert_eq!(tp, 100.00010);
        }
    }

    #[test]
    fn test_take_profit_for_down_uses_bid() {
        let q = quote(1.08000, 1.08002, 5);
        let (entry, tp) = entry_and_take_profit(Direction::Down, &q);
        assert_eq!(entry, 1.08);
        assert_eq!(tp, 1.0799);
    }

    #[test]
    fn test_low_precision_symbol_keeps_offset() {
        let q = quote(97000.00, 97000.50, 2);
        let (_, tp) = entry_and_take_profit(Direction::Up, &q);
        assert_eq!(tp, 97000.5001);
    }

    #[test]
    fn test_build_order_fields() {
        let q = quote(1.1, 1.2, 5);
        let order = build_order("EURUSD", Direction::Down, 0.1, &q);

        assert_eq!(order.side, OrderSide::Sell);
        assert_eq!(order.price, 1.1);
        assert_eq!(order.deviation, 20);
        assert_eq!(order.magic, 234000);
        assert_eq!(order.comment, "KNN Sell Order");
        assert_eq!(order.filling, FillPolicy::ImmediateOrCancel);
    }

    #[test]
    fn test_lot_size_validation() {
        assert!(validate_lot_size(0.01).is_ok());
        assert!(validate_lot_size(0.1).is_ok());
        assert!(validate_lot_size(1.37).is_ok());
        assert!(validate_lot_size(0.0).is_err());
        assert!(validate_lot_size(-0.1).is_err());
        assert!(validate_lot_size(0.015).is_err());
    }

    #[tokio::test]
    async fn test_dispatch_records_trade() {
        let broker = connected_paper(PaperBroker::default()).await;
        let (journal, mut history) = journal();
        let dispatcher = OrderDispatcher::new(broker.clone(), journal);

        let record = dispatcher
            .dispatch("EURUSD", Direction::Up, 0.1)
            .await
            .unwrap();

        assert_eq!(record.status, TradeStatus::Executed);
        assert_eq!(record.lot_size, 0.1);
        assert!(record.take_profit > record.entry_price);
        history.drain();
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn test_rejected_order_not_recorded() {
        let broker = connected_paper(PaperBroker::default().rejecting_orders(10006)).await;
        let (journal, mut history) = journal();
        let dispatcher = OrderDispatcher::new(broker.clone(), journal);

        let err = dispatcher
            .dispatch("EURUSD", Direction::Down, 0.1)
            .await
            .unwrap_err();

        assert!(matches!(err, TradingError::OrderRejected { retcode: 10006, .. }));
        history.drain();
        assert!(history.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_symbol_never_submits() {
        let broker = connected_paper(PaperBroker::default()).await;
        let (journal, _history) = journal();
        let dispatcher = OrderDispatcher::new(broker.clone(), journal);

        let err = dispatcher
            .dispatch("XAUUSD", Direction::Up, 0.1)
            .await
            .unwrap_err();

        assert!(matches!(err, TradingError::UnknownSymbol(_)));
        assert_eq!(broker.calls().await.orders, 0);
    }

    #[tokio::test]
    async fn test_invalid_lot_never_quotes() {
        let broker = connected_paper(PaperBroker::default()).await;
        let (journal, _history) = journal();
        let dispatcher = OrderDispatcher::new(broker.clone(), journal);

        assert!(dispatcher.dispatch("EURUSD", Direction::Up, 0.0).await.is_err());
        assert_eq!(broker.calls().await.quotes, 0);
    }
}
