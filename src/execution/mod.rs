// Order dispatch, trade journal and the trading loop controller
pub mod dispatcher;
pub mod journal;
pub mod trading_loop;

pub use dispatcher::{build_order, entry_and_take_profit, OrderDispatcher, TAKE_PROFIT_OFFSET};
pub use journal::{journal, Journal, LoopEvent, TradeHistory};
pub use trading_loop::{
    CycleOutcome, CycleStage, LoopHandle, LoopState, TradingLoop, TradingParams,
};
