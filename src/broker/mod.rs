// Broker capability interface and its implementations
pub mod bridge;
pub mod paper;

pub use bridge::BridgeClient;
pub use paper::PaperBroker;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{AccountInfo, Bar, Credentials, OrderRequest, OrderResult, Quote, Timeframe};

/// Upper bound on bars requested in a single fetch
pub const MAX_BAR_COUNT: usize = 100_000;

/// Operations the trading cycle consumes from a brokerage terminal
#[async_trait]
pub trait Broker: Send + Sync {
    /// Log in to the terminal
    async fn connect(&self, credentials: &Credentials) -> Result<()>;

    /// Snapshot of the logged-in account
    async fn account_info(&self) -> Result<AccountInfo>;

    /// The most recent `count` bars, oldest first
    async fn fetch_bars(&self, symbol: &str, timeframe: Timeframe, count: usize)
        -> Result<Vec<Bar>>;

    /// Current bid/ask; `UnknownSymbol` if the terminal doesn't list it
    async fn quote(&self, symbol: &str) -> Result<Quote>;

    /// Submit an order and return the terminal's response verbatim
    async fn submit_order(&self, order: &OrderRequest) -> Result<OrderResult>;

    /// Close the terminal connection
    async fn shutdown(&self);

    /// Broker name for logging
    fn name(&self) -> &str;
}
