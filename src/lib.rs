// Core modules
pub mod broker;
pub mod classifier;
pub mod config;
pub mod error;
pub mod execution;
pub mod features;
pub mod models;
pub mod server;

// Re-export commonly used types
pub use broker::{Broker, BridgeClient, PaperBroker};
pub use classifier::{ClassifierConfig, Prediction, WindowClassifier};
pub use error::{Result, TradingError};
pub use execution::{LoopHandle, LoopState, OrderDispatcher, TradeHistory, TradingLoop, TradingParams};
pub use models::*;
