//! Error taxonomy for the trading cycle

use thiserror::Error;

/// Errors raised by the broker, the classifier and the dispatcher
#[derive(Error, Debug)]
pub enum TradingError {
    #[error("connection failure: {0}")]
    ConnectionFailure(String),

    #[error("no data available: {0}")]
    DataUnavailable(String),

    #[error("insufficient data: {0}")]
    InsufficientData(String),

    #[error("symbol {0} not found")]
    UnknownSymbol(String),

    #[error("order rejected with retcode {retcode}: {comment}")]
    OrderRejected { retcode: u32, comment: String },

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("model error: {0}")]
    Model(String),

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("malformed payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

impl TradingError {
    /// Whether the loop should treat this as "broker unreachable / no data"
    /// rather than a problem with the decision itself
    pub fn is_data_side(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailure(_)
                | Self::DataUnavailable(_)
                | Self::Transport(_)
                | Self::Payload(_)
        )
    }
}

/// Result type alias for library operations
pub type Result<T> = std::result::Result<T, TradingError>;
