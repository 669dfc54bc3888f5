use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::TradingError;

/// One OHLCV price observation for a fixed interval
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64, // tick volume
    #[serde(default)]
    pub spread: i64,
    #[serde(default)]
    pub real_volume: u64,
}

/// Predicted or observed direction of the next bar
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    /// Up iff the change is strictly positive; zero counts as Down
    pub fn from_change(pct_change: f64) -> Self {
        if pct_change > 0.0 {
            Direction::Up
        } else {
            Direction::Down
        }
    }

    pub fn side(self) -> OrderSide {
        match self {
            Direction::Up => OrderSide::Buy,
            Direction::Down => OrderSide::Sell,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Up => write!(f, "U"),
            Direction::Down => write!(f, "D"),
        }
    }
}

/// Bar timeframes supported by the terminal
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Timeframe {
    M1,
    M2,
    M3,
    M4,
    M5,
    M6,
    M10,
    M12,
    M15,
    M20,
    M30,
    H1,
    H2,
    H3,
    H4,
    H6,
    H8,
    H12,
    D1,
    W1,
    MN1,
}

// Hour, week and month codes carry a flag in the high bits of the minute count
const HOUR_FLAG: u32 = 0x4000;
const WEEK_FLAG: u32 = 0x8000;
const MONTH_FLAG: u32 = 0xC000;

impl Timeframe {
    pub const ALL: [Timeframe; 21] = [
        Timeframe::M1,
        Timeframe::M2,
        Timeframe::M3,
        Timeframe::M4,
        Timeframe::M5,
        Timeframe::M6,
        Timeframe::M10,
        Timeframe::M12,
        Timeframe::M15,
        Timeframe::M20,
        Timeframe::M30,
        Timeframe::H1,
        Timeframe::H2,
        Timeframe::H3,
        Timeframe::H4,
        Timeframe::H6,
        Timeframe::H8,
        Timeframe::H12,
        Timeframe::D1,
        Timeframe::W1,
        Timeframe::MN1,
    ];

    /// Length of one bar in seconds (also the trading loop period)
    ///
    /// A month is counted as 30 days.
    pub fn seconds(self) -> u64 {
        const MINUTE: u64 = 60;
        const HOUR: u64 = 60 * MINUTE;
        const DAY: u64 = 24 * HOUR;
        match self {
            Timeframe::M1 => MINUTE,
            Timeframe::M2 => 2 * MINUTE,
            Timeframe::M3 => 3 * MINUTE,
            Timeframe::M4 => 4 * MINUTE,
            Timeframe::M5 => 5 * MINUTE,
            Timeframe::M6 => 6 * MINUTE,
            Timeframe::M10 => 10 * MINUTE,
            Timeframe::M12 => 12 * MINUTE,
            Timeframe::M15 => 15 * MINUTE,
            Timeframe::M20 => 20 * MINUTE,
            Timeframe::M30 => 30 * MINUTE,
            Timeframe::H1 => HOUR,
            Timeframe::H2 => 2 * HOUR,
            Timeframe::H3 => 3 * HOUR,
            Timeframe::H4 => 4 * HOUR,
            Timeframe::H6 => 6 * HOUR,
            Timeframe::H8 => 8 * HOUR,
            Timeframe::H12 => 12 * HOUR,
            Timeframe::D1 => DAY,
            Timeframe::W1 => 7 * DAY,
            Timeframe::MN1 => 30 * DAY,
        }
    }

    /// Numeric timeframe constant used on the terminal wire
    pub fn code(self) -> u32 {
        match self {
            Timeframe::M1 => 1,
            Timeframe::M2 => 2,
            Timeframe::M3 => 3,
            Timeframe::M4 => 4,
            Timeframe::M5 => 5,
            Timeframe::M6 => 6,
            Timeframe::M10 => 10,
            Timeframe::M12 => 12,
            Timeframe::M15 => 15,
            Timeframe::M20 => 20,
            Timeframe::M30 => 30,
            Timeframe::H1 => HOUR_FLAG | 1,
            Timeframe::H2 => HOUR_FLAG | 2,
            Timeframe::H3 => HOUR_FLAG | 3,
            Timeframe::H4 => HOUR_FLAG | 4,
            Timeframe::H6 => HOUR_FLAG | 6,
            Timeframe::H8 => HOUR_FLAG | 8,
            Timeframe::H12 => HOUR_FLAG | 12,
            Timeframe::D1 => HOUR_FLAG | 24,
            Timeframe::W1 => WEEK_FLAG | 1,
            Timeframe::MN1 => MONTH_FLAG | 1,
        }
    }

    pub fn from_code(code: u32) -> Result<Self, TradingError> {
        Self::ALL
            .into_iter()
            .find(|tf| tf.code() == code)
            .ok_or_else(|| TradingError::InvalidParameter(format!("unknown timeframe code {code}")))
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl FromStr for Timeframe {
    type Err = TradingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        if let Some(tf) = Self::ALL.into_iter().find(|tf| tf.to_string() == upper) {
            return Ok(tf);
        }
        match upper.parse::<u32>() {
            Ok(code) => Self::from_code(code),
            Err(_) => Err(TradingError::InvalidParameter(format!("unknown timeframe {s}"))),
        }
    }
}

/// Current bid/ask for a symbol
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Quote {
    pub symbol: String,
    pub bid: f64,
    pub ask: f64,
    pub digits: u32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// Terminal order type constant (0 = buy, 1 = sell)
    pub fn code(self) -> u8 {
        match self {
            OrderSide::Buy => 0,
            OrderSide::Sell => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TimeInForce {
    GoodTillCancelled,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FillPolicy {
    ImmediateOrCancel,
}

/// Market order as submitted to the broker
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderRequest {
    pub symbol: String,
    pub volume: f64,
    pub side: OrderSide,
    pub price: f64,
    pub take_profit: f64,
    pub deviation: u32,
    pub magic: u64,
    pub comment: String,
    pub time_in_force: TimeInForce,
    pub filling: FillPolicy,
}

/// Terminal return code for a completed request
pub const RETCODE_DONE: u32 = 10009;

/// Broker response to an order submission
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderResult {
    pub retcode: u32,
    #[serde(default)]
    pub order: u64,
    #[serde(default)]
    pub price: f64,
    #[serde(default)]
    pub volume: f64,
    #[serde(default)]
    pub comment: String,
}

impl OrderResult {
    pub fn is_done(&self) -> bool {
        self.retcode == RETCODE_DONE
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum TradeStatus {
    Executed,
}

/// Record of one executed order, kept for the lifetime of the session
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TradeRecord {
    pub id: Uuid,
    pub symbol: String,
    pub direction: Direction,
    pub entry_price: f64,
    pub take_profit: f64,
    pub lot_size: f64,
    pub ticket: u64,
    pub status: TradeStatus,
    pub executed_at: DateTime<Utc>,
}

/// Trading account snapshot reported after login
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AccountInfo {
    pub login: u64,
    pub server: String,
    #[serde(default)]
    pub name: String,
    pub currency: String,
    pub balance: f64,
    pub equity: f64,
    #[serde(default)]
    pub margin: f64,
    #[serde(default)]
    pub free_margin: f64,
    #[serde(default)]
    pub leverage: u32,
}

/// Terminal login credentials
#[derive(Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub account_id: u64,
    pub password: String,
    pub server: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("account_id", &self.account_id)
            .field("password", &"***")
            .field("server", &self.server)
            .finish()
    }
}
