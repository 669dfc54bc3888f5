use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use tokio::sync::Mutex;

use super::{Broker, MAX_BAR_COUNT};
use crate::error::{Result, TradingError};
use crate::models::{
    AccountInfo, Bar, Credentials, OrderRequest, OrderResult, Quote, Timeframe, RETCODE_DONE,
};

const PAPER_BALANCE: f64 = 10_000.0;
const STEP_VOLATILITY_PCT: f64 = 0.5; // max move per bar, percent

/// Number of calls made against the paper terminal
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub fetches: usize,
    pub quotes: usize,
    pub orders: usize,
}

struct PaperSymbol {
    last_price: f64,
    digits: u32,
    scripted: Option<Vec<Bar>>,
}

struct PaperState {
    connected: bool,
    login: u64,
    server: String,
    rng: StdRng,
    symbols: HashMap<String, PaperSymbol>,
    fail_fetches: bool,
    reject_retcode: Option<u32>,
    calls: CallCounts,
    next_ticket: u64,
}

/// In-memory simulated terminal
///
/// Generates seeded random-walk bars, fills every order at the requested
/// price, and can be told to fail fetches or reject orders.
pub struct PaperBroker {
    state: Mutex<PaperState>,
}

impl PaperBroker {
    /// Create a paper terminal listing BTCUSD and EURUSD
    pub fn new(seed: u64) -> Self {
        let mut symbols = HashMap::new();
        symbols.insert(
            "BTCUSD".to_string(),
            PaperSymbol {
                last_price: 97_000.0,
                digits: 2,
                scripted: None,
            },
        );
        symbols.insert(
            "EURUSD".to_string(),
            PaperSymbol {
                last_price: 1.08,
                digits: 5,
                scripted: None,
            },
        );

        Self {
            state: Mutex::new(PaperState {
                connected: false,
                login: 0,
                server: String::new(),
                rng: StdRng::seed_from_u64(seed),
                symbols,
                fail_fetches: false,
                reject_retcode: None,
                calls: CallCounts::default(),
                next_ticket: 1,
            }),
        }
    }

    /// List an additional symbol
    pub fn with_symbol(mut self, symbol: &str, price: f64, digits: u32) -> Self {
        self.state.get_mut().symbols.insert(
            symbol.to_string(),
            PaperSymbol {
                last_price: price,
                digits,
                scripted: None,
            },
        );
        self
    }

    /// Serve exactly these bars for `symbol` instead of a random walk
    pub fn with_bars(mut self, symbol: &str, bars: Vec<Bar>) -> Self {
        {
            let state = self.state.get_mut();
            let last_price = bars.last().map(|b| b.close).unwrap_or(1.0);
            let entry = state.symbols.entry(symbol.to_string()).or_insert(PaperSymbol {
                last_price,
                digits: 5,
                scripted: None,
            });
            entry.last_price = last_price;
            entry.scripted = Some(bars);
        }
        self
    }

    /// Every bar fetch returns no data
    pub fn failing_fetches(mut self) -> Self {
        self.state.get_mut().fail_fetches = true;
        self
    }

    /// Every order comes back with this return code
    pub fn rejecting_orders(mut self, retcode: u32) -> Self {
        self.state.get_mut().reject_retcode = Some(retcode);
        self
    }

    pub async fn calls(&self) -> CallCounts {
        self.state.lock().await.calls
    }

    pub async fn is_connected(&self) -> bool {
        self.state.lock().await.connected
    }
}

impl Default for PaperBroker {
    fn default() -> Self {
        Self::new(42)
    }
}

fn require_connected(state: &PaperState) -> Result<()> {
    if state.connected {
        Ok(())
    } else {
        Err(TradingError::ConnectionFailure(
            "paper terminal not logged in".to_string(),
        ))
    }
}

fn random_walk(
    rng: &mut StdRng,
    start_price: f64,
    timeframe: Timeframe,
    count: usize,
) -> Result<Vec<Bar>> {
    let secs = timeframe.seconds() as i64;
    let end = Utc::now().timestamp() / secs * secs;
    let first = i64::try_from(count)
        .ok()
        .and_then(|n| n.saturating_sub(1).checked_mul(secs))
        .and_then(|span| end.checked_sub(span))
        .ok_or_else(|| {
            TradingError::InvalidParameter(format!("{} bars of {} overflow the clock", count, timeframe))
        })?;

    let mut price = start_price;
    Ok((0..count)
        .filter_map(|i| {
            let open = price;
            let step = rng.gen_range(-STEP_VOLATILITY_PCT..STEP_VOLATILITY_PCT) / 100.0;
            let close = open * (1.0 + step);
            let wick = open.max(close) * rng.gen_range(0.0..0.001);
            price = close;

            let timestamp: DateTime<Utc> = DateTime::from_timestamp(first + i as i64 * secs, 0)?;
            Some(Bar {
                timestamp,
                open,
                high: open.max(close) + wick,
                low: open.min(close) - wick,
                close,
                volume: rng.gen_range(50..500),
                spread: 0,
                real_volume: 0,
            })
        })
        .collect())
}

#[async_trait]
impl Broker for PaperBroker {
    async fn connect(&self, credentials: &Credentials) -> Result<()> {
        let mut state = self.state.lock().await;
        if credentials.password.is_empty() {
            return Err(TradingError::ConnectionFailure(format!(
                "failed to connect to account #{}: empty password",
                credentials.account_id
            )));
        }
        state.connected = true;
        state.login = credentials.account_id;
        state.server = credentials.server.clone();
        tracing::info!(account = credentials.account_id, "Paper terminal login");
        Ok(())
    }

    async fn account_info(&self) -> Result<AccountInfo> {
        let state = self.state.lock().await;
        require_connected(&state)?;
        Ok(AccountInfo {
            login: state.login,
            server: state.server.clone(),
            name: "Paper Account".to_string(),
            currency: "USD".to_string(),
            balance: PAPER_BALANCE,
            equity: PAPER_BALANCE,
            margin: 0.0,
            free_margin: PAPER_BALANCE,
            leverage: 100,
        })
    }

    async fn fetch_bars(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        count: usize,
    ) -> Result<Vec<Bar>> {
        let mut state = self.state.lock().await;
        require_connected(&state)?;
        state.calls.fetches += 1;

        if count > MAX_BAR_COUNT {
            return Err(TradingError::InvalidParameter(format!(
                "{} bars requested, at most {} allowed",
                count, MAX_BAR_COUNT
            )));
        }
        if state.fail_fetches || count == 0 {
            return Err(TradingError::DataUnavailable(format!(
                "no rates for {} with timeframe {}",
                symbol, timeframe
            )));
        }

        let PaperState { rng, symbols, .. } = &mut *state;
        let entry = symbols
            .get_mut(symbol)
            .ok_or_else(|| TradingError::DataUnavailable(format!("no rates for {}", symbol)))?;

        if let Some(bars) = &entry.scripted {
            let skip = bars.len().saturating_sub(count);
            return Ok(bars[skip..].to_vec());
        }

        let bars = random_walk(rng, entry.last_price, timeframe, count)?;
        if let Some(last) = bars.last() {
            entry.last_price = last.close;
        }
        Ok(bars)
    }

    async fn quote(&self, symbol: &str) -> Result<Quote> {
        let mut state = self.state.lock().await;
        require_connected(&state)?;
        state.calls.quotes += 1;

        let entry = state
            .symbols
            .get(symbol)
            .ok_or_else(|| TradingError::UnknownSymbol(symbol.to_string()))?;
        let half_spread = 0.5 / 10f64.powi(entry.digits as i32);
        Ok(Quote {
            symbol: symbol.to_string(),
            bid: entry.last_price - half_spread,
            ask: entry.last_price + half_spread,
            digits: entry.digits,
        })
    }

    async fn submit_order(&self, order: &OrderRequest) -> Result<OrderResult> {
        let mut state = self.state.lock().await;
        require_connected(&state)?;
        state.calls.orders += 1;

        if let Some(retcode) = state.reject_retcode {
            return Ok(OrderResult {
                retcode,
                order: 0,
                price: 0.0,
                volume: 0.0,
                comment: "Request rejected".to_string(),
            });
        }

        let ticket = state.next_ticket;
        state.next_ticket += 1;
        Ok(OrderResult {
            retcode: RETCODE_DONE,
            order: ticket,
            price: order.price,
            volume: order.volume,
            comment: "Request executed".to_string(),
        })
    }

    async fn shutdown(&self) {
        self.state.lock().await.connected = false;
        tracing::info!("Paper terminal shut down");
    }

    fn name(&self) -> &str {
        "paper"
    }
}
