use async_trait::async_trait;
use chrono::DateTime;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use super::Broker;
use crate::error::{Result, TradingError};
use crate::models::{
    AccountInfo, Bar, Credentials, FillPolicy, OrderRequest, OrderResult, Quote, TimeInForce,
    Timeframe,
};

pub const DEFAULT_BRIDGE_URL: &str = "http://127.0.0.1:8228";

// Terminal request constants
const TRADE_ACTION_DEAL: u8 = 1;
const ORDER_TIME_GTC: u8 = 0;
const ORDER_FILLING_IOC: u8 = 1;

/// Client for the terminal bridge gateway
///
/// The bridge runs next to the desktop terminal and exposes its
/// login, rates, symbol and order calls as JSON over HTTP.
#[derive(Clone)]
pub struct BridgeClient {
    client: Client,
    base_url: String,
}

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    login: u64,
    password: &'a str,
    server: &'a str,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    ok: bool,
    #[serde(default)]
    error: Option<BridgeError>,
}

#[derive(Debug, Deserialize)]
struct BridgeError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct RateRow {
    time: i64,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    tick_volume: u64,
    #[serde(default)]
    spread: i64,
    #[serde(default)]
    real_volume: u64,
}

#[derive(Debug, Deserialize)]
struct SymbolInfo {
    name: String,
    bid: f64,
    ask: f64,
    digits: u32,
}

#[derive(Debug, Serialize)]
struct WireOrder<'a> {
    action: u8,
    symbol: &'a str,
    volume: f64,
    #[serde(rename = "type")]
    order_type: u8,
    price: f64,
    tp: f64,
    deviation: u32,
    magic: u64,
    comment: &'a str,
    type_time: u8,
    type_filling: u8,
}

impl<'a> From<&'a OrderRequest> for WireOrder<'a> {
    fn from(order: &'a OrderRequest) -> Self {
        Self {
            action: TRADE_ACTION_DEAL,
            symbol: &order.symbol,
            volume: order.volume,
            order_type: order.side.code(),
            price: order.price,
            tp: order.take_profit,
            deviation: order.deviation,
            magic: order.magic,
            comment: &order.comment,
            type_time: match order.time_in_force {
                TimeInForce::GoodTillCancelled => ORDER_TIME_GTC,
            },
            type_filling: match order.filling {
                FillPolicy::ImmediateOrCancel => ORDER_FILLING_IOC,
            },
        }
    }
}

impl BridgeClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn unreachable(&self, e: reqwest::Error) -> TradingError {
        TradingError::ConnectionFailure(format!("bridge at {} unreachable: {}", self.base_url, e))
    }
}

impl Default for BridgeClient {
    fn default() -> Self {
        Self::new(DEFAULT_BRIDGE_URL)
    }
}

#[async_trait]
impl Broker for BridgeClient {
    async fn connect(&self, credentials: &Credentials) -> Result<()> {
        let body = LoginRequest {
            login: credentials.account_id,
            password: &credentials.password,
            server: &credentials.server,
        };

        let response = self
            .client
            .post(self.url("/login"))
            .json(&body)
            .send()
            .await
            .map_err(|e| self.unreachable(e))?;
        let login: LoginResponse = response.json().await?;

        if login.ok {
            tracing::info!(account = credentials.account_id, server = %credentials.server, "Bridge login succeeded");
            return Ok(());
        }

        let detail = login
            .error
            .map(|e| format!("{} (code {})", e.message, e.code))
            .unwrap_or_else(|| "login refused".to_string());
        Err(TradingError::ConnectionFailure(format!(
            "failed to connect to account #{}: {}",
            credentials.account_id, detail
        )))
    }

    async fn account_info(&self) -> Result<AccountInfo> {
        let response = self
            .client
            .get(self.url("/account"))
            .send()
            .await
            .map_err(|e| self.unreachable(e))?;

        if !response.status().is_success() {
            return Err(TradingError::ConnectionFailure(format!(
                "failed to fetch account info: HTTP {}",
                response.status()
            )));
        }
        Ok(response.json().await?)
    }

    async fn fetch_bars(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        count: usize,
    ) -> Result<Vec<Bar>> {
        let response = self
            .client
            .get(self.url("/rates"))
            .query(&[
                ("symbol", symbol.to_string()),
                ("timeframe", timeframe.code().to_string()),
                ("start", "0".to_string()),
                ("count", count.to_string()),
            ])
            .send()
            .await
            .map_err(|e| self.unreachable(e))?;

        if !response.status().is_success() {
            return Err(TradingError::DataUnavailable(format!(
                "failed to fetch rates for {} with timeframe {}: HTTP {}",
                symbol,
                timeframe,
                response.status()
            )));
        }

        let rows: Option<Vec<RateRow>> = response.json().await?;
        let rows = rows.unwrap_or_default();
        if rows.is_empty() {
            return Err(TradingError::DataUnavailable(format!(
                "no rates returned for {} with timeframe {}",
                symbol, timeframe
            )));
        }

        rows.into_iter()
            .map(|row| {
                let timestamp = DateTime::from_timestamp(row.time, 0).ok_or_else(|| {
                    TradingError::DataUnavailable(format!("invalid bar time {}", row.time))
                })?;
                Ok(Bar {
                    timestamp,
                    open: row.open,
                    high: row.high,
                    low: row.low,
                    close: row.close,
                    volume: row.tick_volume,
                    spread: row.spread,
                    real_volume: row.real_volume,
                })
            })
            .collect()
    }

    async fn quote(&self, symbol: &str) -> Result<Quote> {
        let response = self
            .client
            .get(self.url(&format!("/symbols/{}", symbol)))
            .send()
            .await
            .map_err(|e| self.unreachable(e))?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(TradingError::UnknownSymbol(symbol.to_string())),
            status if !status.is_success() => Err(TradingError::ConnectionFailure(format!(
                "failed to resolve {}: HTTP {}",
                symbol, status
            ))),
            _ => {
                let info: SymbolInfo = response.json().await?;
                Ok(Quote {
                    symbol: info.name,
                    bid: info.bid,
                    ask: info.ask,
                    digits: info.digits,
                })
            }
        }
    }

    async fn submit_order(&self, order: &OrderRequest) -> Result<OrderResult> {
        let response = self
            .client
            .post(self.url("/orders"))
            .json(&WireOrder::from(order))
            .send()
            .await
            .map_err(|e| self.unreachable(e))?;

        if !response.status().is_success() {
            return Err(TradingError::ConnectionFailure(format!(
                "order submission failed: HTTP {}",
                response.status()
            )));
        }
        Ok(response.json().await?)
    }

    async fn shutdown(&self) {
        if let Err(e) = self.client.post(self.url("/shutdown")).send().await {
            tracing::warn!("Bridge shutdown request failed: {}", e);
        } else {
            tracing::info!("Disconnected from terminal bridge");
        }
    }

    fn name(&self) -> &str {
        "bridge"
    }
}
