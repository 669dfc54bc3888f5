use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;

use super::error::ApiError;
use super::{AppState, Session};
use crate::broker::MAX_BAR_COUNT;
use crate::models::{Bar, Credentials, Timeframe};

// ── Request bodies ──────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ConnectBody {
    pub account_id: Option<u64>,
    pub password: Option<String>,
    pub server: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BarsQuery {
    #[serde(default = "default_symbol")]
    pub symbol: String,
    #[serde(default = "default_timeframe")]
    pub timeframe: u32,
    #[serde(default = "default_num_bars")]
    pub num_bars: usize,
}

fn default_symbol() -> String {
    "BTCUSD".to_string()
}

fn default_timeframe() -> u32 {
    Timeframe::M5.code()
}

fn default_num_bars() -> usize {
    1000
}

// ── Routes ──────────────────────────────────────────────────────────

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health))
        .route("/connect", post(connect))
        .route("/disconnect", post(disconnect))
        .route("/account", get(account))
        .route("/bars", get(fetch_bars))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn connect(
    State(state): State<Arc<AppState>>,
    body: Result<Json<ConnectBody>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(body) = body?;
    let credentials = match (body.account_id, body.password, body.server) {
        (Some(account_id), Some(password), Some(server))
            if account_id != 0 && !password.is_empty() && !server.is_empty() =>
        {
            Credentials {
                account_id,
                password,
                server,
            }
        }
        _ => return Err(ApiError::bad_request("Missing credentials.")),
    };

    tracing::info!(
        account = credentials.account_id,
        server = %credentials.server,
        "Attempting to connect to terminal"
    );

    if let Err(e) = state.broker.connect(&credentials).await {
        tracing::warn!("Failed to connect to account #{}: {}", credentials.account_id, e);
        return Err(ApiError::bad_request(format!(
            "Failed to connect to account #{}.",
            credentials.account_id
        )));
    }

    *state.session.write().await = Some(Session {
        account_id: credentials.account_id,
        server: credentials.server,
    });

    Ok(Json(json!({
        "status": "success",
        "message": "Connected to MetaTrader5."
    })))
}

async fn disconnect(State(state): State<Arc<AppState>>) -> Json<Value> {
    let previous = state.session.write().await.take();
    if previous.is_some() {
        state.broker.shutdown().await;
    }
    Json(json!({ "status": "success", "message": "Disconnected." }))
}

async fn account(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    state.require_session().await?;
    let info = state.broker.account_info().await?;
    Ok(Json(serde_json::to_value(info).map_err(crate::error::TradingError::from)?))
}

async fn fetch_bars(
    State(state): State<Arc<AppState>>,
    query: Result<Query<BarsQuery>, QueryRejection>,
) -> Result<Json<Value>, ApiError> {
    let Query(query) = query?;
    state.require_session().await?;

    let timeframe = Timeframe::from_code(query.timeframe)
        .map_err(|_| ApiError::bad_request(format!("Unknown timeframe {}.", query.timeframe)))?;
    if query.num_bars == 0 || query.num_bars > MAX_BAR_COUNT {
        return Err(ApiError::bad_request(format!(
            "num_bars must be between 1 and {}.",
            MAX_BAR_COUNT
        )));
    }

    tracing::info!(
        "Fetching data for {} with timeframe {} and {} bars",
        query.symbol,
        timeframe,
        query.num_bars
    );

    let bars = match state
        .broker
        .fetch_bars(&query.symbol, timeframe, query.num_bars)
        .await
    {
        Ok(bars) if !bars.is_empty() => bars,
        Ok(_) => return Err(ApiError::bad_request("Failed to fetch rates.")),
        Err(e) => {
            tracing::warn!("Failed to fetch rates for {}: {}", query.symbol, e);
            return Err(ApiError::bad_request("Failed to fetch rates."));
        }
    };

    tracing::info!("Successfully fetched data for {}", query.symbol);
    Ok(Json(bars_to_columns(&bars)))
}

/// Column-oriented payload keyed by ISO-8601 bar time
///
/// `{"open": {"2025-02-07T16:00:00.000Z": 1.0, ...}, "high": {...}, ...}`
pub fn bars_to_columns(bars: &[Bar]) -> Value {
    let mut open = Map::new();
    let mut high = Map::new();
    let mut low = Map::new();
    let mut close = Map::new();
    let mut tick_volume = Map::new();
    let mut spread = Map::new();
    let mut real_volume = Map::new();

    for bar in bars {
        let key = bar.timestamp.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string();
        open.insert(key.clone(), json!(bar.open));
        high.insert(key.clone(), json!(bar.high));
        low.insert(key.clone(), json!(bar.low));
        close.insert(key.clone(), json!(bar.close));
        tick_volume.insert(key.clone(), json!(bar.volume));
        spread.insert(key.clone(), json!(bar.spread));
        real_volume.insert(key, json!(bar.real_volume));
    }

    json!({
        "open": open,
        "high": high,
        "low": low,
        "close": close,
        "tick_volume": tick_volume,
        "spread": spread,
        "real_volume": real_volume,
    })
}
