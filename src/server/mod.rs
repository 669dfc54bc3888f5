// HTTP data-access service: connect to the terminal, then fetch bars as JSON
pub mod error;
pub mod routes;

pub use error::ApiError;
pub use routes::bars_to_columns;

use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::broker::Broker;

/// Account the service is logged in as
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub account_id: u64,
    pub server: String,
}

/// Shared state handed to every route handler
pub struct AppState {
    pub broker: Arc<dyn Broker>,
    pub session: RwLock<Option<Session>>,
}

impl AppState {
    pub fn new(broker: Arc<dyn Broker>) -> Arc<Self> {
        Arc::new(Self {
            broker,
            session: RwLock::new(None),
        })
    }

    /// Fetch-type routes are gated on a prior successful connect
    pub async fn require_session(&self) -> Result<Session, ApiError> {
        self.session
            .read()
            .await
            .clone()
            .ok_or_else(|| ApiError::bad_request("User not connected to MT5."))
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    routes::routes().with_state(state)
}

/// Serve until Ctrl+C
pub async fn serve(state: Arc<AppState>, addr: SocketAddr) -> std::io::Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Data service listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to install Ctrl+C handler: {}", e);
        return;
    }
    tracing::info!("Shutdown signal received, stopping data service");
}
