//! Layered settings: defaults, optional `knntrader.toml`, then `KNNTRADER_*` env vars
//!
//! Nested keys use a double underscore, e.g. `KNNTRADER_TRADING__SYMBOL=EURUSD`
//! or `KNNTRADER_TRADING__CLASSIFIER__WINDOW=20`.

use config::{Config, Environment, File};
use serde::Deserialize;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use crate::broker::bridge::DEFAULT_BRIDGE_URL;
use crate::broker::{Broker, BridgeClient, PaperBroker};
use crate::error::{Result, TradingError};
use crate::execution::TradingParams;
use crate::models::Credentials;

const ENV_PREFIX: &str = "KNNTRADER";
const DEFAULT_CONFIG_FILE: &str = "knntrader";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrokerKind {
    Bridge,
    Paper,
}

#[derive(Clone, Deserialize)]
pub struct BrokerSettings {
    pub kind: BrokerKind,
    pub url: String,
    pub account_id: u64,
    pub password: String,
    pub server: String,
    pub paper_seed: u64,
}

impl BrokerSettings {
    pub fn build_broker(&self) -> Arc<dyn Broker> {
        match self.kind {
            BrokerKind::Bridge => Arc::new(BridgeClient::new(self.url.clone())),
            BrokerKind::Paper => Arc::new(PaperBroker::new(self.paper_seed)),
        }
    }

    /// Login for the configured terminal
    ///
    /// The bridge needs a real account and password. The paper terminal
    /// accepts any login, so placeholders fill whatever is unset.
    pub fn login_credentials(&self) -> Result<Credentials> {
        let mut credentials = Credentials {
            account_id: self.account_id,
            password: self.password.clone(),
            server: self.server.clone(),
        };
        match self.kind {
            BrokerKind::Bridge => {
                if credentials.account_id == 0 || credentials.password.is_empty() {
                    return Err(TradingError::InvalidParameter(
                        "Missing credentials: set KNNTRADER_BROKER__ACCOUNT_ID and KNNTRADER_BROKER__PASSWORD"
                            .to_string(),
                    ));
                }
            }
            BrokerKind::Paper => {
                if credentials.account_id == 0 {
                    credentials.account_id = 1;
                }
                if credentials.password.is_empty() {
                    credentials.password = "paper".to_string();
                }
            }
        }
        Ok(credentials)
    }
}

impl fmt::Debug for BrokerSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokerSettings")
            .field("kind", &self.kind)
            .field("url", &self.url)
            .field("account_id", &self.account_id)
            .field("password", &"***")
            .field("server", &self.server)
            .field("paper_seed", &self.paper_seed)
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    pub bind: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub broker: BrokerSettings,
    pub trading: TradingParams,
    pub server: ServerSettings,
}

impl Settings {
    /// Load settings; `path` replaces the default optional `knntrader.toml`
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let builder = Config::builder()
            .set_default("broker.kind", "paper")?
            .set_default("broker.url", DEFAULT_BRIDGE_URL)?
            .set_default("broker.account_id", 0)?
            .set_default("broker.password", "")?
            .set_default("broker.server", "MetaQuotes-Demo")?
            .set_default("broker.paper_seed", 42)?
            .set_default("trading.symbol", "BTCUSD")?
            .set_default("trading.timeframe", "M15")?
            .set_default("trading.bar_count", 1000)?
            .set_default("trading.lot_size", 0.1)?
            .set_default("trading.classifier.window", 10)?
            .set_default("trading.classifier.neighbors", 5)?
            .set_default("trading.classifier.test_ratio", 0.2)?
            .set_default("trading.classifier.seed", 42)?
            .set_default("server.bind", "0.0.0.0")?
            .set_default("server.port", 5000)?;

        let builder = match path {
            Some(path) => builder.add_source(File::from(path)),
            None => builder.add_source(File::with_name(DEFAULT_CONFIG_FILE).required(false)),
        };

        let settings: Settings = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    /// Re-check after CLI overrides have been applied
    pub fn validate(&self) -> Result<()> {
        self.trading.validate()
    }
}
