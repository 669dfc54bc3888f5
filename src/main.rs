use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use knntrader::broker::Broker;
use knntrader::config::{BrokerKind, BrokerSettings, Settings};
use knntrader::execution::{journal, LoopEvent, TradeHistory, TradingLoop, TradingParams};
use knntrader::models::{Timeframe, TradeRecord};
use knntrader::server::{self, AppState};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

// ============================================================================
// CLI
// ============================================================================

#[derive(Parser)]
#[command(
    name = "knntrader",
    version,
    about = "kNN direction classifier that trades through a MetaTrader-style terminal",
    propagate_version = true
)]
struct Cli {
    /// Settings file (defaults to ./knntrader.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Use the in-process paper terminal instead of the bridge
    #[arg(long, global = true, default_value_t = false)]
    paper: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect and trade continuously until Ctrl+C
    Trade(TradeArgs),
    /// Run the HTTP data-access service
    Serve(ServeArgs),
    /// Connect, print the account summary and disconnect
    Account,
}

#[derive(Args)]
struct TradeArgs {
    /// Instrument to trade, e.g. BTCUSD
    #[arg(long)]
    symbol: Option<String>,

    /// Bar timeframe (M1..M30, H1..H12, D1, W1, MN1 or the numeric terminal code)
    #[arg(long)]
    timeframe: Option<Timeframe>,

    /// Number of past percentage changes per feature row
    #[arg(long)]
    window: Option<usize>,

    /// Lot size per order (minimum 0.01)
    #[arg(long)]
    lot_size: Option<f64>,

    /// Bars to fetch each cycle
    #[arg(long)]
    bars: Option<usize>,
}

impl TradeArgs {
    fn apply(self, params: &mut TradingParams) {
        if let Some(symbol) = self.symbol {
            params.symbol = symbol;
        }
        if let Some(timeframe) = self.timeframe {
            params.timeframe = timeframe;
        }
        if let Some(window) = self.window {
            params.classifier.window = window;
        }
        if let Some(lot_size) = self.lot_size {
            params.lot_size = lot_size;
        }
        if let Some(bars) = self.bars {
            params.bar_count = bars;
        }
    }
}

#[derive(Args)]
struct ServeArgs {
    /// Address to bind
    #[arg(long)]
    bind: Option<String>,

    /// Port to listen on
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();

    let cli = Cli::parse();
    let mut settings = Settings::load(cli.config.as_deref()).context("Failed to load settings")?;
    if cli.paper {
        settings.broker.kind = BrokerKind::Paper;
    }

    let broker = settings.broker.build_broker();
    tracing::info!("🚀 knntrader starting ({} terminal)", broker.name());

    match cli.command {
        Commands::Trade(args) => {
            args.apply(&mut settings.trading);
            settings.validate()?;
            run_trading(broker, &settings).await
        }
        Commands::Serve(args) => {
            let bind = args.bind.unwrap_or(settings.server.bind);
            let port = args.port.unwrap_or(settings.server.port);
            let addr: SocketAddr = format!("{}:{}", bind, port)
                .parse()
                .with_context(|| format!("Invalid bind address {}:{}", bind, port))?;
            server::serve(AppState::new(broker), addr).await?;
            Ok(())
        }
        Commands::Account => show_account(broker, &settings.broker).await,
    }
}

// ============================================================================
// Initialization Functions
// ============================================================================

fn setup_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("knntrader=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

// ============================================================================
// Commands
// ============================================================================

async fn run_trading(broker: Arc<dyn Broker>, settings: &Settings) -> anyhow::Result<()> {
    let credentials = settings.broker.login_credentials()?;
    let (journal, history) = journal();

    let mut trading_loop = TradingLoop::new(broker, settings.trading.clone(), journal)?;
    trading_loop
        .connect(&credentials)
        .await
        .with_context(|| format!("Failed to connect to account #{}", credentials.account_id))?;

    let params = trading_loop.params().clone();
    tracing::info!("\n📊 Configuration:");
    tracing::info!("  Symbol: {}", params.symbol);
    tracing::info!("  Timeframe: {}", params.timeframe);
    tracing::info!("  Window: {}", params.classifier.window);
    tracing::info!("  Neighbors: {}", params.classifier.neighbors);
    tracing::info!("  Lot size: {}", params.lot_size);
    tracing::info!("  Bars per cycle: {}", params.bar_count);

    let handle = trading_loop.start()?;
    let display = tokio::spawn(display_loop(history));

    tracing::info!("\nPress Ctrl+C to stop...\n");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;
    tracing::info!("\n⚠️  Received Ctrl+C, stopping trading loop...");

    handle.stop().await.context("Trading loop task panicked")?;
    let history = display.await.context("Display task panicked")?;

    log_trade_table(history.trades());
    tracing::info!("👋 knntrader stopped");
    Ok(())
}

/// Mirror loop events into the log until the loop reports it has stopped
async fn display_loop(mut history: TradeHistory) -> TradeHistory {
    while let Some(event) = history.next_event().await {
        match event {
            LoopEvent::CycleStarted { cycle } => {
                tracing::debug!(cycle, "Cycle started");
            }
            LoopEvent::Signal {
                cycle,
                direction,
                test_accuracy,
            } => match test_accuracy {
                Some(accuracy) => tracing::info!(
                    cycle,
                    "Prediction: {:?} (hold-out accuracy {:.1}%)",
                    direction.side(),
                    accuracy * 100.0
                ),
                None => tracing::info!(cycle, "Prediction: {:?}", direction.side()),
            },
            LoopEvent::TradeExecuted(record) => {
                tracing::info!(
                    "💹 {:?} {} {} lots at {} (TP {}), ticket #{}",
                    record.direction.side(),
                    record.symbol,
                    record.lot_size,
                    record.entry_price,
                    record.take_profit,
                    record.ticket
                );
            }
            LoopEvent::CycleSkipped { .. } | LoopEvent::OrderFailed { .. } => {}
            LoopEvent::Stopped => break,
        }
    }
    history
}

fn log_trade_table(trades: &[TradeRecord]) {
    tracing::info!("\n📒 Trade History ({} trades):", trades.len());
    for trade in trades {
        tracing::info!(
            "  {} | {} | {:?} | Entry: {} | TP: {} | Lots: {} | Ticket: {}",
            trade.executed_at.format("%Y-%m-%d %H:%M:%S"),
            trade.symbol,
            trade.direction.side(),
            trade.entry_price,
            trade.take_profit,
            trade.lot_size,
            trade.ticket
        );
    }
}

async fn show_account(broker: Arc<dyn Broker>, settings: &BrokerSettings) -> anyhow::Result<()> {
    let credentials = settings.login_credentials()?;
    broker
        .connect(&credentials)
        .await
        .with_context(|| format!("Failed to connect to account #{}", credentials.account_id))?;

    let result = broker.account_info().await;
    broker.shutdown().await;
    let account = result?;

    println!("Account #{} ({})", account.login, account.server);
    println!("  Name:        {}", account.name);
    println!("  Balance:     {:.2} {}", account.balance, account.currency);
    println!("  Equity:      {:.2} {}", account.equity, account.currency);
    println!("  Margin:      {:.2}", account.margin);
    println!("  Free margin: {:.2}", account.free_margin);
    println!("  Leverage:    1:{}", account.leverage);
    Ok(())
}
