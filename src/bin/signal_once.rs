use anyhow::Context;
use clap::Parser;
use knntrader::classifier::WindowClassifier;
use knntrader::config::{BrokerKind, Settings};
use knntrader::features::build_features;
use knntrader::models::Timeframe;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Fetch bars once, train the classifier and print the predicted direction.
/// No orders are placed.
#[derive(Parser)]
#[command(name = "signal_once", version)]
struct Cli {
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, default_value_t = false)]
    paper: bool,

    #[arg(long)]
    symbol: Option<String>,

    #[arg(long)]
    timeframe: Option<Timeframe>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("knntrader=info")),
        )
        .init();

    let cli = Cli::parse();
    let mut settings = Settings::load(cli.config.as_deref())?;
    if cli.paper {
        settings.broker.kind = BrokerKind::Paper;
    }
    if let Some(symbol) = cli.symbol {
        settings.trading.symbol = symbol;
    }
    if let Some(timeframe) = cli.timeframe {
        settings.trading.timeframe = timeframe;
    }

    let broker = settings.broker.build_broker();
    let credentials = settings.broker.login_credentials()?;
    broker
        .connect(&credentials)
        .await
        .with_context(|| format!("Failed to connect to account #{}", credentials.account_id))?;

    let params = &settings.trading;
    let bars = broker
        .fetch_bars(&params.symbol, params.timeframe, params.bar_count)
        .await;
    broker.shutdown().await;
    let bars = bars.with_context(|| format!("Failed to fetch bars for {}", params.symbol))?;

    let rows = build_features(&bars);
    let prediction = WindowClassifier::new(params.classifier.clone()).predict(&rows)?;

    println!("\n{} {} ({} bars)", params.symbol, params.timeframe, bars.len());
    println!("  Latest window: {:?}", prediction.latest_window);
    println!("  Train/test: {}/{}", prediction.train_size, prediction.test_size);
    if let Some(accuracy) = prediction.test_accuracy {
        println!("  Hold-out accuracy: {:.1}%", accuracy * 100.0);
    }
    println!("  Prediction: {}", prediction.direction);

    Ok(())
}
