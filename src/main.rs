//! Partsbroker CLI binary

use anyhow::Context;
use clap::Parser;
use partsbroker::cli::{Cli, Commands, MarketApp, MarketReport};
use partsbroker::MarketConfig;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            suppliers,
            consumers,
            duration_secs,
            config,
            request_interval_ms,
            drift_interval_ms,
        } => {
            let mut market_config = match config {
                Some(path) => MarketConfig::load(&path)
                    .with_context(|| format!("loading {}", path.display()))?,
                None => MarketConfig::default(),
            };
            if let Some(ms) = request_interval_ms {
                market_config.consumer.request_interval_ms = ms;
            }
            if let Some(ms) = drift_interval_ms {
                market_config.supplier.drift_interval_ms = ms;
            }

            let app = MarketApp::new(market_config, suppliers, consumers)?;

            let shutdown = CancellationToken::new();
            let ctrl_c = shutdown.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("Ctrl+C received, shutting down");
                    ctrl_c.cancel();
                }
            });

            match duration_secs {
                Some(secs) => tracing::info!("Market running for {}s", secs),
                None => tracing::info!("Market running. Press Ctrl+C to stop."),
            }
            let report = app
                .run(duration_secs.map(Duration::from_secs), shutdown)
                .await?;

            log_report(&report);
        }

        Commands::Config => {
            println!("{}", MarketConfig::default().to_json_pretty()?);
        }
    }

    Ok(())
}

fn log_report(report: &MarketReport) {
    tracing::info!(
        "{}: {} suppliers registered, {} rounds still open",
        report.broker,
        report.registered_suppliers,
        report.open_aggregations
    );

    for supplier in &report.suppliers {
        tracing::info!(
            "{}: balance {:.2}, stock {:?}, prices {:?}",
            supplier.id,
            supplier.balance,
            supplier.stock,
            supplier.prices
        );
    }

    for consumer in &report.consumers {
        tracing::info!(
            "{}: balance {:.2}, owns {} components ({} rounds outstanding)",
            consumer.id,
            consumer.balance,
            consumer.owned.len(),
            consumer.outstanding_rounds
        );
    }
}
