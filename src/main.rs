//! Blockstash - fetch and verify blocks from a backup store

use blockstash_core::{run_fetch, CancellationToken, Config};
use std::error::Error;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // Parse CLI arguments and build config
    let config = Config::from_cli()?;

    // Initialize logging
    init_logging(&config.log_level);

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            tracing::info!("Received Ctrl+C, cancelling fetch...");
            on_interrupt.cancel();
        }
    });

    let report = run_fetch(&config, cancel).await?;

    for checksum in &report.fetched {
        println!("{}", config.output_dir.join(checksum).display());
    }
    tracing::debug!("{}", report.metrics.to_prometheus());

    if report.cancelled {
        return Err("fetch cancelled".into());
    }
    if !report.failed.is_empty() {
        for failure in &report.failed {
            eprintln!("{failure}");
        }
        return Err(format!(
            "{} of {} blocks failed",
            report.failed.len(),
            config.checksums.len()
        )
        .into());
    }

    Ok(())
}

fn init_logging(level: &str) {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(level))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
