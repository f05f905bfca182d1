use anyhow::Context;
use clap::Parser;
use tracing::{debug, info};

use common::{init_logging, parse_level, wait_for_shutdown, LogConfig};
use hmbridge::{Bridge, BridgeConfig, CliArgs};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    let config = BridgeConfig::load(&args).context("Failed to load configuration")?;

    init_logging(LogConfig {
        service_name: env!("CARGO_PKG_NAME").to_string(),
        level: parse_level(&config.verbosity).unwrap_or(tracing::Level::INFO),
        log_dir: config.log_dir.clone(),
        ..Default::default()
    })
    .context("Failed to initialize logging")?;

    info!("{} {} starting", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
    debug!("loaded config: {:?}", config);

    let mut bridge = Bridge::new(config).context("Failed to create bridge")?;
    bridge.start().await.context("Failed to start bridge")?;

    let signal = wait_for_shutdown().await;
    info!("received {}, shutting down", signal);
    bridge.shutdown().await;

    Ok(())
}
