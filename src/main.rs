use anyhow::Context;
use netprobe::{logging, ServerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();

    let config = ServerConfig::load().context("failed to load configuration")?;
    log::info!("netprobe {} starting up", env!("CARGO_PKG_VERSION"));

    netprobe::run(config).await
}
