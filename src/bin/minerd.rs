//! Main entry point for the keystone-miner daemon.

use std::path::PathBuf;

use anyhow::Context;
use keystone_miner::config::{MinerConfig, DEFAULT_CONFIG_FILE};
use keystone_miner::driver::Driver;
use keystone_miner::tracing;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing::init();

    // Optional sole argument: path to the config file.
    let path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

    let config = MinerConfig::load(&path).context("invalid configuration")?;

    Driver::new(config).run().await
}
