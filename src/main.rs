//! Main entry point for the GPU mode switcher

use anyhow::Context;
use clap::Parser;
use gfx_mode_switcher::{args::Args, client::GfxModeClient, logging, SwitcherConfig};
use log::info;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Setup logging
    logging::setup(args.verbose)?;

    info!(
        "gfx-mode-switcher v{} (git {} / {}) built {}",
        env!("CARGO_PKG_VERSION"),
        option_env!("GIT_HASH").unwrap_or("unknown"),
        option_env!("GIT_DESC").unwrap_or("unknown"),
        option_env!("BUILD_TIME").unwrap_or("unknown")
    );

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(SwitcherConfig::get_config_path);
    let config = SwitcherConfig::load_or_create(&config_path)
        .with_context(|| format!("Failed to read configuration from {}", config_path.display()))?;

    let client = GfxModeClient::new(config)?;
    client.handle_args(args).await?;

    Ok(())
}
