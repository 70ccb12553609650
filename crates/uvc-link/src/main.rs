use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tracing::info;

use usb_device::UsbPlatform;
use uvc_link::cli::{device_report, Cli, Commands};
use uvc_link::sysfs::SysfsPlatform;
use uvc_link::{app, init_logging, AppConfig};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref()).context("Loading configuration")?;

    match cli.command() {
        Commands::Run { dry_run } => {
            init_logging(&config.logging).context("Installing log subscriber")?;
            info!(version = env!("CARGO_PKG_VERSION"), "uvc-link starting");
            app::run(config, dry_run).await
        }
        Commands::List => {
            let platform: Arc<dyn UsbPlatform> = Arc::new(SysfsPlatform::default());
            let report = device_report(platform.as_ref(), &config.filters()).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Commands::CheckFilters => {
            println!("{}", serde_json::to_string_pretty(&config.filters())?);
            Ok(())
        }
    }
}
