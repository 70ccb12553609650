//! Command-line interface

use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;

use usb_device::{DeviceHandle, DeviceId, FilterSet, PlatformError, UsbPlatform};

#[derive(Parser, Debug)]
#[command(
    name = "uvc-link",
    version,
    about = "Connects USB Video Class cameras once access is granted"
)]
pub struct Cli {
    /// Configuration file (defaults to /etc/uvc-link/config.toml)
    #[arg(long, short, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Commands {
    /// Run the daemon (default)
    Run {
        /// Use an in-memory camera instead of the native library
        #[arg(long)]
        dry_run: bool,
    },
    /// List attached USB devices with filter match and access
    List,
    /// Print the device filters in effect
    CheckFilters,
}

impl Cli {
    pub fn command(&self) -> Commands {
        self.command
            .clone()
            .unwrap_or(Commands::Run { dry_run: false })
    }
}

/// One row of `uvc-link list`
#[derive(Debug, Clone, Serialize)]
pub struct DeviceReport {
    pub id: DeviceId,
    pub handle: DeviceHandle,
    pub vid_pid: String,
    pub name: String,
    pub supported: bool,
    pub permitted: bool,
}

pub async fn device_report(
    platform: &dyn UsbPlatform,
    filters: &FilterSet,
) -> Result<Vec<DeviceReport>, PlatformError> {
    let mut report = Vec::new();
    for device in platform.list_devices().await? {
        report.push(DeviceReport {
            supported: filters.matches(&device),
            permitted: platform.has_permission(&device).await,
            vid_pid: device.vid_pid(),
            id: device.id,
            handle: device.handle,
            name: device.name,
        });
    }
    Ok(report)
}
