//! USB Diagnostics
//!
//! Append-only plain-text records of USB and camera events, kept apart from
//! the tracing output so they survive log rotation and can be attached to
//! bug reports as-is.

mod crash;
mod log;
mod monitor;

pub use crash::install_crash_hook;
pub use log::{events, DiagnosticLog};
pub use monitor::DiagnosticMonitor;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Hub event records
pub const USB_LOG_FILE: &str = "usb_diagnostic.log";
/// Periodic monitor records
pub const MONITOR_LOG_FILE: &str = "diagnostic_service.log";
/// Panic records
pub const CRASH_LOG_FILE: &str = "crash_log.txt";

/// Diagnostics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosticsConfig {
    /// Write diagnostic files at all
    pub enabled: bool,
    /// Directory holding the log files
    pub dir: PathBuf,
    /// Device check period (milliseconds)
    pub monitor_interval_ms: u64,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: PathBuf::from("/var/log/uvc-link"),
            monitor_interval_ms: 5000,
        }
    }
}

impl DiagnosticsConfig {
    pub fn usb_log(&self) -> DiagnosticLog {
        DiagnosticLog::new(self.dir.join(USB_LOG_FILE))
    }

    pub fn monitor_log(&self) -> DiagnosticLog {
        DiagnosticLog::new(self.dir.join(MONITOR_LOG_FILE))
    }

    pub fn crash_log(&self) -> DiagnosticLog {
        DiagnosticLog::new(self.dir.join(CRASH_LOG_FILE))
    }
}
