//! Periodic background device check

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use usb_device::{FilterSet, UsbPlatform};

use crate::log::{events, DiagnosticLog};

/// Re-lists attached devices on a fixed period and records which supported
/// cameras are present and whether access is held
pub struct DiagnosticMonitor {
    log: DiagnosticLog,
    platform: Arc<dyn UsbPlatform>,
    filters: FilterSet,
    interval: Duration,
}

impl DiagnosticMonitor {
    pub fn new(
        log: DiagnosticLog,
        platform: Arc<dyn UsbPlatform>,
        filters: FilterSet,
        interval: Duration,
    ) -> Self {
        Self {
            log,
            platform,
            filters,
            interval,
        }
    }

    /// Run one check now. Returns the number of matching devices.
    pub async fn check(&self) -> usize {
        let devices = match self.platform.list_devices().await {
            Ok(devices) => devices,
            Err(e) => {
                self.log.record(events::USB_CHECK_ERROR, None, None, Some(&e));
                return 0;
            }
        };
        debug!("Total USB devices found: {}", devices.len());

        let mut count = 0;
        for device in devices.iter().filter(|d| self.filters.matches(d)) {
            count += 1;
            let permitted = self.platform.has_permission(device).await;
            debug!(device = %device.id, permitted, "UVC device present");
            self.log.record(
                events::UVC_DEVICE_CHECK,
                Some(device),
                Some(&format!("hasPermission={}", permitted)),
                None,
            );
        }

        self.log.record(
            events::UVC_DEVICE_COUNT,
            None,
            Some(&format!("count={}", count)),
            None,
        );
        if let Some(rss) = resident_kb() {
            self.log.record(
                events::SYSTEM_STATE,
                None,
                Some(&format!("memory_rss_kb={}", rss)),
                None,
            );
        }
        count
    }

    pub async fn run(self) {
        info!(interval = ?self.interval, "Starting diagnostic monitoring");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.check().await;
        }
    }

    /// Run on the current runtime until the handle is aborted
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }
}

/// Resident set size of this process, from `/proc/self/status`
fn resident_kb() -> Option<u64> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    status
        .lines()
        .find_map(|line| line.strip_prefix("VmRSS:"))
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|kb| kb.parse().ok())
}
