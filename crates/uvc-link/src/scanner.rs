//! One-shot start-up scan

use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use usb_device::{Device, FilterSet};

use crate::hub::HubEvent;

/// Pick the device to connect to: the first match in enumeration order
pub fn select_candidate<'a>(devices: &'a [Device], filters: &FilterSet) -> Option<&'a Device> {
    let candidate = filters.first_match(devices);
    match candidate {
        Some(device) => info!(device = %device, "Auto-connect candidate"),
        None => debug!(attached = devices.len(), "No supported camera attached"),
    }
    candidate
}

/// Triggers a single auto-connect scan on the hub after `delay`
pub struct AutoConnectScanner {
    delay: Duration,
}

impl AutoConnectScanner {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    pub fn spawn(self, events: mpsc::Sender<HubEvent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            tokio::time::sleep(self.delay).await;
            debug!("Auto-connect delay elapsed");
            // hub already gone means shutdown won the race
            let _ = events.send(HubEvent::AutoConnect).await;
        })
    }
}
