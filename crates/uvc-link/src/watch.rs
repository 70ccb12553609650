//! Hotplug by periodic re-enumeration
//!
//! Used when udev is not available. Each pass diffs the attached devices
//! against the previous pass and reports attach, detach and newly gained
//! access as platform events.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use usb_device::{Device, DeviceId, PermissionChannel, PlatformEvent, UsbPlatform};

use crate::hub::HubEvent;

#[derive(Debug, Default)]
struct Snapshot {
    devices: HashMap<DeviceId, (Device, bool)>,
}

impl Snapshot {
    /// Replace the snapshot with `current`, returning what changed
    fn update(&mut self, current: Vec<(Device, bool)>) -> Vec<PlatformEvent> {
        let mut events = Vec::new();
        let mut next = HashMap::with_capacity(current.len());

        for (device, permitted) in current {
            match self.devices.get(&device.id) {
                None => events.push(PlatformEvent::Attached(device.clone())),
                Some((_, was_permitted)) if permitted && !was_permitted => {
                    events.push(PlatformEvent::PermissionResult {
                        device: device.clone(),
                        granted: true,
                        channel: PermissionChannel::Monitor,
                    });
                }
                Some(_) => {}
            }
            next.insert(device.id.clone(), (device, permitted));
        }

        let mut gone: Vec<&DeviceId> = self
            .devices
            .keys()
            .filter(|id| !next.contains_key(*id))
            .collect();
        gone.sort();
        events.extend(gone.into_iter().map(|id| PlatformEvent::Detached(id.clone())));

        self.devices = next;
        events
    }
}

pub struct HotplugWatcher {
    platform: Arc<dyn UsbPlatform>,
    interval: Duration,
}

impl HotplugWatcher {
    pub fn new(platform: Arc<dyn UsbPlatform>, interval: Duration) -> Self {
        Self { platform, interval }
    }

    async fn list(&self) -> Option<Vec<(Device, bool)>> {
        let devices = match self.platform.list_devices().await {
            Ok(devices) => devices,
            Err(e) => {
                warn!("Hotplug scan failed: {}", e);
                return None;
            }
        };
        let mut listed = Vec::with_capacity(devices.len());
        for device in devices {
            let permitted = self.platform.has_permission(&device).await;
            listed.push((device, permitted));
        }
        Some(listed)
    }

    /// Devices present at start-up are not reported; the auto-connect scan
    /// covers them
    pub async fn run(self, events: mpsc::Sender<HubEvent>) {
        info!(interval = ?self.interval, "Watching for USB hotplug");
        let mut snapshot = Snapshot::default();
        if let Some(initial) = self.list().await {
            snapshot.update(initial);
        }

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let Some(current) = self.list().await else {
                continue;
            };
            for event in snapshot.update(current) {
                debug!(?event, "Hotplug");
                if events.send(HubEvent::Platform(event)).await.is_err() {
                    return;
                }
            }
        }
    }

    pub fn spawn(self, events: mpsc::Sender<HubEvent>) -> JoinHandle<()> {
        tokio::spawn(self.run(events))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use usb_platform_mock::MockPlatform;

    fn camera(address: u8) -> Device {
        Device::new(format!("/dev/bus/usb/001/{:03}", address), 0x1234, 0x5678)
    }

    #[test]
    fn test_snapshot_diff() {
        let mut snapshot = Snapshot::default();
        let first = snapshot.update(vec![(camera(4), false)]);
        assert_eq!(first.len(), 1);
        assert!(matches!(&first[0], PlatformEvent::Attached(d) if d.id == camera(4).id));

        assert!(snapshot.update(vec![(camera(4), false)]).is_empty());

        let granted = snapshot.update(vec![(camera(4), true), (camera(5), false)]);
        assert_eq!(granted.len(), 2);
        assert!(matches!(
            &granted[0],
            PlatformEvent::PermissionResult { granted: true, channel: PermissionChannel::Monitor, .. }
        ));
        assert!(matches!(&granted[1], PlatformEvent::Attached(d) if d.id == camera(5).id));

        let removed = snapshot.update(vec![(camera(5), false)]);
        assert_eq!(removed.len(), 1);
        assert!(matches!(&removed[0], PlatformEvent::Detached(id) if *id == camera(4).id));
    }

    #[test]
    fn test_lost_access_is_not_reported() {
        let mut snapshot = Snapshot::default();
        snapshot.update(vec![(camera(4), true)]);
        assert!(snapshot.update(vec![(camera(4), false)]).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_watcher_reports_hotplug() {
        let platform = MockPlatform::with_devices(vec![camera(4)]);
        let (tx, mut rx) = mpsc::channel(8);
        let handle =
            HotplugWatcher::new(Arc::new(platform.clone()), Duration::from_secs(1)).spawn(tx);

        // let the initial snapshot be taken
        tokio::time::sleep(Duration::from_millis(10)).await;
        platform.attach(camera(5));
        platform.detach(&camera(4).id);

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert!(matches!(first, HubEvent::Platform(PlatformEvent::Attached(d)) if d.id == camera(5).id));
        assert!(matches!(second, HubEvent::Platform(PlatformEvent::Detached(id)) if id == camera(4).id));
        handle.abort();
    }
}
