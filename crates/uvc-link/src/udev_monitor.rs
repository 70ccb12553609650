//! Hotplug from the udev netlink monitor

use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tokio::sync::mpsc;
use tracing::{debug, error, info};
use udev::EventType;

use usb_device::{DeviceId, PermissionChannel, PlatformEvent};

use crate::hub::HubEvent;
use crate::sysfs::SysfsPlatform;

/// Listen for USB device add/remove/change on a dedicated thread.
///
/// A `change` event is how a udev rule applying new node permissions shows
/// up, so it is reported as a permission result once the node is accessible.
pub fn spawn_udev_listener(
    platform: Arc<SysfsPlatform>,
    events: mpsc::Sender<HubEvent>,
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("udev-monitor".into())
        .spawn(move || {
            if let Err(e) = listen(&platform, &events) {
                error!("udev monitor stopped: {}", e);
            }
        })
}

fn listen(platform: &SysfsPlatform, events: &mpsc::Sender<HubEvent>) -> io::Result<()> {
    let monitor = udev::MonitorBuilder::new()?
        .match_subsystem_devtype("usb", "usb_device")?
        .listen()?;
    info!("Listening for udev USB events");

    loop {
        wait_readable(monitor.as_raw_fd())?;
        for event in monitor.iter() {
            let Some(event) = convert(platform, &event) else {
                continue;
            };
            debug!(?event, "udev");
            if events.blocking_send(HubEvent::Platform(event)).is_err() {
                return Ok(());
            }
        }
    }
}

fn convert(platform: &SysfsPlatform, event: &udev::Event) -> Option<PlatformEvent> {
    match event.event_type() {
        EventType::Add => platform.read_device(event.syspath()).map(PlatformEvent::Attached),
        EventType::Remove => {
            let bus = property(event, "BUSNUM")?;
            let address = property(event, "DEVNUM")?;
            let node = platform.node_path(bus, address);
            Some(PlatformEvent::Detached(DeviceId::new(node.to_string_lossy())))
        }
        EventType::Change => {
            let device = platform.read_device(event.syspath())?;
            SysfsPlatform::node_accessible(Path::new(device.id.as_str())).then(|| {
                PlatformEvent::PermissionResult {
                    device,
                    granted: true,
                    channel: PermissionChannel::Monitor,
                }
            })
        }
        _ => None,
    }
}

fn property(event: &udev::Event, key: &str) -> Option<u8> {
    event.property_value(key)?.to_str()?.parse().ok()
}

fn wait_readable(fd: RawFd) -> io::Result<()> {
    let mut pollfd = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };
    loop {
        // SAFETY: pollfd points to one valid, initialised entry
        let ready = unsafe { libc::poll(&mut pollfd, 1, -1) };
        if ready >= 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}
