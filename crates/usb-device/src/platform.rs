//! Host platform contract

use async_trait::async_trait;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};

use crate::device::{Device, DeviceHandle, DeviceId};
use crate::error::PlatformError;

/// Which notification channel delivered a permission result.
///
/// Both channels are authoritative; duplicates are expected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PermissionChannel {
    /// The application's own permission broadcast
    App,
    /// The device monitor's permission broadcast
    Monitor,
}

/// Inbound notifications from the platform
#[derive(Debug, Clone)]
pub enum PlatformEvent {
    Attached(Device),
    Detached(DeviceId),
    PermissionResult {
        device: Device,
        granted: bool,
        channel: PermissionChannel,
    },
}

/// Open connection to a permitted device, handed to the camera library
#[derive(Debug)]
pub struct ControlBlock {
    pub device: DeviceId,
    pub handle: DeviceHandle,
    pub vendor_id: u16,
    pub product_id: u16,
    /// Device node opened read/write, when the platform provides one
    pub fd: Option<OwnedFd>,
}

impl ControlBlock {
    pub fn new(device: &Device) -> Self {
        Self {
            device: device.id.clone(),
            handle: device.handle,
            vendor_id: device.vendor_id,
            product_id: device.product_id,
            fd: None,
        }
    }

    pub fn with_fd(mut self, fd: OwnedFd) -> Self {
        self.fd = Some(fd);
        self
    }

    pub fn raw_fd(&self) -> Option<RawFd> {
        self.fd.as_ref().map(|fd| fd.as_raw_fd())
    }

    pub fn bus(&self) -> u8 {
        self.handle.bus()
    }

    pub fn address(&self) -> u8 {
        self.handle.address()
    }
}

/// USB host backend: enumeration, permission and connection
#[async_trait]
pub trait UsbPlatform: Send + Sync {
    /// Currently attached devices, in platform enumeration order
    async fn list_devices(&self) -> Result<Vec<Device>, PlatformError>;

    /// Whether the platform currently reports access to `device`
    async fn has_permission(&self, device: &Device) -> bool;

    /// Ask the platform to grant access. The outcome arrives later as a
    /// [`PlatformEvent::PermissionResult`], or not at all.
    async fn request_permission(&self, device: &Device) -> Result<(), PlatformError>;

    /// Open the device connection for a permitted device
    async fn open_control(&self, device: &Device) -> Result<ControlBlock, PlatformError>;
}
