//! In-memory USB platform
//!
//! Devices are attached, granted and revoked by the test; every permission
//! request and open is recorded so callers can assert on side effects.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

use usb_device::{ControlBlock, Device, DeviceId, PlatformError, UsbPlatform};

#[derive(Default)]
struct Inner {
    devices: Vec<Device>,
    permitted: HashSet<DeviceId>,
    requests: Vec<DeviceId>,
    opens: Vec<DeviceId>,
    grant_on_request: bool,
    fail_requests: bool,
    fail_open: HashSet<DeviceId>,
}

#[derive(Clone, Default)]
pub struct MockPlatform {
    inner: Arc<Mutex<Inner>>,
}

impl MockPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_devices(devices: Vec<Device>) -> Self {
        let platform = Self::default();
        platform.lock().devices = devices;
        platform
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // a panicking test thread must not hide the state from the others
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn attach(&self, device: Device) {
        let mut inner = self.lock();
        inner.devices.retain(|d| d.id != device.id);
        inner.devices.push(device);
    }

    pub fn detach(&self, id: &DeviceId) {
        let mut inner = self.lock();
        inner.devices.retain(|d| &d.id != id);
        inner.permitted.remove(id);
    }

    /// Grant access silently, as a platform that drops its broadcast would
    pub fn grant(&self, id: &DeviceId) {
        self.lock().permitted.insert(id.clone());
    }

    pub fn revoke(&self, id: &DeviceId) {
        self.lock().permitted.remove(id);
    }

    /// Grant immediately whenever a permission request is issued
    pub fn grant_on_request(&self, enabled: bool) {
        self.lock().grant_on_request = enabled;
    }

    pub fn fail_requests(&self, enabled: bool) {
        self.lock().fail_requests = enabled;
    }

    pub fn fail_open(&self, id: &DeviceId) {
        self.lock().fail_open.insert(id.clone());
    }

    /// Every permission request issued so far, in order
    pub fn permission_requests(&self) -> Vec<DeviceId> {
        self.lock().requests.clone()
    }

    pub fn request_count(&self, id: &DeviceId) -> usize {
        self.lock().requests.iter().filter(|r| *r == id).count()
    }

    pub fn open_count(&self, id: &DeviceId) -> usize {
        self.lock().opens.iter().filter(|o| *o == id).count()
    }
}

#[async_trait]
impl UsbPlatform for MockPlatform {
    async fn list_devices(&self) -> Result<Vec<Device>, PlatformError> {
        Ok(self.lock().devices.clone())
    }

    async fn has_permission(&self, device: &Device) -> bool {
        self.lock().permitted.contains(&device.id)
    }

    async fn request_permission(&self, device: &Device) -> Result<(), PlatformError> {
        let mut inner = self.lock();
        if inner.fail_requests {
            return Err(PlatformError::PermissionRequest {
                device: device.id.clone(),
                reason: "mock failure".into(),
            });
        }
        debug!(device = %device.id, "mock permission request");
        inner.requests.push(device.id.clone());
        if inner.grant_on_request {
            inner.permitted.insert(device.id.clone());
        }
        Ok(())
    }

    async fn open_control(&self, device: &Device) -> Result<ControlBlock, PlatformError> {
        let mut inner = self.lock();
        if !inner.devices.iter().any(|d| d.id == device.id) {
            return Err(PlatformError::NotAttached(device.id.clone()));
        }
        if inner.fail_open.contains(&device.id) {
            return Err(PlatformError::Open {
                device: device.id.clone(),
                reason: "mock failure".into(),
            });
        }
        inner.opens.push(device.id.clone());
        Ok(ControlBlock::new(device))
    }
}
