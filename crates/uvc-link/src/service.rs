//! Bound camera service: connection status for observers

use serde::Serialize;
use std::sync::{Mutex, MutexGuard};
use tracing::info;

use connection::ServiceNotifier;
use usb_device::{ControlBlock, DeviceHandle, DeviceId};

pub const STATUS_CONNECTED: &str = "USB Camera Connected";
pub const STATUS_DISCONNECTED: &str = "USB Camera Disconnected";

/// Snapshot of the control block handed to the camera
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectedDevice {
    pub device: DeviceId,
    pub handle: DeviceHandle,
    pub vendor_id: u16,
    pub product_id: u16,
}

#[derive(Default)]
struct ServiceState {
    connected: Option<ConnectedDevice>,
}

/// Holds the connected flag, the current control handle and a status line
#[derive(Default)]
pub struct CameraService {
    state: Mutex<ServiceState>,
}

impl CameraService {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ServiceState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_connected(&self) -> bool {
        self.lock().connected.is_some()
    }

    pub fn control(&self) -> Option<ConnectedDevice> {
        self.lock().connected.clone()
    }

    pub fn status(&self) -> &'static str {
        if self.is_connected() {
            STATUS_CONNECTED
        } else {
            STATUS_DISCONNECTED
        }
    }
}

impl ServiceNotifier for CameraService {
    fn on_device_connected(&self, control: &ControlBlock) {
        info!(device = %control.device, "Service: {}", STATUS_CONNECTED);
        self.lock().connected = Some(ConnectedDevice {
            device: control.device.clone(),
            handle: control.handle,
            vendor_id: control.vendor_id,
            product_id: control.product_id,
        });
    }

    fn on_device_disconnected(&self) {
        info!("Service: {}", STATUS_DISCONNECTED);
        self.lock().connected = None;
    }
}
