//! Platform error types

use thiserror::Error;

use crate::device::DeviceId;

/// Errors reported by a [`UsbPlatform`](crate::UsbPlatform) backend
#[derive(Debug, Error)]
pub enum PlatformError {
    /// Device node or sysfs access failed
    #[error("I/O error: {0}")]
    Io(String),

    /// Device is no longer attached
    #[error("Device {0} is not attached")]
    NotAttached(DeviceId),

    /// The platform refused or failed to issue a permission request
    #[error("Permission request failed for {device}: {reason}")]
    PermissionRequest { device: DeviceId, reason: String },

    /// Opening the device connection failed
    #[error("Failed to open {device}: {reason}")]
    Open { device: DeviceId, reason: String },

    /// Backend not usable on this host
    #[error("Platform unavailable: {0}")]
    Unavailable(String),
}

impl From<std::io::Error> for PlatformError {
    fn from(err: std::io::Error) -> Self {
        PlatformError::Io(err.to_string())
    }
}
