use thiserror::Error;
use usb_device::{DeviceId, PlatformError};

/// Permission gate errors
#[derive(Error, Debug)]
pub enum GateError {
    #[error("Permission already requested for {0}")]
    AlreadyRequested(DeviceId),

    #[error("Permission denied for {0}")]
    PermissionDenied(DeviceId),

    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),
}
