use thiserror::Error;
use usb_device::DeviceId;
use uvc_camera::CameraError;

/// Connection errors
#[derive(Error, Debug)]
pub enum ConnectError {
    #[error("Failed to open {device}: {source}")]
    Open {
        device: DeviceId,
        #[source]
        source: CameraError,
    },

    #[error("No active camera session")]
    NoSession,

    #[error("Camera error: {0}")]
    Camera(#[from] CameraError),
}
