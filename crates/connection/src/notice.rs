//! User-visible notices

use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::path::PathBuf;
use std::sync::Mutex;

use usb_device::{Device, DeviceId};
use uvc_camera::{Control, FrameSize};

/// Short message surfaced to the user
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notice {
    PermissionDenied { device: DeviceId },
    /// The fallback poll gave up; the user may retry
    PermissionTimedOut { device: DeviceId },
    NoCameraFound,
    NotSupported { device: DeviceId },
    OpenFailed { device: DeviceId, reason: String },
    Connected { device: DeviceId, name: String },
    Disconnected { device: DeviceId },
    RecordingStarted { path: PathBuf },
    RecordingStopped { path: PathBuf },
    StillCaptured { path: PathBuf },
    NotConnected,
    ControlChanged { control: Control, value: i32 },
    ControlUnsupported { control: Control },
    ResolutionChanged { size: FrameSize },
    /// Preview kept running at `current`
    ResolutionFailed { size: FrameSize, current: FrameSize, reason: String },
    Resolutions { current: FrameSize, sizes: Vec<FrameSize> },
}

impl Notice {
    pub fn connected(device: &Device) -> Self {
        Notice::Connected {
            device: device.id.clone(),
            name: device.to_string(),
        }
    }

    /// Notices the user should act on
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            Notice::PermissionDenied { .. }
                | Notice::PermissionTimedOut { .. }
                | Notice::NotSupported { .. }
                | Notice::OpenFailed { .. }
                | Notice::ControlUnsupported { .. }
                | Notice::ResolutionFailed { .. }
        )
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::PermissionDenied { device } => {
                write!(f, "USB permission denied for {}", device)
            }
            Notice::PermissionTimedOut { device } => write!(
                f,
                "No permission response for {}; retry to ask again",
                device
            ),
            Notice::NoCameraFound => write!(f, "No USB camera found"),
            Notice::NotSupported { device } => write!(f, "{} is not a supported camera", device),
            Notice::OpenFailed { device, reason } => {
                write!(f, "Failed to open camera {}: {}", device, reason)
            }
            Notice::Connected { name, .. } => write!(f, "Camera connected: {}", name),
            Notice::Disconnected { device } => write!(f, "Camera disconnected: {}", device),
            Notice::RecordingStarted { path } => write!(f, "Recording to {}", path.display()),
            Notice::RecordingStopped { path } => write!(f, "Recording saved: {}", path.display()),
            Notice::StillCaptured { path } => write!(f, "Image saved: {}", path.display()),
            Notice::NotConnected => write!(f, "Camera not connected"),
            Notice::ControlChanged { control, value } => write!(f, "{}: {}%", control, value),
            Notice::ControlUnsupported { control } => {
                write!(f, "This camera has no {} control", control)
            }
            Notice::ResolutionChanged { size } => write!(f, "Preview resolution {}", size),
            Notice::ResolutionFailed {
                size,
                current,
                reason,
            } => write!(f, "Cannot switch to {} ({}); staying at {}", size, reason, current),
            Notice::Resolutions { current, sizes } => {
                let sizes: Vec<String> = sizes.iter().map(ToString::to_string).collect();
                write!(f, "Resolution {}; available: {}", current, sizes.join(", "))
            }
        }
    }
}

/// Receiver of user-visible notices. Fire-and-forget.
pub trait NoticeSink: Send + Sync {
    fn notify(&self, notice: Notice);
}

/// Keeps the most recent notices in memory
pub struct NoticeBuffer {
    capacity: usize,
    notices: Mutex<VecDeque<Notice>>,
}

impl NoticeBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            notices: Mutex::new(VecDeque::new()),
        }
    }

    /// Notices still held, oldest first
    pub fn snapshot(&self) -> Vec<Notice> {
        self.notices
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    pub fn drain(&self) -> Vec<Notice> {
        self.notices
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect()
    }
}

impl Default for NoticeBuffer {
    fn default() -> Self {
        Self::new(64)
    }
}

impl NoticeSink for NoticeBuffer {
    fn notify(&self, notice: Notice) {
        let mut notices = self.notices.lock().unwrap_or_else(|e| e.into_inner());
        if notices.len() == self.capacity {
            notices.pop_front();
        }
        notices.push_back(notice);
    }
}
