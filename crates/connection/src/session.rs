//! Live session and the UI state derived from it

use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use usb_device::{ControlBlock, Device, DeviceId};
use uvc_camera::{Control, FrameSize};

/// Binding between a permitted device and an open camera stream
#[derive(Debug)]
pub struct Session {
    device: Device,
    control: Arc<ControlBlock>,
    recording: Option<PathBuf>,
    controls: Vec<Control>,
    sizes: Vec<FrameSize>,
    started: Instant,
}

impl Session {
    pub(crate) fn new(device: Device, control: Arc<ControlBlock>) -> Self {
        Self {
            device,
            control,
            recording: None,
            controls: Vec::new(),
            sizes: Vec::new(),
            started: Instant::now(),
        }
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn device_id(&self) -> &DeviceId {
        &self.device.id
    }

    pub fn control(&self) -> &ControlBlock {
        &self.control
    }

    /// Output file of the recording in progress
    pub fn recording(&self) -> Option<&Path> {
        self.recording.as_deref()
    }

    pub fn is_recording(&self) -> bool {
        self.recording.is_some()
    }

    /// Controls the camera reported after opening
    pub fn controls(&self) -> &[Control] {
        &self.controls
    }

    pub fn supports(&self, control: Control) -> bool {
        self.controls.contains(&control)
    }

    /// Preview sizes the camera reported after opening
    pub fn sizes(&self) -> &[FrameSize] {
        &self.sizes
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    pub(crate) fn control_arc(&self) -> Arc<ControlBlock> {
        Arc::clone(&self.control)
    }

    pub(crate) fn set_recording(&mut self, path: Option<PathBuf>) {
        self.recording = path;
    }

    pub(crate) fn with_capabilities(mut self, controls: Vec<Control>, sizes: Vec<FrameSize>) -> Self {
        self.controls = controls;
        self.sizes = sizes;
        self
    }
}

/// Controls shown to the user
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Affordances {
    /// Camera toggle in the "on" position
    pub camera_on: bool,
    pub capture_visible: bool,
    /// Recording indicator
    pub recording: bool,
    pub tools_visible: bool,
    pub brightness_visible: bool,
    pub contrast_visible: bool,
}

impl Affordances {
    /// Connected to a camera exposing every control
    pub fn connected() -> Self {
        Self::for_controls(&Control::ALL)
    }

    /// Connected, with only the controls the camera exposes
    pub fn for_controls(controls: &[Control]) -> Self {
        Self {
            camera_on: true,
            capture_visible: true,
            recording: false,
            tools_visible: true,
            brightness_visible: controls.contains(&Control::Brightness),
            contrast_visible: controls.contains(&Control::Contrast),
        }
    }

    pub fn disconnected() -> Self {
        Self::default()
    }
}
