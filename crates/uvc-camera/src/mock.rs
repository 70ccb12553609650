//! Scriptable camera for tests and dry runs

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

use usb_device::{ControlBlock, DeviceId};

use crate::{CameraError, Control, FrameSize, PreviewTarget, UvcCamera};

/// Value every control starts at and resets to
pub const MOCK_DEFAULT_VALUE: i32 = 50;

/// Observable state shared between a [`MockCamera`] and the test
#[derive(Debug, Clone)]
pub struct MockCameraState {
    pub opened: Option<DeviceId>,
    pub previewing: bool,
    /// Target of the last successful `start_preview`
    pub preview: Option<PreviewTarget>,
    pub preview_starts: usize,
    pub controls: Vec<Control>,
    pub values: HashMap<Control, i32>,
    pub sizes: Vec<FrameSize>,
    /// Preview start fails for these sizes
    pub rejected_sizes: Vec<FrameSize>,
    pub recording: Option<PathBuf>,
    pub stills: Vec<PathBuf>,
    pub open_calls: Vec<DeviceId>,
    pub close_calls: usize,
    pub fail_open: bool,
    pub fail_preview: bool,
    pub open_delay: Option<Duration>,
}

impl Default for MockCameraState {
    fn default() -> Self {
        Self {
            opened: None,
            previewing: false,
            preview: None,
            preview_starts: 0,
            controls: Control::ALL.to_vec(),
            values: HashMap::new(),
            sizes: vec![
                FrameSize::new(640, 480),
                FrameSize::new(1280, 720),
                FrameSize::new(1920, 1080),
            ],
            rejected_sizes: Vec::new(),
            recording: None,
            stills: Vec::new(),
            open_calls: Vec::new(),
            close_calls: 0,
            fail_open: false,
            fail_preview: false,
            open_delay: None,
        }
    }
}

#[derive(Clone, Default)]
pub struct MockCamera {
    state: Arc<Mutex<MockCameraState>>,
}

impl MockCamera {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockCameraState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn state(&self) -> MockCameraState {
        self.lock().clone()
    }

    pub fn fail_open(&self, enabled: bool) {
        self.lock().fail_open = enabled;
    }

    pub fn fail_preview(&self, enabled: bool) {
        self.lock().fail_preview = enabled;
    }

    /// Block inside `open` for `delay`, as a hung device would
    pub fn delay_open(&self, delay: Duration) {
        self.lock().open_delay = Some(delay);
    }

    /// Expose only `controls`
    pub fn set_controls(&self, controls: &[Control]) {
        self.lock().controls = controls.to_vec();
    }

    pub fn set_sizes(&self, sizes: &[FrameSize]) {
        self.lock().sizes = sizes.to_vec();
    }

    /// Advertise `size` but fail to stream at it
    pub fn reject_size(&self, size: FrameSize) {
        self.lock().rejected_sizes.push(size);
    }

    fn require_control(&self, control: Control) -> Result<(), CameraError> {
        let state = self.lock();
        if state.opened.is_none() {
            return Err(CameraError::NotOpened);
        }
        if !state.controls.contains(&control) {
            return Err(CameraError::Unsupported(control.to_string()));
        }
        Ok(())
    }

    pub fn value(&self, control: Control) -> i32 {
        self.lock()
            .values
            .get(&control)
            .copied()
            .unwrap_or(MOCK_DEFAULT_VALUE)
    }

    pub fn open_count(&self) -> usize {
        self.lock().open_calls.len()
    }

    pub fn close_count(&self) -> usize {
        self.lock().close_calls
    }
}

impl UvcCamera for MockCamera {
    fn open(&mut self, control: &ControlBlock) -> Result<(), CameraError> {
        let delay = self.lock().open_delay;
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }

        let mut state = self.lock();
        state.open_calls.push(control.device.clone());
        if state.fail_open {
            return Err(CameraError::Open(format!(
                "unsupported device {:04x}:{:04x}",
                control.vendor_id, control.product_id
            )));
        }
        debug!(device = %control.device, "mock camera opened");
        state.opened = Some(control.device.clone());
        Ok(())
    }

    fn close(&mut self) {
        let mut state = self.lock();
        if state.opened.take().is_some() {
            state.close_calls += 1;
        }
        state.previewing = false;
        state.recording = None;
    }

    fn is_opened(&self) -> bool {
        self.lock().opened.is_some()
    }

    fn start_preview(&mut self, target: &PreviewTarget) -> Result<(), CameraError> {
        let mut state = self.lock();
        if state.opened.is_none() {
            return Err(CameraError::NotOpened);
        }
        if state.fail_preview {
            return Err(CameraError::Preview("mock failure".into()));
        }
        if state.rejected_sizes.contains(&target.size()) {
            return Err(CameraError::Preview(format!("{} not negotiated", target.size())));
        }
        state.previewing = true;
        state.preview = Some(target.clone());
        state.preview_starts += 1;
        Ok(())
    }

    fn stop_preview(&mut self) {
        self.lock().previewing = false;
    }

    fn start_recording(&mut self, path: &Path) -> Result<(), CameraError> {
        let mut state = self.lock();
        if state.opened.is_none() {
            return Err(CameraError::NotOpened);
        }
        state.recording = Some(path.to_path_buf());
        Ok(())
    }

    fn stop_recording(&mut self) -> Result<(), CameraError> {
        self.lock().recording = None;
        Ok(())
    }

    fn is_recording(&self) -> bool {
        self.lock().recording.is_some()
    }

    fn capture_still(&mut self, path: &Path) -> Result<(), CameraError> {
        let mut state = self.lock();
        if state.opened.is_none() {
            return Err(CameraError::NotOpened);
        }
        state.stills.push(path.to_path_buf());
        Ok(())
    }

    fn supports(&self, control: Control) -> bool {
        let state = self.lock();
        state.opened.is_some() && state.controls.contains(&control)
    }

    fn get_value(&self, control: Control) -> Result<i32, CameraError> {
        self.require_control(control)?;
        Ok(self.value(control))
    }

    fn set_value(&mut self, control: Control, value: i32) -> Result<i32, CameraError> {
        self.require_control(control)?;
        let applied = value.clamp(*Control::RANGE.start(), *Control::RANGE.end());
        self.lock().values.insert(control, applied);
        Ok(applied)
    }

    fn reset_value(&mut self, control: Control) -> Result<i32, CameraError> {
        self.require_control(control)?;
        self.lock().values.remove(&control);
        Ok(MOCK_DEFAULT_VALUE)
    }

    fn supported_sizes(&self) -> Result<Vec<FrameSize>, CameraError> {
        let state = self.lock();
        if state.opened.is_none() {
            return Err(CameraError::NotOpened);
        }
        Ok(state.sizes.clone())
    }
}
