//! Single-session connection coordinator

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use usb_device::{ControlBlock, Device, DeviceId};
use uvc_camera::{CameraConfig, CameraError, Control, FrameSize, PreviewTarget, UvcCamera};

use crate::error::ConnectError;
use crate::notice::{Notice, NoticeSink};
use crate::session::{Affordances, Session};
use crate::worker::CameraWorker;

/// Bound service collaborator. Fire-and-forget.
pub trait ServiceNotifier: Send + Sync {
    fn on_device_connected(&self, control: &ControlBlock);

    fn on_device_disconnected(&self);
}

/// Owner of the one live camera session.
///
/// All methods run on the coordination task; camera calls go through the
/// [`CameraWorker`] so the task only waits on them.
pub struct ConnectionCoordinator {
    worker: CameraWorker,
    service: Arc<dyn ServiceNotifier>,
    notices: Arc<dyn NoticeSink>,
    preview: PreviewTarget,
    recordings_dir: PathBuf,
    session: Option<Session>,
    affordances: Affordances,
}

impl ConnectionCoordinator {
    pub fn new(
        camera: Box<dyn UvcCamera>,
        config: &CameraConfig,
        service: Arc<dyn ServiceNotifier>,
        notices: Arc<dyn NoticeSink>,
    ) -> Self {
        Self {
            worker: CameraWorker::new(camera, Duration::from_millis(config.open_timeout_ms)),
            service,
            notices,
            preview: config.preview_target(),
            recordings_dir: config.recordings_dir.clone(),
            session: None,
            affordances: Affordances::disconnected(),
        }
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn is_connected_to(&self, id: &DeviceId) -> bool {
        self.session.as_ref().is_some_and(|s| s.device_id() == id)
    }

    pub fn affordances(&self) -> Affordances {
        self.affordances
    }

    /// Open `device` and start preview, replacing any existing session
    pub async fn attach(&mut self, device: Device, control: ControlBlock) -> Result<(), ConnectError> {
        if let Some(stale) = self.session.take() {
            if stale.device_id() == &device.id {
                info!(device = %device.id, "Replacing stale session");
            } else {
                info!(
                    device = %device.id,
                    previous = %stale.device_id(),
                    "Closing previous session"
                );
            }
            self.teardown(stale).await;
        }

        info!(device = %device.id, vid_pid = %device.vid_pid(), "Opening camera");
        let control = Arc::new(control);

        let open_control = Arc::clone(&control);
        if let Err(e) = self.worker.run(move |camera| camera.open(&open_control)).await {
            return Err(self.open_failed(&device, e));
        }

        let target = self.preview.clone();
        let preview = self
            .worker
            .run(move |camera| {
                let started = camera.start_preview(&target);
                if started.is_err() {
                    camera.close();
                }
                started
            })
            .await;
        if let Err(e) = preview {
            return Err(self.open_failed(&device, e));
        }

        let (controls, sizes) = self.query_capabilities().await;
        self.service.on_device_connected(&control);
        self.affordances = Affordances::for_controls(&controls);
        self.notices.notify(Notice::connected(&device));
        info!(device = %device.id, ?controls, sizes = sizes.len(), "Camera session started");
        self.session = Some(Session::new(device, control).with_capabilities(controls, sizes));
        Ok(())
    }

    /// Tear down the session for `id`. Returns false when there is none.
    pub async fn detach(&mut self, id: &DeviceId) -> bool {
        if !self.is_connected_to(id) {
            debug!(device = %id, "Detach without session");
            return false;
        }
        match self.session.take() {
            Some(session) => {
                self.teardown(session).await;
                true
            }
            None => false,
        }
    }

    /// Permission flow ended without a session; only the UI is reset
    pub fn on_permission_cancelled(&mut self, id: &DeviceId) {
        if self.session.is_some() {
            debug!(device = %id, "Permission cancelled while another session is live");
            return;
        }
        self.affordances = Affordances::disconnected();
    }

    /// Close whatever session is active. Returns false when none was.
    pub async fn close(&mut self) -> bool {
        match self.session.take() {
            Some(session) => {
                self.teardown(session).await;
                true
            }
            None => {
                self.affordances = Affordances::disconnected();
                false
            }
        }
    }

    /// Start recording if idle, stop if recording. Returns the new state.
    pub async fn toggle_recording(&mut self) -> Result<bool, ConnectError> {
        let recording = self.require_session()?.is_recording();
        if recording {
            self.stop_recording().await?;
            Ok(false)
        } else {
            self.start_recording().await?;
            Ok(true)
        }
    }

    pub async fn start_recording(&mut self) -> Result<PathBuf, ConnectError> {
        if let Some(path) = self.require_session()?.recording() {
            return Ok(path.to_path_buf());
        }

        let path = self.recordings_dir.join(capture_name("mp4"));
        let dir = self.recordings_dir.clone();
        let target = path.clone();
        self.worker
            .run(move |camera| {
                ensure_dir(&dir).map_err(CameraError::Recording)?;
                camera.start_recording(&target)
            })
            .await?;

        if let Some(session) = self.session.as_mut() {
            session.set_recording(Some(path.clone()));
        }
        self.affordances.recording = true;
        info!(path = %path.display(), "Recording started");
        self.notices.notify(Notice::RecordingStarted { path: path.clone() });
        Ok(path)
    }

    /// Stop the recording in progress, returning its output file
    pub async fn stop_recording(&mut self) -> Result<Option<PathBuf>, ConnectError> {
        let Some(path) = self.require_session()?.recording().map(Path::to_path_buf) else {
            return Ok(None);
        };

        let result = self.worker.run(|camera| camera.stop_recording()).await;
        if let Some(session) = self.session.as_mut() {
            session.set_recording(None);
        }
        self.affordances.recording = false;
        result?;

        info!(path = %path.display(), "Recording stopped");
        self.notices.notify(Notice::RecordingStopped { path: path.clone() });
        Ok(Some(path))
    }

    /// Save one frame to `path`, or to a timestamped file in the recordings
    /// directory
    pub async fn capture_still(&mut self, path: Option<PathBuf>) -> Result<PathBuf, ConnectError> {
        self.require_session()?;

        let path = path.unwrap_or_else(|| self.recordings_dir.join(capture_name("png")));
        let target = path.clone();
        self.worker
            .run(move |camera| {
                if let Some(dir) = target.parent() {
                    ensure_dir(dir).map_err(CameraError::Capture)?;
                }
                camera.capture_still(&target)
            })
            .await?;

        info!(path = %path.display(), "Still captured");
        self.notices.notify(Notice::StillCaptured { path: path.clone() });
        Ok(path)
    }

    /// Current value of `control`
    pub async fn control_value(&mut self, control: Control) -> Result<i32, ConnectError> {
        self.require_control(control)?;
        Ok(self.worker.run(move |camera| camera.get_value(control)).await?)
    }

    /// Set `control` to a percentage in [`Control::RANGE`]; returns the
    /// value the camera applied
    pub async fn set_control(&mut self, control: Control, value: i32) -> Result<i32, ConnectError> {
        self.require_control(control)?;
        if !Control::RANGE.contains(&value) {
            return Err(CameraError::Control(format!(
                "{} value {} outside {}..={}",
                control,
                value,
                Control::RANGE.start(),
                Control::RANGE.end()
            ))
            .into());
        }
        let applied = self
            .worker
            .run(move |camera| camera.set_value(control, value))
            .await?;
        info!(%control, value = applied, "Control changed");
        self.notices.notify(Notice::ControlChanged {
            control,
            value: applied,
        });
        Ok(applied)
    }

    /// Restore the camera default for `control`
    pub async fn reset_control(&mut self, control: Control) -> Result<i32, ConnectError> {
        self.require_control(control)?;
        let value = self.worker.run(move |camera| camera.reset_value(control)).await?;
        info!(%control, value, "Control reset");
        self.notices.notify(Notice::ControlChanged { control, value });
        Ok(value)
    }

    /// Reset every control the live camera exposes
    pub async fn reset_controls(&mut self) -> Result<Vec<(Control, i32)>, ConnectError> {
        let controls = self.require_session()?.controls().to_vec();
        let mut values = Vec::with_capacity(controls.len());
        for control in controls {
            values.push((control, self.reset_control(control).await?));
        }
        Ok(values)
    }

    /// Size preview currently runs at, or will start at
    pub fn preview_size(&self) -> FrameSize {
        self.preview.size()
    }

    /// Announce the current and available preview sizes
    pub fn list_resolutions(&self) -> Result<Vec<FrameSize>, ConnectError> {
        let sizes = self.require_session()?.sizes().to_vec();
        self.notices.notify(Notice::Resolutions {
            current: self.preview.size(),
            sizes: sizes.clone(),
        });
        Ok(sizes)
    }

    /// Restart preview at `size`.
    ///
    /// When the camera rejects the new size preview is restarted at the
    /// previous one. If that fails too the session is closed.
    pub async fn change_resolution(&mut self, size: FrameSize) -> Result<FrameSize, ConnectError> {
        let session = self.require_session()?;
        let current = self.preview.size();
        if size == current {
            return Ok(size);
        }
        let refused = if !session.sizes().contains(&size) {
            Some(CameraError::Unsupported(format!("preview size {}", size)))
        } else if session.is_recording() {
            Some(CameraError::Preview("recording in progress".into()))
        } else {
            None
        };
        if let Some(e) = refused {
            self.resolution_failed(size, &e);
            return Err(e.into());
        }

        let previous = self.preview.clone();
        let attempt = previous.clone().with_size(size);
        let target = attempt.clone();
        let fallback = previous.clone();
        let result = self
            .worker
            .run(move |camera| {
                camera.stop_preview();
                match camera.start_preview(&target) {
                    Ok(()) => Ok(Ok(())),
                    Err(e) => camera.start_preview(&fallback).map(|()| Err(e)),
                }
            })
            .await;

        match result {
            Ok(Ok(())) => {
                self.preview = attempt;
                info!(%size, "Preview resolution changed");
                self.notices.notify(Notice::ResolutionChanged { size });
                Ok(size)
            }
            Ok(Err(e)) => {
                warn!(%size, "Camera rejected preview size, restored {}: {}", current, e);
                self.resolution_failed(size, &e);
                Err(e.into())
            }
            Err(e) => {
                error!(%size, "Preview could not be restarted: {}", e);
                self.resolution_failed(size, &e);
                self.close().await;
                Err(e.into())
            }
        }
    }

    pub async fn shutdown(&mut self) {
        if self.close().await {
            info!("Camera session closed on shutdown");
        }
    }

    fn require_session(&self) -> Result<&Session, ConnectError> {
        match self.session.as_ref() {
            Some(session) => Ok(session),
            None => {
                self.notices.notify(Notice::NotConnected);
                Err(ConnectError::NoSession)
            }
        }
    }

    fn require_control(&self, control: Control) -> Result<(), ConnectError> {
        if self.require_session()?.supports(control) {
            return Ok(());
        }
        self.notices.notify(Notice::ControlUnsupported { control });
        Err(CameraError::Unsupported(control.to_string()).into())
    }

    fn resolution_failed(&self, size: FrameSize, reason: &CameraError) {
        self.notices.notify(Notice::ResolutionFailed {
            size,
            current: self.preview.size(),
            reason: reason.to_string(),
        });
    }

    /// Controls and preview sizes of the freshly opened camera. Failures
    /// only hide the affected tools.
    async fn query_capabilities(&self) -> (Vec<Control>, Vec<FrameSize>) {
        let result = self
            .worker
            .run(|camera| {
                let controls = Control::ALL
                    .into_iter()
                    .filter(|c| camera.supports(*c))
                    .collect::<Vec<_>>();
                let sizes = camera.supported_sizes().unwrap_or_else(|e| {
                    warn!("Listing preview sizes failed: {}", e);
                    Vec::new()
                });
                Ok((controls, sizes))
            })
            .await;
        result.unwrap_or_else(|e| {
            warn!("Querying camera capabilities failed: {}", e);
            (Vec::new(), Vec::new())
        })
    }

    fn open_failed(&mut self, device: &Device, source: CameraError) -> ConnectError {
        error!(device = %device.id, "Camera open failed: {}", source);
        if matches!(source, CameraError::Timeout(_)) {
            self.worker.close_detached();
        }
        self.affordances = Affordances::disconnected();
        self.notices.notify(Notice::OpenFailed {
            device: device.id.clone(),
            reason: source.to_string(),
        });
        ConnectError::Open {
            device: device.id.clone(),
            source,
        }
    }

    async fn teardown(&mut self, session: Session) {
        let id = session.device_id().clone();
        // keep the device node open until the camera lets go of it
        let control = session.control_arc();
        let result = self
            .worker
            .run(move |camera| {
                if camera.is_recording() {
                    if let Err(e) = camera.stop_recording() {
                        warn!("Stopping recording failed: {}", e);
                    }
                }
                camera.stop_preview();
                camera.close();
                drop(control);
                Ok(())
            })
            .await;
        if let Err(e) = result {
            warn!(device = %id, "Camera close did not complete: {}", e);
        }

        if let Some(path) = session.recording() {
            self.notices.notify(Notice::RecordingStopped {
                path: path.to_path_buf(),
            });
        }
        self.service.on_device_disconnected();
        self.affordances = Affordances::disconnected();
        self.notices.notify(Notice::Disconnected { device: id.clone() });
        info!(device = %id, uptime = ?session.uptime(), "Camera session closed");
    }
}

fn capture_name(extension: &str) -> String {
    format!(
        "{}.{}",
        chrono::Local::now().format("%Y-%m-%d-%H-%M-%S"),
        extension
    )
}

fn ensure_dir(dir: &Path) -> Result<(), String> {
    std::fs::create_dir_all(dir).map_err(|e| format!("{}: {}", dir.display(), e))
}
