//! Coordination hub
//!
//! Every state transition happens here, one event at a time: platform
//! notifications, fallback poll ticks, the auto-connect trigger and user
//! commands all funnel into [`Hub`], which owns the permission gate and the
//! connection coordinator.

use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use connection::{ConnectionCoordinator, Notice, NoticeSink, ServiceNotifier};
use diagnostics::{events, DiagnosticLog};
use permission_gate::{
    GateError, PermissionGate, PermissionState, PollOutcome, PollTick, RequestOutcome, Transition,
};
use usb_device::{Device, DeviceId, FilterSet, PlatformEvent, UsbPlatform};
use uvc_camera::{Control, FrameSize, UvcCamera};

use crate::config::AppConfig;
use crate::scanner;

/// User actions
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Connect to a specific attached device
    Connect(DeviceId),
    Close,
    ToggleRecording,
    /// Save a frame; `None` picks a timestamped name
    CaptureStill(Option<PathBuf>),
    /// Re-check access of every attached camera
    CheckPermissions,
    /// Ask again after a permission request timed out
    RetryPermission(DeviceId),
    SetControl(Control, i32),
    /// Restore the camera default; `None` resets every exposed control
    ResetControl(Option<Control>),
    ChangeResolution(FrameSize),
    ListResolutions,
}

/// Inbound hub event
#[derive(Debug, Clone)]
pub enum HubEvent {
    Platform(PlatformEvent),
    AutoConnect,
    Command(Command),
    Shutdown,
}

pub struct Hub {
    platform: Arc<dyn UsbPlatform>,
    filters: FilterSet,
    gate: PermissionGate,
    coordinator: ConnectionCoordinator,
    notices: Arc<dyn NoticeSink>,
    diagnostics: Option<DiagnosticLog>,
    ticks: mpsc::UnboundedReceiver<PollTick>,
}

impl Hub {
    pub fn new(
        config: &AppConfig,
        platform: Arc<dyn UsbPlatform>,
        camera: Box<dyn UvcCamera>,
        service: Arc<dyn ServiceNotifier>,
        notices: Arc<dyn NoticeSink>,
    ) -> Self {
        let (tick_tx, ticks) = mpsc::unbounded_channel();
        Self {
            platform,
            filters: config.filters(),
            gate: PermissionGate::new(config.permission.clone(), tick_tx),
            coordinator: ConnectionCoordinator::new(
                camera,
                &config.camera,
                service,
                Arc::clone(&notices),
            ),
            notices,
            diagnostics: None,
            ticks,
        }
    }

    pub fn with_diagnostics(mut self, log: DiagnosticLog) -> Self {
        self.diagnostics = Some(log);
        self
    }

    pub fn coordinator(&self) -> &ConnectionCoordinator {
        &self.coordinator
    }

    pub fn permission_state(&self, id: &DeviceId) -> PermissionState {
        self.gate.state(id)
    }

    pub fn is_polling(&self, id: &DeviceId) -> bool {
        self.gate.is_polling(id)
    }

    /// Wait for the next fallback poll tick
    pub async fn next_tick(&mut self) -> Option<PollTick> {
        self.ticks.recv().await
    }

    /// Process events until `Shutdown` or until every sender is gone
    pub async fn run(mut self, mut events: mpsc::Receiver<HubEvent>) {
        info!(filters = self.filters.len(), "Hub started");
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(HubEvent::Shutdown) | None => break,
                    Some(event) => self.handle_event(event).await,
                },
                Some(tick) = self.ticks.recv() => self.on_poll_tick(tick).await,
            }
        }
        self.shutdown().await;
    }

    pub async fn handle_event(&mut self, event: HubEvent) {
        match event {
            HubEvent::Platform(PlatformEvent::Attached(device)) => self.on_attached(device).await,
            HubEvent::Platform(PlatformEvent::Detached(id)) => self.on_detached(&id).await,
            HubEvent::Platform(PlatformEvent::PermissionResult {
                device,
                granted,
                channel,
            }) => {
                debug!(device = %device.id, granted, ?channel, "Permission result");
                self.on_permission_result(device, granted).await;
            }
            HubEvent::AutoConnect => self.auto_connect().await,
            HubEvent::Command(command) => self.on_command(command).await,
            HubEvent::Shutdown => self.shutdown().await,
        }
    }

    pub async fn on_poll_tick(&mut self, tick: PollTick) {
        match self.gate.on_poll_tick(tick, self.platform.as_ref()).await {
            PollOutcome::Granted(device) => {
                self.record(events::FALLBACK_PERMISSION_GRANTED, Some(&device), None);
                self.connect(device).await;
            }
            PollOutcome::TimedOut(device) => {
                self.record(events::USB_PERMISSION_TIMED_OUT, Some(&device), None);
                self.notices.notify(Notice::PermissionTimedOut {
                    device: device.id.clone(),
                });
                self.cancel(&device.id);
            }
            PollOutcome::Pending | PollOutcome::Stale => {}
        }
    }

    pub async fn shutdown(&mut self) {
        info!("Hub shutting down");
        self.gate.shutdown();
        self.coordinator.shutdown().await;
    }

    async fn on_attached(&mut self, device: Device) {
        self.record(events::USB_DEVICE_ATTACHED, Some(&device), None);
        if !self.filters.matches(&device) {
            debug!(device = %device, "Ignoring unsupported device");
            return;
        }
        info!(device = %device, "Camera attached");
        self.connect_or_request(device).await;
    }

    async fn on_detached(&mut self, id: &DeviceId) {
        info!(device = %id, "Device detached");
        self.gate.forget(id);
        if self.coordinator.detach(id).await {
            self.record_id(events::HANDLING_USB_DEVICE_DETACHMENT, id);
            self.record_id(events::USB_DEVICE_DISCONNECTED, id);
        } else {
            self.record_id(events::USB_DEVICE_DETACHED, id);
        }
    }

    async fn on_permission_result(&mut self, device: Device, granted: bool) {
        if !self.filters.matches(&device) {
            debug!(device = %device, "Permission result for unsupported device");
            return;
        }
        match self.gate.on_platform_result(&device, granted) {
            Transition::Granted(device) => {
                self.record(events::USB_PERMISSION_GRANTED, Some(&device), None);
                self.connect(device).await;
            }
            Transition::Denied(device) => {
                self.record(events::USB_PERMISSION_DENIED, Some(&device), None);
                self.notices.notify(Notice::PermissionDenied {
                    device: device.id.clone(),
                });
                self.cancel(&device.id);
            }
            Transition::Ignored => {}
        }
    }

    async fn auto_connect(&mut self) {
        if let Some(session) = self.coordinator.session() {
            debug!(device = %session.device_id(), "Session active, skipping auto-connect");
            return;
        }
        let devices = match self.platform.list_devices().await {
            Ok(devices) => devices,
            Err(e) => {
                warn!("Auto-connect scan failed: {}", e);
                self.record(events::USB_CHECK_ERROR, None, Some(&e));
                return;
            }
        };
        match scanner::select_candidate(&devices, &self.filters) {
            Some(device) => {
                let device = device.clone();
                self.connect_or_request(device).await;
            }
            None => info!("No USB camera found at start-up"),
        }
    }

    async fn on_command(&mut self, command: Command) {
        debug!(?command, "Command");
        match command {
            Command::Connect(id) => self.connect_by_id(&id).await,
            Command::Close => {
                self.coordinator.close().await;
            }
            Command::ToggleRecording => {
                if let Err(e) = self.coordinator.toggle_recording().await {
                    warn!("Toggle recording failed: {}", e);
                }
            }
            Command::CaptureStill(path) => {
                if let Err(e) = self.coordinator.capture_still(path).await {
                    warn!("Still capture failed: {}", e);
                }
            }
            Command::CheckPermissions => self.check_permissions().await,
            Command::RetryPermission(id) => match self.find_device(&id).await {
                Some(device) => self.request(device).await,
                None => self.notices.notify(Notice::NoCameraFound),
            },
            Command::SetControl(control, value) => {
                if let Err(e) = self.coordinator.set_control(control, value).await {
                    warn!(%control, value, "Setting control failed: {}", e);
                }
            }
            Command::ResetControl(Some(control)) => {
                if let Err(e) = self.coordinator.reset_control(control).await {
                    warn!(%control, "Resetting control failed: {}", e);
                }
            }
            Command::ResetControl(None) => {
                if let Err(e) = self.coordinator.reset_controls().await {
                    warn!("Resetting controls failed: {}", e);
                }
            }
            Command::ChangeResolution(size) => {
                if let Err(e) = self.coordinator.change_resolution(size).await {
                    warn!(%size, "Resolution change failed: {}", e);
                }
            }
            Command::ListResolutions => {
                if let Ok(sizes) = self.coordinator.list_resolutions() {
                    info!(current = %self.coordinator.preview_size(), ?sizes, "Preview sizes");
                }
            }
        }
    }

    async fn connect_by_id(&mut self, id: &DeviceId) {
        if self.coordinator.is_connected_to(id) {
            debug!(device = %id, "Already connected");
            return;
        }
        let Some(device) = self.find_device(id).await else {
            self.notices.notify(Notice::NoCameraFound);
            return;
        };
        if !self.filters.matches(&device) {
            self.notices.notify(Notice::NotSupported { device: device.id });
            return;
        }
        self.connect_or_request(device).await;
    }

    /// Manual fallback: connect the first attached camera that is already
    /// accessible, recording every silent grant on the way
    async fn check_permissions(&mut self) {
        let devices = match self.platform.list_devices().await {
            Ok(devices) => devices,
            Err(e) => {
                warn!("Permission check failed: {}", e);
                self.record(events::USB_CHECK_ERROR, None, Some(&e));
                return;
            }
        };

        let cameras: Vec<Device> = devices
            .into_iter()
            .filter(|d| self.filters.matches(d))
            .collect();
        if cameras.is_empty() {
            self.notices.notify(Notice::NoCameraFound);
            return;
        }

        for device in cameras {
            if self.gate.state(&device.id) == PermissionState::Denied {
                debug!(device = %device.id, "Skipping denied device");
                continue;
            }
            if !self.platform.has_permission(&device).await {
                debug!(device = %device.id, "Still no access");
                continue;
            }
            if self.gate.note_granted(&device) {
                self.record(events::FALLBACK_PERMISSION_GRANTED, Some(&device), None);
            }
            if self.coordinator.session().is_none() {
                self.connect(device).await;
            }
        }
    }

    /// Denied devices go through `request`, which reports the denial
    async fn connect_or_request(&mut self, device: Device) {
        let denied = self.gate.state(&device.id) == PermissionState::Denied;
        if !denied && self.platform.has_permission(&device).await {
            self.gate.note_granted(&device);
            self.connect(device).await;
        } else {
            self.request(device).await;
        }
    }

    async fn request(&mut self, device: Device) {
        self.record(events::REQUESTING_USB_PERMISSION, Some(&device), None);
        match self
            .gate
            .request_permission(&device, self.platform.as_ref())
            .await
        {
            Ok(RequestOutcome::Requested) => {}
            Ok(RequestOutcome::AlreadyGranted) => {
                if !self.coordinator.is_connected_to(&device.id) {
                    self.connect(device).await;
                }
            }
            Err(GateError::AlreadyRequested(id)) => {
                debug!(device = %id, "Permission request already outstanding");
            }
            Err(GateError::PermissionDenied(id)) => {
                self.notices.notify(Notice::PermissionDenied { device: id.clone() });
                self.cancel(&id);
            }
            Err(e @ GateError::Platform(_)) => {
                warn!(device = %device.id, "Permission request failed: {}", e);
                self.record(events::USB_PERMISSION_REQUEST_ERROR, Some(&device), Some(&e));
                self.cancel(&device.id);
            }
        }
    }

    /// Open the platform connection and hand it to the coordinator
    async fn connect(&mut self, device: Device) {
        self.record(events::HANDLING_USB_DEVICE_WITH_PERMISSION, Some(&device), None);
        let control = match self.platform.open_control(&device).await {
            Ok(control) => control,
            Err(e) => {
                warn!(device = %device.id, "Opening device failed: {}", e);
                self.record(events::USB_CONNECTION_ERROR, Some(&device), Some(&e));
                self.notices.notify(Notice::OpenFailed {
                    device: device.id.clone(),
                    reason: e.to_string(),
                });
                self.coordinator.on_permission_cancelled(&device.id);
                return;
            }
        };

        match self.coordinator.attach(device.clone(), control).await {
            Ok(()) => self.record(events::USB_DEVICE_CONNECTED, Some(&device), None),
            Err(e) => self.record(events::USB_CONNECTION_ERROR, Some(&device), Some(&e)),
        }
    }

    /// The handshake ended without access
    fn cancel(&mut self, id: &DeviceId) {
        self.record_id(events::USB_PERMISSION_CANCELLED, id);
        self.coordinator.on_permission_cancelled(id);
    }

    async fn find_device(&self, id: &DeviceId) -> Option<Device> {
        match self.platform.list_devices().await {
            Ok(devices) => devices.into_iter().find(|d| &d.id == id),
            Err(e) => {
                warn!("Listing devices failed: {}", e);
                self.gate.device(id).cloned()
            }
        }
    }

    fn record(&self, event: &str, device: Option<&Device>, error: Option<&dyn std::error::Error>) {
        if let Some(log) = &self.diagnostics {
            log.record(event, device, None, error);
        }
    }

    fn record_id(&self, event: &str, id: &DeviceId) {
        if let Some(log) = &self.diagnostics {
            log.record(event, None, Some(&format!("device={}", id)), None);
        }
    }
}
