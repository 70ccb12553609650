//! End-to-end permission handshake scenarios against the in-memory platform

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use connection::{Affordances, Notice, NoticeBuffer};
use diagnostics::{events, DiagnosticLog};
use permission_gate::{PermissionState, PollPolicy};
use usb_device::{class, Device, DeviceFilter, FilterSet, PermissionChannel, PlatformEvent, UsbClass};
use usb_platform_mock::MockPlatform;
use uvc_camera::{Control, FrameSize, MockCamera};
use uvc_link::{AppConfig, CameraService, Command, Hub, HubEvent};

struct Harness {
    hub: Hub,
    platform: MockPlatform,
    camera: MockCamera,
    service: Arc<CameraService>,
    notices: Arc<NoticeBuffer>,
    _recordings: tempfile::TempDir,
}

fn webcam(address: u8) -> Device {
    Device::new(format!("/dev/bus/usb/001/{:03}", address), 0x1234, 0x5678)
        .with_interface(UsbClass::new(class::VIDEO, 0x01, 0x00))
        .with_name(format!("Webcam {}", address))
}

fn keyboard() -> Device {
    Device::new("/dev/bus/usb/001/002", 0x046d, 0xc31c)
        .with_interface(UsbClass::new(0x03, 0x01, 0x01))
}

fn config(recordings: &tempfile::TempDir, max_attempts: u32) -> AppConfig {
    let mut config = AppConfig::default();
    config.permission = PollPolicy {
        initial_delay_ms: 20,
        interval_ms: 20,
        multiplier: 1.0,
        max_interval_ms: 20,
        max_attempts,
    };
    config.camera.open_timeout_ms = 1000;
    config.camera.recordings_dir = recordings.path().to_path_buf();
    config.diagnostics.enabled = false;
    config
}

fn harness(devices: Vec<Device>) -> Harness {
    harness_with_attempts(devices, 3)
}

fn harness_with_attempts(devices: Vec<Device>, max_attempts: u32) -> Harness {
    harness_with(devices, |config| config.permission.max_attempts = max_attempts)
}

fn harness_with(devices: Vec<Device>, adjust: impl FnOnce(&mut AppConfig)) -> Harness {
    let recordings = tempfile::tempdir().unwrap();
    let platform = MockPlatform::with_devices(devices);
    let camera = MockCamera::new();
    let service = Arc::new(CameraService::new());
    let notices = Arc::new(NoticeBuffer::default());
    let mut config = config(&recordings, 3);
    adjust(&mut config);
    let hub = Hub::new(
        &config,
        Arc::new(platform.clone()),
        Box::new(camera.clone()),
        service.clone(),
        notices.clone(),
    );
    Harness {
        hub,
        platform,
        camera,
        service,
        notices,
        _recordings: recordings,
    }
}

fn attached(device: &Device) -> HubEvent {
    HubEvent::Platform(PlatformEvent::Attached(device.clone()))
}

fn granted(device: &Device, channel: PermissionChannel) -> HubEvent {
    HubEvent::Platform(PlatformEvent::PermissionResult {
        device: device.clone(),
        granted: true,
        channel,
    })
}

fn denied(device: &Device) -> HubEvent {
    HubEvent::Platform(PlatformEvent::PermissionResult {
        device: device.clone(),
        granted: false,
        channel: PermissionChannel::App,
    })
}

fn command(command: Command) -> HubEvent {
    HubEvent::Command(command)
}

async fn no_tick(hub: &mut Hub) -> bool {
    tokio::time::timeout(Duration::from_millis(100), hub.next_tick())
        .await
        .is_err()
}

#[tokio::test]
async fn test_attach_request_grant_opens_once() {
    let cam = webcam(4);
    let mut h = harness(vec![cam.clone()]);

    h.hub.handle_event(attached(&cam)).await;
    assert_eq!(h.platform.permission_requests(), vec![cam.id.clone()]);
    assert_eq!(h.hub.permission_state(&cam.id), PermissionState::Requested);
    assert!(h.hub.is_polling(&cam.id));

    h.hub.handle_event(granted(&cam, PermissionChannel::App)).await;
    assert_eq!(h.platform.open_count(&cam.id), 1);
    assert_eq!(h.camera.open_count(), 1);
    assert!(h.hub.coordinator().is_connected_to(&cam.id));
    assert_eq!(h.hub.coordinator().affordances(), Affordances::connected());
    assert!(h.service.is_connected());
    assert!(!h.hub.is_polling(&cam.id));
    assert!(h
        .notices
        .snapshot()
        .iter()
        .any(|n| matches!(n, Notice::Connected { device, .. } if *device == cam.id)));

    // the cancelled poll never fires
    assert!(no_tick(&mut h.hub).await);
}

#[tokio::test]
async fn test_grant_on_both_channels_opens_once() {
    let cam = webcam(4);
    let mut h = harness(vec![cam.clone()]);

    h.hub.handle_event(attached(&cam)).await;
    h.hub.handle_event(granted(&cam, PermissionChannel::App)).await;
    h.hub.handle_event(granted(&cam, PermissionChannel::Monitor)).await;

    assert_eq!(h.platform.open_count(&cam.id), 1);
    assert_eq!(h.camera.open_count(), 1);
    let connected = h
        .notices
        .snapshot()
        .into_iter()
        .filter(|n| matches!(n, Notice::Connected { .. }))
        .count();
    assert_eq!(connected, 1);
}

#[tokio::test]
async fn test_silent_grant_is_found_by_poll() {
    let cam = webcam(4);
    let mut h = harness(vec![cam.clone()]);
    h.hub.handle_event(attached(&cam)).await;

    let first = h.hub.next_tick().await.unwrap();
    h.hub.on_poll_tick(first).await;
    assert_eq!(h.hub.permission_state(&cam.id), PermissionState::Requested);
    assert_eq!(h.camera.open_count(), 0);

    // granted without any notification reaching us
    h.platform.grant(&cam.id);
    let second = h.hub.next_tick().await.unwrap();
    h.hub.on_poll_tick(second).await;

    assert_eq!(h.hub.permission_state(&cam.id), PermissionState::Granted);
    assert!(h.hub.coordinator().is_connected_to(&cam.id));
    assert!(no_tick(&mut h.hub).await);

    // a notification arriving late changes nothing
    h.hub.handle_event(granted(&cam, PermissionChannel::App)).await;
    assert_eq!(h.camera.open_count(), 1);
    assert_eq!(h.platform.open_count(&cam.id), 1);
}

#[tokio::test]
async fn test_poll_exhaustion_times_out_and_retry_rearms() {
    let cam = webcam(4);
    let mut h = harness(vec![cam.clone()]);
    h.hub.handle_event(attached(&cam)).await;

    for _ in 0..3 {
        let tick = h.hub.next_tick().await.unwrap();
        h.hub.on_poll_tick(tick).await;
    }

    assert_eq!(h.hub.permission_state(&cam.id), PermissionState::TimedOut);
    assert!(!h.hub.is_polling(&cam.id));
    assert_eq!(h.hub.coordinator().affordances(), Affordances::disconnected());
    assert!(h
        .notices
        .snapshot()
        .contains(&Notice::PermissionTimedOut { device: cam.id.clone() }));
    assert!(no_tick(&mut h.hub).await);

    h.hub
        .handle_event(HubEvent::Command(Command::RetryPermission(cam.id.clone())))
        .await;
    assert_eq!(h.platform.request_count(&cam.id), 2);
    assert_eq!(h.hub.permission_state(&cam.id), PermissionState::Requested);
    assert!(h.hub.is_polling(&cam.id));
}

#[tokio::test]
async fn test_denied_resets_ui_and_blocks_requests() {
    let cam = webcam(4);
    let mut h = harness(vec![cam.clone()]);
    h.hub.handle_event(attached(&cam)).await;
    h.hub.handle_event(denied(&cam)).await;

    assert_eq!(h.hub.permission_state(&cam.id), PermissionState::Denied);
    assert_eq!(h.hub.coordinator().affordances(), Affordances::disconnected());
    assert!(h
        .notices
        .snapshot()
        .contains(&Notice::PermissionDenied { device: cam.id.clone() }));

    h.hub
        .handle_event(HubEvent::Command(Command::Connect(cam.id.clone())))
        .await;
    assert_eq!(h.platform.request_count(&cam.id), 1);

    // unplugging clears the verdict
    h.platform.detach(&cam.id);
    h.hub
        .handle_event(HubEvent::Platform(PlatformEvent::Detached(cam.id.clone())))
        .await;
    assert_eq!(h.hub.permission_state(&cam.id), PermissionState::Unrequested);
}

#[tokio::test]
async fn test_detach_without_session_is_noop() {
    let cam = webcam(4);
    let mut h = harness(vec![cam.clone()]);

    h.hub
        .handle_event(HubEvent::Platform(PlatformEvent::Detached(cam.id.clone())))
        .await;
    assert!(h.hub.coordinator().session().is_none());
    assert_eq!(h.camera.close_count(), 0);

    // a pending request is dropped with the device
    h.hub.handle_event(attached(&cam)).await;
    assert!(h.hub.is_polling(&cam.id));
    h.hub
        .handle_event(HubEvent::Platform(PlatformEvent::Detached(cam.id.clone())))
        .await;
    assert!(!h.hub.is_polling(&cam.id));
    assert_eq!(h.hub.permission_state(&cam.id), PermissionState::Unrequested);
    assert!(no_tick(&mut h.hub).await);
}

#[tokio::test]
async fn test_single_session_across_attaches() {
    let first = webcam(4);
    let second = webcam(5);
    let mut h = harness(vec![first.clone(), second.clone()]);
    h.platform.grant(&first.id);
    h.platform.grant(&second.id);

    h.hub.handle_event(attached(&first)).await;
    assert!(h.hub.coordinator().is_connected_to(&first.id));

    h.hub.handle_event(attached(&second)).await;
    assert!(h.hub.coordinator().is_connected_to(&second.id));
    assert_eq!(h.camera.open_count(), 2);
    assert_eq!(h.camera.close_count(), 1);
    assert_eq!(h.service.control().unwrap().device, second.id);

    // detaching the replaced device leaves the live session alone
    h.hub
        .handle_event(HubEvent::Platform(PlatformEvent::Detached(first.id.clone())))
        .await;
    assert!(h.hub.coordinator().is_connected_to(&second.id));

    h.hub
        .handle_event(HubEvent::Platform(PlatformEvent::Detached(second.id.clone())))
        .await;
    assert!(h.hub.coordinator().session().is_none());
    assert!(!h.service.is_connected());
    assert_eq!(h.camera.close_count(), 2);
}

#[tokio::test]
async fn test_open_failure_resets_affordances() {
    let cam = webcam(4);
    let mut h = harness(vec![cam.clone()]);
    h.platform.grant(&cam.id);
    h.camera.fail_open(true);

    h.hub.handle_event(attached(&cam)).await;

    assert!(h.hub.coordinator().session().is_none());
    assert_eq!(h.hub.coordinator().affordances(), Affordances::disconnected());
    assert!(!h.service.is_connected());
    assert!(h
        .notices
        .snapshot()
        .iter()
        .any(|n| matches!(n, Notice::OpenFailed { device, .. } if *device == cam.id)));
}

#[tokio::test]
async fn test_unsupported_device_is_ignored() {
    let mut h = harness(vec![keyboard()]);
    h.hub.handle_event(attached(&keyboard())).await;

    assert!(h.platform.permission_requests().is_empty());
    assert_eq!(h.hub.permission_state(&keyboard().id), PermissionState::Unrequested);

    h.hub
        .handle_event(HubEvent::Command(Command::Connect(keyboard().id)))
        .await;
    assert!(h
        .notices
        .snapshot()
        .contains(&Notice::NotSupported { device: keyboard().id }));
}

#[tokio::test]
async fn test_auto_connect_picks_first_camera() {
    let cam = webcam(4);
    let mut h = harness(vec![keyboard(), cam.clone(), webcam(5)]);
    h.platform.grant(&cam.id);

    h.hub.handle_event(HubEvent::AutoConnect).await;
    assert!(h.hub.coordinator().is_connected_to(&cam.id));

    // a second scan while connected does nothing
    h.hub.handle_event(HubEvent::AutoConnect).await;
    assert_eq!(h.camera.open_count(), 1);
    assert!(h.platform.permission_requests().is_empty());
}

#[tokio::test]
async fn test_check_permissions() {
    let mut h = harness(vec![keyboard()]);
    h.hub
        .handle_event(HubEvent::Command(Command::CheckPermissions))
        .await;
    assert!(h.notices.snapshot().contains(&Notice::NoCameraFound));

    let cam = webcam(4);
    h.platform.attach(cam.clone());
    h.hub.handle_event(attached(&cam)).await;
    assert_eq!(h.hub.permission_state(&cam.id), PermissionState::Requested);

    h.platform.grant(&cam.id);
    h.hub
        .handle_event(HubEvent::Command(Command::CheckPermissions))
        .await;
    assert_eq!(h.hub.permission_state(&cam.id), PermissionState::Granted);
    assert!(h.hub.coordinator().is_connected_to(&cam.id));
    assert!(!h.hub.is_polling(&cam.id));
}

#[tokio::test]
async fn test_recording_commands_need_session() {
    let cam = webcam(4);
    let mut h = harness(vec![cam.clone()]);

    h.hub
        .handle_event(HubEvent::Command(Command::ToggleRecording))
        .await;
    assert!(h.notices.snapshot().contains(&Notice::NotConnected));

    h.platform.grant(&cam.id);
    h.hub.handle_event(attached(&cam)).await;
    h.hub
        .handle_event(HubEvent::Command(Command::ToggleRecording))
        .await;
    assert!(h.hub.coordinator().session().unwrap().is_recording());
    assert!(h.camera.state().recording.is_some());

    h.hub
        .handle_event(HubEvent::Command(Command::ToggleRecording))
        .await;
    assert!(!h.hub.coordinator().session().unwrap().is_recording());
}

#[tokio::test]
async fn test_run_loop_connects_and_closes_on_shutdown() {
    let cam = webcam(4);
    let h = harness_with_attempts(vec![cam.clone()], 100);
    let (tx, rx) = mpsc::channel(8);
    let hub = tokio::spawn(h.hub.run(rx));

    tx.send(attached(&cam)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    h.platform.grant(&cam.id);

    // the fallback poll picks up the grant on its own
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !h.service.is_connected() {
        assert!(tokio::time::Instant::now() < deadline, "never connected");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    tx.send(HubEvent::Shutdown).await.unwrap();
    hub.await.unwrap();

    assert!(!h.service.is_connected());
    assert_eq!(h.camera.open_count(), 1);
    assert_eq!(h.camera.close_count(), 1);
}

#[tokio::test]
async fn test_access_after_denial_does_not_connect() {
    let cam = webcam(4);
    let mut h = harness(vec![cam.clone()]);
    h.hub.handle_event(attached(&cam)).await;
    h.hub.handle_event(denied(&cam)).await;

    // access shows up anyway, e.g. a udev rule applied later
    h.platform.grant(&cam.id);
    h.hub.handle_event(command(Command::CheckPermissions)).await;
    assert_eq!(h.hub.permission_state(&cam.id), PermissionState::Denied);
    assert!(h.hub.coordinator().session().is_none());

    h.hub.handle_event(command(Command::Connect(cam.id.clone()))).await;
    h.hub.handle_event(HubEvent::AutoConnect).await;
    assert_eq!(h.hub.permission_state(&cam.id), PermissionState::Denied);
    assert!(h.hub.coordinator().session().is_none());
    assert_eq!(h.camera.open_count(), 0);
    assert_eq!(h.platform.open_count(&cam.id), 0);
    assert_eq!(h.platform.request_count(&cam.id), 1);
    let denials = h
        .notices
        .snapshot()
        .into_iter()
        .filter(|n| matches!(n, Notice::PermissionDenied { .. }))
        .count();
    assert_eq!(denials, 3);
}

#[tokio::test]
async fn test_platform_open_failure_resets_affordances() {
    let cam = webcam(4);
    let mut h = harness(vec![cam.clone()]);
    h.platform.grant(&cam.id);
    h.platform.fail_open(&cam.id);

    h.hub.handle_event(attached(&cam)).await;

    assert!(h.hub.coordinator().session().is_none());
    assert_eq!(h.hub.coordinator().affordances(), Affordances::disconnected());
    assert_eq!(h.camera.open_count(), 0);
    assert!(!h.service.is_connected());
    assert!(h.notices.snapshot().iter().any(|n| matches!(
        n,
        Notice::OpenFailed { device, reason } if *device == cam.id && reason.contains("mock failure")
    )));
}

#[tokio::test]
async fn test_request_failure_cancels_handshake() {
    let cam = webcam(4);
    let logs = tempfile::tempdir().unwrap();
    let log = DiagnosticLog::new(logs.path().join("usb_diagnostic_log.txt"));
    let mut h = harness(vec![cam.clone()]);
    h.hub = h.hub.with_diagnostics(log.clone());
    h.platform.fail_requests(true);

    h.hub.handle_event(attached(&cam)).await;

    assert_eq!(h.hub.permission_state(&cam.id), PermissionState::Unrequested);
    assert!(!h.hub.is_polling(&cam.id));
    assert!(h.hub.coordinator().session().is_none());
    assert_eq!(h.hub.coordinator().affordances(), Affordances::disconnected());
    assert!(no_tick(&mut h.hub).await);

    let contents = std::fs::read_to_string(log.path()).unwrap();
    assert!(contents.contains(&format!("=== {} ===", events::USB_PERMISSION_REQUEST_ERROR)));
    assert!(contents.contains(&format!("=== {} ===", events::USB_PERMISSION_CANCELLED)));

    // the platform recovers; asking again works
    h.platform.fail_requests(false);
    h.hub
        .handle_event(command(Command::RetryPermission(cam.id.clone())))
        .await;
    assert_eq!(h.hub.permission_state(&cam.id), PermissionState::Requested);
    assert!(h.hub.is_polling(&cam.id));
}

#[tokio::test]
async fn test_vendor_filter_matches_classless_device() {
    let cam = Device::new("/dev/bus/usb/002/003", 0x1234, 0x5678);
    let mut h = harness_with(vec![cam.clone(), keyboard()], |config| {
        config.filters = FilterSet::new(vec![DeviceFilter::vendor(0x1234)]);
    });

    h.hub.handle_event(attached(&keyboard())).await;
    h.hub.handle_event(attached(&cam)).await;
    assert_eq!(h.platform.permission_requests(), vec![cam.id.clone()]);

    h.hub.handle_event(granted(&cam, PermissionChannel::App)).await;
    assert_eq!(h.camera.open_count(), 1);
    assert!(h.hub.coordinator().is_connected_to(&cam.id));
    assert_eq!(h.hub.coordinator().affordances(), Affordances::connected());
}

#[tokio::test]
async fn test_grant_during_request_is_found_by_first_poll() {
    let cam = webcam(4);
    let mut h = harness(vec![cam.clone()]);
    h.platform.grant_on_request(true);

    h.hub.handle_event(attached(&cam)).await;
    assert_eq!(h.hub.permission_state(&cam.id), PermissionState::Requested);

    let tick = h.hub.next_tick().await.unwrap();
    h.hub.on_poll_tick(tick).await;
    assert_eq!(h.hub.permission_state(&cam.id), PermissionState::Granted);
    assert!(h.hub.coordinator().is_connected_to(&cam.id));
}

#[tokio::test]
async fn test_camera_control_commands() {
    let cam = webcam(4);
    let mut h = harness(vec![cam.clone()]);

    h.hub
        .handle_event(command(Command::SetControl(Control::Brightness, 80)))
        .await;
    assert!(h.notices.snapshot().contains(&Notice::NotConnected));

    h.platform.grant(&cam.id);
    h.hub.handle_event(attached(&cam)).await;

    h.hub
        .handle_event(command(Command::SetControl(Control::Brightness, 80)))
        .await;
    h.hub
        .handle_event(command(Command::SetControl(Control::Contrast, 30)))
        .await;
    assert_eq!(h.camera.value(Control::Brightness), 80);
    assert_eq!(h.camera.value(Control::Contrast), 30);

    h.hub
        .handle_event(command(Command::ResetControl(Some(Control::Contrast))))
        .await;
    assert_eq!(h.camera.value(Control::Contrast), 50);
    assert_eq!(h.camera.value(Control::Brightness), 80);
    h.hub.handle_event(command(Command::ResetControl(None))).await;
    assert_eq!(h.camera.value(Control::Brightness), 50);

    let hd = FrameSize::new(1280, 720);
    h.hub.handle_event(command(Command::ChangeResolution(hd))).await;
    assert_eq!(h.hub.coordinator().preview_size(), hd);
    assert_eq!(h.camera.state().preview.unwrap().size(), hd);

    h.hub.handle_event(command(Command::ListResolutions)).await;
    assert!(h
        .notices
        .snapshot()
        .iter()
        .any(|n| matches!(n, Notice::Resolutions { current, .. } if *current == hd)));
}
