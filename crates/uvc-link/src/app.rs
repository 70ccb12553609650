//! Daemon wiring

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

use connection::NoticeSink;
use diagnostics::{install_crash_hook, DiagnosticMonitor};
use usb_device::UsbPlatform;
use uvc_camera::{MockCamera, NativeCamera, UvcCamera};

use crate::commands::spawn_command_reader;
use crate::config::AppConfig;
use crate::hub::{Hub, HubEvent};
use crate::notices::LogNotices;
use crate::scanner::AutoConnectScanner;
use crate::service::CameraService;
use crate::sysfs::SysfsPlatform;

/// Hub inbox depth
const EVENT_QUEUE_DEPTH: usize = 64;

/// Run the daemon until ctrl-c
pub async fn run(config: AppConfig, dry_run: bool) -> Result<()> {
    let sysfs = Arc::new(SysfsPlatform::default());
    let platform: Arc<dyn UsbPlatform> = sysfs.clone();

    let camera: Box<dyn UvcCamera> = if dry_run {
        info!("Dry run: using in-memory camera");
        Box::new(MockCamera::new())
    } else {
        let camera = NativeCamera::load(&config.camera)
            .with_context(|| format!("Failed to load camera library {}", config.camera.library))?;
        Box::new(camera)
    };

    let service = Arc::new(CameraService::new());
    let notices: Arc<dyn NoticeSink> = Arc::new(LogNotices);
    let mut hub = Hub::new(
        &config,
        Arc::clone(&platform),
        camera,
        service.clone(),
        notices,
    );

    let mut tasks = Vec::new();
    if config.diagnostics.enabled {
        info!(dir = %config.diagnostics.dir.display(), "Diagnostics enabled");
        install_crash_hook(config.diagnostics.crash_log());
        hub = hub.with_diagnostics(config.diagnostics.usb_log());
        let monitor = DiagnosticMonitor::new(
            config.diagnostics.monitor_log(),
            Arc::clone(&platform),
            config.filters(),
            Duration::from_millis(config.diagnostics.monitor_interval_ms),
        );
        tasks.push(monitor.spawn());
    }

    let (events, inbox) = mpsc::channel(EVENT_QUEUE_DEPTH);

    if config.auto_connect.enabled {
        tasks.push(AutoConnectScanner::new(config.auto_connect.delay()).spawn(events.clone()));
    }
    start_hotplug(&config, sysfs, events.clone())?;
    tasks.push(spawn_command_reader(tokio::io::stdin(), events.clone()));

    let shutdown = events;
    tasks.push(tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Cannot listen for ctrl-c: {}", e);
            return;
        }
        info!("received ctrl_c, shutting down");
        let _ = shutdown.send(HubEvent::Shutdown).await;
    }));

    hub.run(inbox).await;
    for task in tasks {
        task.abort();
    }
    info!(status = service.status(), "uvc-link stopped");
    Ok(())
}

#[cfg(feature = "udev-monitor")]
fn start_hotplug(
    _config: &AppConfig,
    sysfs: Arc<SysfsPlatform>,
    events: mpsc::Sender<HubEvent>,
) -> Result<()> {
    crate::udev_monitor::spawn_udev_listener(sysfs, events)
        .context("Failed to start udev monitor thread")?;
    Ok(())
}

#[cfg(not(feature = "udev-monitor"))]
fn start_hotplug(
    config: &AppConfig,
    sysfs: Arc<SysfsPlatform>,
    events: mpsc::Sender<HubEvent>,
) -> Result<()> {
    crate::watch::HotplugWatcher::new(sysfs, config.hotplug.poll_interval()).spawn(events);
    Ok(())
}
