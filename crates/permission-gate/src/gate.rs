//! Per-device permission state machine

use std::collections::HashMap;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use usb_device::{Device, DeviceId, UsbPlatform};

use crate::error::GateError;
use crate::policy::PollPolicy;

/// Permission state of one device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionState {
    Unrequested,
    Requested,
    Granted,
    Denied,
    TimedOut,
}

/// Fallback poll wake-up for one device.
///
/// `seq` identifies the timer that produced the tick, so a tick left in the
/// channel by a cancelled poll is recognised as stale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollTick {
    pub device: DeviceId,
    seq: u64,
}

/// Result of [`PermissionGate::request_permission`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    /// Request issued; the outcome arrives by notification or poll
    Requested,
    /// Already granted earlier; no request was issued
    AlreadyGranted,
}

/// Result of a platform permission notification
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Granted(Device),
    Denied(Device),
    /// Duplicate or late notification
    Ignored,
}

/// Result of one fallback poll tick
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Granted(Device),
    /// Still waiting; the next tick is scheduled
    Pending,
    /// Attempts exhausted; polling stopped
    TimedOut(Device),
    /// Tick for a request that is no longer outstanding
    Stale,
}

struct Entry {
    device: Device,
    state: PermissionState,
    attempts: u32,
    poll: Option<AbortHandle>,
    seq: u64,
}

impl Entry {
    fn new(device: Device) -> Self {
        Self {
            device,
            state: PermissionState::Unrequested,
            attempts: 0,
            poll: None,
            seq: 0,
        }
    }

    fn stop_poll(&mut self) {
        if let Some(handle) = self.poll.take() {
            handle.abort();
        }
        // invalidate any tick already queued
        self.seq = 0;
    }
}

/// Permission handshake tracker keyed by device identity.
///
/// Owned by a single coordination task; poll timers run as spawned tasks
/// that only send a [`PollTick`] back on `ticks`.
pub struct PermissionGate {
    policy: PollPolicy,
    entries: HashMap<DeviceId, Entry>,
    ticks: mpsc::UnboundedSender<PollTick>,
    next_seq: u64,
}

impl PermissionGate {
    pub fn new(policy: PollPolicy, ticks: mpsc::UnboundedSender<PollTick>) -> Self {
        Self {
            policy,
            entries: HashMap::new(),
            ticks,
            next_seq: 0,
        }
    }

    /// Current state for `id`; unknown devices are `Unrequested`
    pub fn state(&self, id: &DeviceId) -> PermissionState {
        self.entries
            .get(id)
            .map_or(PermissionState::Unrequested, |e| e.state)
    }

    /// Whether a fallback poll is armed for `id`
    pub fn is_polling(&self, id: &DeviceId) -> bool {
        self.entries.get(id).is_some_and(|e| e.poll.is_some())
    }

    /// Issue a platform permission request and arm the fallback poll
    pub async fn request_permission(
        &mut self,
        device: &Device,
        platform: &dyn UsbPlatform,
    ) -> Result<RequestOutcome, GateError> {
        match self.state(&device.id) {
            PermissionState::Requested => {
                return Err(GateError::AlreadyRequested(device.id.clone()));
            }
            PermissionState::Denied => {
                return Err(GateError::PermissionDenied(device.id.clone()));
            }
            PermissionState::Granted => return Ok(RequestOutcome::AlreadyGranted),
            PermissionState::Unrequested | PermissionState::TimedOut => {}
        }

        platform.request_permission(device).await?;
        info!(device = %device.id, "Permission requested");

        let entry = self
            .entries
            .entry(device.id.clone())
            .or_insert_with(|| Entry::new(device.clone()));
        entry.device = device.clone();
        entry.state = PermissionState::Requested;
        entry.attempts = 0;
        entry.stop_poll();

        let delay = self.policy.delay_for(0);
        Self::arm(&self.ticks, &mut self.next_seq, entry, delay);
        Ok(RequestOutcome::Requested)
    }

    /// Apply a permission notification from either platform channel
    pub fn on_platform_result(&mut self, device: &Device, granted: bool) -> Transition {
        let entry = self
            .entries
            .entry(device.id.clone())
            .or_insert_with(|| Entry::new(device.clone()));

        match entry.state {
            PermissionState::Granted | PermissionState::Denied => {
                debug!(device = %device.id, granted, "Duplicate permission result ignored");
                return Transition::Ignored;
            }
            PermissionState::Unrequested
            | PermissionState::Requested
            | PermissionState::TimedOut => {}
        }

        entry.stop_poll();
        entry.device = device.clone();
        if granted {
            info!(device = %device.id, "Permission granted");
            entry.state = PermissionState::Granted;
            Transition::Granted(entry.device.clone())
        } else {
            warn!(device = %device.id, "Permission denied");
            entry.state = PermissionState::Denied;
            Transition::Denied(entry.device.clone())
        }
    }

    /// Re-check the platform for the device named by `tick`
    pub async fn on_poll_tick(&mut self, tick: PollTick, platform: &dyn UsbPlatform) -> PollOutcome {
        let device = match self.entries.get(&tick.device) {
            Some(entry) if entry.state == PermissionState::Requested && entry.seq == tick.seq => {
                entry.device.clone()
            }
            _ => {
                debug!(device = %tick.device, "Stale poll tick");
                return PollOutcome::Stale;
            }
        };

        let granted = platform.has_permission(&device).await;

        // the platform call may have raced a notification
        let Some(entry) = self.entries.get_mut(&tick.device) else {
            return PollOutcome::Stale;
        };
        if entry.state != PermissionState::Requested || entry.seq != tick.seq {
            return PollOutcome::Stale;
        }

        entry.poll = None;
        entry.attempts += 1;
        if granted {
            info!(device = %device.id, attempt = entry.attempts, "Permission granted (poll)");
            entry.state = PermissionState::Granted;
            entry.stop_poll();
            return PollOutcome::Granted(device);
        }

        if entry.attempts >= self.policy.max_attempts {
            warn!(
                device = %device.id,
                attempts = entry.attempts,
                "Permission request timed out"
            );
            entry.state = PermissionState::TimedOut;
            entry.stop_poll();
            return PollOutcome::TimedOut(device);
        }

        let delay = self.policy.delay_for(entry.attempts);
        debug!(device = %device.id, attempt = entry.attempts, ?delay, "Permission still pending");
        Self::arm(&self.ticks, &mut self.next_seq, entry, delay);
        PollOutcome::Pending
    }

    /// Record a grant observed outside the handshake (attach or scan with
    /// permission already held). Returns false when it was already recorded
    /// or when the device was denied; a denial stands until the device is
    /// forgotten.
    pub fn note_granted(&mut self, device: &Device) -> bool {
        let entry = self
            .entries
            .entry(device.id.clone())
            .or_insert_with(|| Entry::new(device.clone()));
        match entry.state {
            PermissionState::Granted => return false,
            PermissionState::Denied => {
                debug!(device = %device.id, "Grant ignored for denied device");
                return false;
            }
            PermissionState::Unrequested
            | PermissionState::Requested
            | PermissionState::TimedOut => {}
        }
        entry.device = device.clone();
        entry.stop_poll();
        entry.state = PermissionState::Granted;
        true
    }

    /// Drop all state for a detached device
    pub fn forget(&mut self, id: &DeviceId) {
        if let Some(mut entry) = self.entries.remove(id) {
            entry.stop_poll();
            debug!(device = %id, state = ?entry.state, "Permission state dropped");
        }
    }

    /// Device known to the gate under `id`
    pub fn device(&self, id: &DeviceId) -> Option<&Device> {
        self.entries.get(id).map(|e| &e.device)
    }

    /// Stop every outstanding poll
    pub fn shutdown(&mut self) {
        for entry in self.entries.values_mut() {
            entry.stop_poll();
        }
        self.entries.clear();
    }

    fn arm(
        ticks: &mpsc::UnboundedSender<PollTick>,
        next_seq: &mut u64,
        entry: &mut Entry,
        delay: std::time::Duration,
    ) {
        *next_seq += 1;
        entry.seq = *next_seq;
        let tick = PollTick {
            device: entry.device.id.clone(),
            seq: entry.seq,
        };
        let ticks = ticks.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // receiver gone means the hub has stopped
            let _ = ticks.send(tick);
        });
        entry.poll = Some(task.abort_handle());
    }
}

impl Drop for PermissionGate {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use usb_platform_mock::MockPlatform;

    fn camera() -> Device {
        Device::new("/dev/bus/usb/001/004", 0x1234, 0x5678)
    }

    fn setup() -> (PermissionGate, mpsc::UnboundedReceiver<PollTick>, MockPlatform) {
        let (tx, rx) = mpsc::unbounded_channel();
        let gate = PermissionGate::new(PollPolicy::default(), tx);
        (gate, rx, MockPlatform::with_devices(vec![camera()]))
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_request_is_rejected() {
        let (mut gate, _rx, platform) = setup();

        let outcome = gate.request_permission(&camera(), &platform).await.unwrap();
        assert_eq!(outcome, RequestOutcome::Requested);
        assert!(gate.is_polling(&camera().id));

        let err = gate.request_permission(&camera(), &platform).await.unwrap_err();
        assert!(matches!(err, GateError::AlreadyRequested(_)));
        assert_eq!(platform.request_count(&camera().id), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_grant_is_ignored() {
        let (mut gate, mut rx, platform) = setup();
        gate.request_permission(&camera(), &platform).await.unwrap();

        assert_eq!(gate.on_platform_result(&camera(), true), Transition::Granted(camera()));
        assert_eq!(gate.on_platform_result(&camera(), true), Transition::Ignored);
        assert_eq!(gate.on_platform_result(&camera(), false), Transition::Ignored);
        assert_eq!(gate.state(&camera().id), PermissionState::Granted);
        assert!(!gate.is_polling(&camera().id));

        // the aborted poll never fires
        let tick = tokio::time::timeout(Duration::from_secs(120), rx.recv()).await;
        assert!(tick.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_detects_silent_grant() {
        let (mut gate, mut rx, platform) = setup();
        gate.request_permission(&camera(), &platform).await.unwrap();

        let tick = rx.recv().await.unwrap();
        assert_eq!(gate.on_poll_tick(tick, &platform).await, PollOutcome::Pending);

        platform.grant(&camera().id);
        let tick = rx.recv().await.unwrap();
        assert_eq!(
            gate.on_poll_tick(tick, &platform).await,
            PollOutcome::Granted(camera())
        );
        assert!(!gate.is_polling(&camera().id));
        assert_eq!(gate.on_platform_result(&camera(), true), Transition::Ignored);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_follows_backoff() {
        let (mut gate, mut rx, platform) = setup();
        let start = tokio::time::Instant::now();
        gate.request_permission(&camera(), &platform).await.unwrap();

        let tick = rx.recv().await.unwrap();
        assert_eq!(start.elapsed(), Duration::from_secs(1));
        gate.on_poll_tick(tick, &platform).await;

        let tick = rx.recv().await.unwrap();
        assert_eq!(start.elapsed(), Duration::from_secs(3));
        gate.on_poll_tick(tick, &platform).await;

        rx.recv().await.unwrap();
        assert_eq!(start.elapsed(), Duration::from_secs(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_times_out_and_can_be_retried() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let policy = PollPolicy {
            max_attempts: 3,
            ..Default::default()
        };
        let mut gate = PermissionGate::new(policy, tx);
        let platform = MockPlatform::with_devices(vec![camera()]);
        gate.request_permission(&camera(), &platform).await.unwrap();

        let mut outcomes = Vec::new();
        for _ in 0..3 {
            let tick = rx.recv().await.unwrap();
            outcomes.push(gate.on_poll_tick(tick, &platform).await);
        }
        assert_eq!(
            outcomes,
            vec![
                PollOutcome::Pending,
                PollOutcome::Pending,
                PollOutcome::TimedOut(camera())
            ]
        );
        assert_eq!(gate.state(&camera().id), PermissionState::TimedOut);
        assert!(!gate.is_polling(&camera().id));

        let outcome = gate.request_permission(&camera(), &platform).await.unwrap();
        assert_eq!(outcome, RequestOutcome::Requested);
        assert_eq!(platform.request_count(&camera().id), 2);
        assert!(gate.is_polling(&camera().id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_denied_is_terminal_until_forgotten() {
        let (mut gate, _rx, platform) = setup();
        gate.request_permission(&camera(), &platform).await.unwrap();
        assert_eq!(gate.on_platform_result(&camera(), false), Transition::Denied(camera()));

        let err = gate.request_permission(&camera(), &platform).await.unwrap_err();
        assert!(matches!(err, GateError::PermissionDenied(_)));

        gate.forget(&camera().id);
        assert_eq!(gate.state(&camera().id), PermissionState::Unrequested);
        assert!(gate.request_permission(&camera(), &platform).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_observed_grant_does_not_lift_denial() {
        let (mut gate, _rx, platform) = setup();
        gate.request_permission(&camera(), &platform).await.unwrap();
        gate.on_platform_result(&camera(), false);

        assert!(!gate.note_granted(&camera()));
        assert_eq!(gate.state(&camera().id), PermissionState::Denied);
        let err = gate.request_permission(&camera(), &platform).await.unwrap_err();
        assert!(matches!(err, GateError::PermissionDenied(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_after_forget_is_stale() {
        let (mut gate, mut rx, platform) = setup();
        gate.request_permission(&camera(), &platform).await.unwrap();
        let tick = rx.recv().await.unwrap();

        gate.forget(&camera().id);
        platform.grant(&camera().id);
        assert_eq!(gate.on_poll_tick(tick, &platform).await, PollOutcome::Stale);
    }

    #[tokio::test(start_paused = true)]
    async fn test_queued_tick_from_previous_request_is_stale() {
        let (mut gate, mut rx, platform) = setup();
        gate.request_permission(&camera(), &platform).await.unwrap();
        let old_tick = rx.recv().await.unwrap();

        gate.forget(&camera().id);
        gate.request_permission(&camera(), &platform).await.unwrap();
        assert_eq!(gate.on_poll_tick(old_tick, &platform).await, PollOutcome::Stale);
        assert!(gate.is_polling(&camera().id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_platform_failure_leaves_device_unrequested() {
        let (mut gate, _rx, platform) = setup();
        platform.fail_requests(true);

        let err = gate.request_permission(&camera(), &platform).await.unwrap_err();
        assert!(matches!(err, GateError::Platform(_)));
        assert_eq!(gate.state(&camera().id), PermissionState::Unrequested);
        assert!(!gate.is_polling(&camera().id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_note_granted_short_circuits_request() {
        let (mut gate, _rx, platform) = setup();
        assert!(gate.note_granted(&camera()));
        assert!(!gate.note_granted(&camera()));

        let outcome = gate.request_permission(&camera(), &platform).await.unwrap();
        assert_eq!(outcome, RequestOutcome::AlreadyGranted);
        assert_eq!(platform.request_count(&camera().id), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_all_polls() {
        let (mut gate, mut rx, platform) = setup();
        gate.request_permission(&camera(), &platform).await.unwrap();
        gate.shutdown();

        let tick = tokio::time::timeout(Duration::from_secs(120), rx.recv()).await;
        assert!(tick.is_err());
    }
}
