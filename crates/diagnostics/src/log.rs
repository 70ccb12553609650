use chrono::Local;
use std::error::Error;
use std::fmt::Write as _;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::warn;

use usb_device::Device;

/// Event names written to the diagnostic files
pub mod events {
    pub const USB_DEVICE_ATTACHED: &str = "USB_DEVICE_ATTACHED";
    pub const USB_DEVICE_DETACHED: &str = "USB_DEVICE_DETACHED";
    pub const REQUESTING_USB_PERMISSION: &str = "REQUESTING_USB_PERMISSION";
    pub const USB_PERMISSION_REQUEST_ERROR: &str = "USB_PERMISSION_REQUEST_ERROR";
    pub const USB_PERMISSION_GRANTED: &str = "USB_PERMISSION_GRANTED";
    pub const USB_PERMISSION_DENIED: &str = "USB_PERMISSION_DENIED";
    pub const USB_PERMISSION_CANCELLED: &str = "USB_PERMISSION_CANCELLED";
    pub const USB_PERMISSION_TIMED_OUT: &str = "USB_PERMISSION_TIMED_OUT";
    pub const FALLBACK_PERMISSION_GRANTED: &str = "FALLBACK_PERMISSION_GRANTED";
    pub const HANDLING_USB_DEVICE_WITH_PERMISSION: &str = "HANDLING_USB_DEVICE_WITH_PERMISSION";
    pub const HANDLING_USB_DEVICE_DETACHMENT: &str = "HANDLING_USB_DEVICE_DETACHMENT";
    pub const USB_DEVICE_CONNECTED: &str = "USB_DEVICE_CONNECTED";
    pub const USB_DEVICE_DISCONNECTED: &str = "USB_DEVICE_DISCONNECTED";
    pub const USB_CONNECTION_ERROR: &str = "USB_CONNECTION_ERROR";
    pub const UVC_DEVICE_CHECK: &str = "UVC_DEVICE_CHECK";
    pub const UVC_DEVICE_COUNT: &str = "UVC_DEVICE_COUNT";
    pub const USB_CHECK_ERROR: &str = "USB_CHECK_ERROR";
    pub const SYSTEM_STATE: &str = "SYSTEM_STATE";
    pub const CRASH: &str = "CRASH";
}

/// Append-only diagnostic file.
///
/// Each record is a block:
///
/// ```text
/// === EVENT ===
/// Time: ...
/// Thread: ...
/// Device: ...            (device lines only when a device is given)
/// Extra: ...
/// Error: ...
/// Caused by: ...
/// <blank line>
/// ```
#[derive(Debug, Clone)]
pub struct DiagnosticLog {
    path: PathBuf,
}

impl DiagnosticLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record. Best-effort: failures are logged, never returned.
    pub fn record(
        &self,
        event: &str,
        device: Option<&Device>,
        extra: Option<&str>,
        error: Option<&dyn Error>,
    ) {
        let block = render(event, device, extra, error);
        if let Err(e) = self.append(&block) {
            warn!(path = %self.path.display(), "Failed to write diagnostic log: {}", e);
        }
    }

    pub fn device_event(&self, event: &str, device: &Device) {
        self.record(event, Some(device), None, None);
    }

    fn append(&self, block: &str) -> std::io::Result<()> {
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)?;
            }
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(block.as_bytes())
    }
}

/// Format one record block
pub(crate) fn render(
    event: &str,
    device: Option<&Device>,
    extra: Option<&str>,
    error: Option<&dyn Error>,
) -> String {
    let mut out = String::new();
    let thread = std::thread::current();

    // writing into a String cannot fail
    let _ = writeln!(out, "=== {} ===", event);
    let _ = writeln!(out, "Time: {}", Local::now().to_rfc3339());
    let _ = writeln!(out, "Thread: {}", thread.name().unwrap_or("unnamed"));

    if let Some(device) = device {
        let _ = writeln!(out, "Device: {}", device.id);
        let _ = writeln!(
            out,
            "Vendor ID: {} (0x{:x})",
            device.vendor_id, device.vendor_id
        );
        let _ = writeln!(
            out,
            "Product ID: {} (0x{:x})",
            device.product_id, device.product_id
        );
        let _ = writeln!(out, "Device Class: {}", device.class.class);
        let _ = writeln!(
            out,
            "Manufacturer: {}",
            device.manufacturer.as_deref().unwrap_or("unknown")
        );
        let _ = writeln!(
            out,
            "Product: {}",
            device.product.as_deref().unwrap_or("unknown")
        );
    }

    if let Some(extra) = extra {
        let _ = writeln!(out, "Extra: {}", extra);
    }

    if let Some(error) = error {
        let _ = writeln!(out, "Error: {}", error);
        let mut source = error.source();
        while let Some(cause) = source {
            let _ = writeln!(out, "Caused by: {}", cause);
            source = cause.source();
        }
    }

    out.push('\n');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use usb_device::UsbClass;

    fn camera() -> Device {
        Device::new("/dev/bus/usb/001/004", 0x1234, 0x5678)
            .with_class(UsbClass::new(0xEF, 0x02, 0x01))
            .with_strings(Some("Acme".into()), Some("HD Webcam".into()))
    }

    #[test]
    fn test_device_block_format() {
        let block = render(events::USB_PERMISSION_GRANTED, Some(&camera()), None, None);
        let lines: Vec<&str> = block.lines().collect();

        assert_eq!(lines[0], "=== USB_PERMISSION_GRANTED ===");
        assert!(lines[1].starts_with("Time: "));
        assert!(lines[2].starts_with("Thread: "));
        assert_eq!(lines[3], "Device: /dev/bus/usb/001/004");
        assert_eq!(lines[4], "Vendor ID: 4660 (0x1234)");
        assert_eq!(lines[5], "Product ID: 22136 (0x5678)");
        assert_eq!(lines[6], "Device Class: 239");
        assert_eq!(lines[7], "Manufacturer: Acme");
        assert_eq!(lines[8], "Product: HD Webcam");
        assert!(block.ends_with("\n\n"));
    }

    #[test]
    fn test_error_chain_is_written() {
        let inner = std::io::Error::new(std::io::ErrorKind::Other, "pipe closed");
        let outer = std::io::Error::new(std::io::ErrorKind::Other, inner);
        let block = render(events::USB_CHECK_ERROR, None, Some("count=0"), Some(&outer));

        assert!(block.contains("Extra: count=0\n"));
        assert!(block.contains("Error: pipe closed\n"));
        assert!(!block.contains("Device:"));
    }

    #[test]
    fn test_records_are_appended() {
        let dir = tempfile::tempdir().unwrap();
        let log = DiagnosticLog::new(dir.path().join("nested").join("usb_diagnostic.log"));

        log.device_event(events::USB_DEVICE_ATTACHED, &camera());
        log.record(events::UVC_DEVICE_COUNT, None, Some("count=1"), None);

        let contents = fs::read_to_string(log.path()).unwrap();
        assert_eq!(contents.matches("=== ").count(), 2);
        assert!(contents.contains("=== USB_DEVICE_ATTACHED ==="));
        assert!(contents.contains("Extra: count=1"));
    }

    #[test]
    fn test_unwritable_path_is_swallowed() {
        let dir = tempfile::tempdir().unwrap();
        // a directory cannot be opened for append
        let log = DiagnosticLog::new(dir.path());
        log.record(events::CRASH, None, None, None);
    }
}
