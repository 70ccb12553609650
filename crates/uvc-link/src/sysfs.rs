//! Linux USB platform backed by sysfs and usbfs device nodes
//!
//! Devices are enumerated from `/sys/bus/usb/devices`; a device is permitted
//! when this process can open its `/dev/bus/usb/BBB/DDD` node read/write.
//! There is no interactive permission prompt on Linux: a request only logs
//! what is missing, and the fallback poll notices when access appears (a udev
//! rule or `uaccess` tag being applied).

use async_trait::async_trait;
use std::ffi::CString;
use std::fs::{self, OpenOptions};
use std::os::fd::OwnedFd;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use usb_device::{
    ControlBlock, Device, DeviceHandle, DeviceId, PlatformError, UsbClass, UsbPlatform,
};

pub const SYSFS_USB_DEVICES: &str = "/sys/bus/usb/devices";
pub const USBFS_ROOT: &str = "/dev/bus/usb";

pub struct SysfsPlatform {
    sysfs_root: PathBuf,
    dev_root: PathBuf,
}

impl Default for SysfsPlatform {
    fn default() -> Self {
        Self::new(SYSFS_USB_DEVICES, USBFS_ROOT)
    }
}

impl SysfsPlatform {
    pub fn new(sysfs_root: impl Into<PathBuf>, dev_root: impl Into<PathBuf>) -> Self {
        Self {
            sysfs_root: sysfs_root.into(),
            dev_root: dev_root.into(),
        }
    }

    /// Device node for bus/address under the usbfs root
    pub fn node_path(&self, bus: u8, address: u8) -> PathBuf {
        self.dev_root
            .join(format!("{:03}", bus))
            .join(format!("{:03}", address))
    }

    /// Read one device directory, e.g. `/sys/bus/usb/devices/1-1`
    pub fn read_device(&self, dir: &Path) -> Option<Device> {
        let bus: u8 = read_dec(dir, "busnum")?;
        let address: u8 = read_dec(dir, "devnum")?;
        let vendor_id = read_hex(dir, "idVendor")?;
        let product_id = read_hex(dir, "idProduct")?;
        let class = UsbClass::new(
            read_hex(dir, "bDeviceClass").unwrap_or(0) as u8,
            read_hex(dir, "bDeviceSubClass").unwrap_or(0) as u8,
            read_hex(dir, "bDeviceProtocol").unwrap_or(0) as u8,
        );

        let node = self.node_path(bus, address);
        let mut device = Device::new(node.to_string_lossy(), vendor_id, product_id)
            .with_handle(DeviceHandle::new(bus, address))
            .with_class(class)
            .with_strings(read_string(dir, "manufacturer"), read_string(dir, "product"));
        if let Some(product) = &device.product {
            device.name = product.clone();
        }
        for interface in self.read_interfaces(dir) {
            device = device.with_interface(interface);
        }
        Some(device)
    }

    fn read_interfaces(&self, dir: &Path) -> Vec<UsbClass> {
        let Some(name) = dir.file_name().and_then(|n| n.to_str()) else {
            return Vec::new();
        };
        let prefix = format!("{}:", name);
        let Ok(entries) = fs::read_dir(dir) else {
            return Vec::new();
        };

        let mut interfaces: Vec<(String, UsbClass)> = entries
            .flatten()
            .filter_map(|entry| {
                let file_name = entry.file_name().to_str()?.to_string();
                if !file_name.starts_with(&prefix) {
                    return None;
                }
                let path = entry.path();
                let class = UsbClass::new(
                    read_hex(&path, "bInterfaceClass")? as u8,
                    read_hex(&path, "bInterfaceSubClass").unwrap_or(0) as u8,
                    read_hex(&path, "bInterfaceProtocol").unwrap_or(0) as u8,
                );
                Some((file_name, class))
            })
            .collect();
        interfaces.sort_by(|a, b| a.0.cmp(&b.0));
        interfaces.into_iter().map(|(_, class)| class).collect()
    }

    fn scan(&self) -> Result<Vec<Device>, PlatformError> {
        if !self.sysfs_root.is_dir() {
            return Err(PlatformError::Unavailable(format!(
                "{} not found (is sysfs mounted?)",
                self.sysfs_root.display()
            )));
        }
        let mut devices: Vec<Device> = fs::read_dir(&self.sysfs_root)?
            .flatten()
            .filter(|entry| !entry.file_name().to_string_lossy().contains(':'))
            .filter_map(|entry| self.read_device(&entry.path()))
            .collect();
        devices.sort_by_key(|d| (d.handle.bus(), d.handle.address()));
        Ok(devices)
    }

    pub(crate) fn node_accessible(path: &Path) -> bool {
        let Ok(path) = CString::new(path.as_os_str().as_bytes()) else {
            return false;
        };
        // SAFETY: path is a valid NUL-terminated string
        unsafe { libc::access(path.as_ptr(), libc::R_OK | libc::W_OK) == 0 }
    }
}

fn read_string(dir: &Path, attr: &str) -> Option<String> {
    let value = fs::read_to_string(dir.join(attr)).ok()?;
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

fn read_hex(dir: &Path, attr: &str) -> Option<u16> {
    u16::from_str_radix(&read_string(dir, attr)?, 16).ok()
}

fn read_dec<T: std::str::FromStr>(dir: &Path, attr: &str) -> Option<T> {
    read_string(dir, attr)?.parse().ok()
}

#[async_trait]
impl UsbPlatform for SysfsPlatform {
    async fn list_devices(&self) -> Result<Vec<Device>, PlatformError> {
        self.scan()
    }

    async fn has_permission(&self, device: &Device) -> bool {
        Self::node_accessible(Path::new(device.id.as_str()))
    }

    async fn request_permission(&self, device: &Device) -> Result<(), PlatformError> {
        let node = Path::new(device.id.as_str());
        if !node.exists() {
            return Err(PlatformError::NotAttached(device.id.clone()));
        }
        warn!(
            device = %device.id,
            vid_pid = %device.vid_pid(),
            "No read/write access to device node; add a udev rule granting access"
        );
        Ok(())
    }

    async fn open_control(&self, device: &Device) -> Result<ControlBlock, PlatformError> {
        let node = Path::new(device.id.as_str());
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(node)
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => PlatformError::NotAttached(device.id.clone()),
                _ => PlatformError::Open {
                    device: device.id.clone(),
                    reason: e.to_string(),
                },
            })?;
        debug!(
            device = %device.id,
            bus = device.handle.bus(),
            address = device.handle.address(),
            "Device node opened"
        );
        Ok(ControlBlock::new(device).with_fd(OwnedFd::from(file)))
    }
}

/// Device id for bus/address under the default usbfs root
pub fn device_id(bus: u8, address: u8) -> DeviceId {
    DeviceId::new(format!("{}/{:03}/{:03}", USBFS_ROOT, bus, address))
}
