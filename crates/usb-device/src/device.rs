//! Device identity and descriptor summary

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identity of an attached device (the platform device name,
/// e.g. `/dev/bus/usb/001/004`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Opaque platform handle for a device; packs bus number and device address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceHandle(u32);

impl DeviceHandle {
    pub fn new(bus: u8, address: u8) -> Self {
        Self(((bus as u32) << 8) | address as u32)
    }

    pub fn bus(&self) -> u8 {
        (self.0 >> 8) as u8
    }

    pub fn address(&self) -> u8 {
        self.0 as u8
    }

    pub fn raw(&self) -> u32 {
        self.0
    }
}

/// Class / subclass / protocol triple from a device or interface descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct UsbClass {
    pub class: u8,
    pub subclass: u8,
    pub protocol: u8,
}

impl UsbClass {
    pub const fn new(class: u8, subclass: u8, protocol: u8) -> Self {
        Self {
            class,
            subclass,
            protocol,
        }
    }
}

/// A discovered USB device
///
/// Immutable once discovered. A detach destroys it logically; a re-plug
/// produces a fresh `Device` even when the identity is reused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// Platform device name, used as identity
    pub id: DeviceId,
    /// Platform-assigned handle
    pub handle: DeviceHandle,
    /// USB vendor ID
    pub vendor_id: u16,
    /// USB product ID
    pub product_id: u16,
    /// Device-level class triple
    pub class: UsbClass,
    /// Interface class triples, in descriptor order
    #[serde(default)]
    pub interfaces: Vec<UsbClass>,
    /// Human-readable name
    pub name: String,
    #[serde(default)]
    pub manufacturer: Option<String>,
    #[serde(default)]
    pub product: Option<String>,
}

impl Device {
    /// Create a device with a bare descriptor; the name defaults to the id
    pub fn new(id: impl Into<String>, vendor_id: u16, product_id: u16) -> Self {
        let id = DeviceId::new(id);
        Self {
            name: id.as_str().to_string(),
            id,
            handle: DeviceHandle::default(),
            vendor_id,
            product_id,
            class: UsbClass::default(),
            interfaces: Vec::new(),
            manufacturer: None,
            product: None,
        }
    }

    pub fn with_handle(mut self, handle: DeviceHandle) -> Self {
        self.handle = handle;
        self
    }

    pub fn with_class(mut self, class: UsbClass) -> Self {
        self.class = class;
        self
    }

    pub fn with_interface(mut self, interface: UsbClass) -> Self {
        self.interfaces.push(interface);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_strings(mut self, manufacturer: Option<String>, product: Option<String>) -> Self {
        self.manufacturer = manufacturer;
        self.product = product;
        self
    }

    /// Device triple followed by every interface triple
    pub fn class_triples(&self) -> impl Iterator<Item = &UsbClass> {
        std::iter::once(&self.class).chain(self.interfaces.iter())
    }

    /// `vvvv:pppp` in lowercase hex
    pub fn vid_pid(&self) -> String {
        format!("{:04x}:{:04x}", self.vendor_id, self.product_id)
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.id, self.vid_pid())?;
        if let Some(product) = &self.product {
            write!(f, " {}", product)?;
        }
        Ok(())
    }
}
