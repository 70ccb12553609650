//! USB Device Model
//!
//! Shared vocabulary for the uvc-link workspace:
//! - [`Device`] and its identity / handle types
//! - [`DeviceFilter`] matching for supported cameras
//! - the [`UsbPlatform`] contract implemented by each host backend

mod device;
mod error;
mod filter;
mod platform;

pub use device::{Device, DeviceHandle, DeviceId, UsbClass};
pub use error::PlatformError;
pub use filter::{matches, DeviceFilter, FilterSet};
pub use platform::{ControlBlock, PermissionChannel, PlatformEvent, UsbPlatform};

/// Well-known USB class codes
pub mod class {
    /// Video (UVC) interface class
    pub const VIDEO: u8 = 0x0E;
    /// Miscellaneous device class (interface association)
    pub const MISCELLANEOUS: u8 = 0xEF;
    /// Common class subclass used together with [`MISCELLANEOUS`]
    pub const COMMON_SUBCLASS: u8 = 0x02;
    /// Interface association descriptor protocol
    pub const IAD_PROTOCOL: u8 = 0x01;
}
