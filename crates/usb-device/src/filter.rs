//! Camera filter matching
//!
//! The same matching is used by the start-up scanner, the attach handler and
//! the manual permission check, so every path agrees on what a supported
//! camera is.

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::class;
use crate::device::{Device, UsbClass};

/// Declarative match criteria; `None` fields are wildcards
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceFilter {
    pub vendor_id: Option<u16>,
    pub product_id: Option<u16>,
    pub class: Option<u8>,
    pub subclass: Option<u8>,
    pub protocol: Option<u8>,
    /// A matching exclude filter vetoes the device
    pub exclude: bool,
}

impl DeviceFilter {
    /// Filter on vendor ID only
    pub fn vendor(vendor_id: u16) -> Self {
        Self {
            vendor_id: Some(vendor_id),
            ..Default::default()
        }
    }

    /// Filter on device or interface class only
    pub fn class(class: u8) -> Self {
        Self {
            class: Some(class),
            ..Default::default()
        }
    }

    pub fn with_product(mut self, product_id: u16) -> Self {
        self.product_id = Some(product_id);
        self
    }

    pub fn with_subclass(mut self, subclass: u8) -> Self {
        self.subclass = Some(subclass);
        self
    }

    pub fn with_protocol(mut self, protocol: u8) -> Self {
        self.protocol = Some(protocol);
        self
    }

    pub fn excluding(mut self) -> Self {
        self.exclude = true;
        self
    }

    /// Whether this filter's criteria are satisfied, ignoring `exclude`
    pub fn matches(&self, device: &Device) -> bool {
        if self.vendor_id.is_some_and(|v| v != device.vendor_id) {
            return false;
        }
        if self.product_id.is_some_and(|p| p != device.product_id) {
            return false;
        }
        if !self.has_class_criteria() {
            return true;
        }
        device.class_triples().any(|triple| self.matches_triple(triple))
    }

    fn has_class_criteria(&self) -> bool {
        self.class.is_some() || self.subclass.is_some() || self.protocol.is_some()
    }

    fn matches_triple(&self, triple: &UsbClass) -> bool {
        self.class.map_or(true, |c| c == triple.class)
            && self.subclass.map_or(true, |s| s == triple.subclass)
            && self.protocol.map_or(true, |p| p == triple.protocol)
    }
}

/// True when some non-exclude filter matches and no exclude filter does.
/// Independent of filter order.
pub fn matches(device: &Device, filters: &[DeviceFilter]) -> bool {
    let mut included = false;
    for filter in filters {
        if filter.matches(device) {
            if filter.exclude {
                trace!(device = %device.id, ?filter, "device vetoed by exclude filter");
                return false;
            }
            included = true;
        }
    }
    included
}

/// Ordered filter list loaded once at startup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FilterSet(Vec<DeviceFilter>);

impl FilterSet {
    pub fn new(filters: Vec<DeviceFilter>) -> Self {
        Self(filters)
    }

    /// UVC cameras: interface-association devices and anything exposing a
    /// video interface
    pub fn uvc_default() -> Self {
        Self(vec![
            DeviceFilter::class(class::MISCELLANEOUS)
                .with_subclass(class::COMMON_SUBCLASS)
                .with_protocol(class::IAD_PROTOCOL),
            DeviceFilter::class(class::VIDEO),
        ])
    }

    pub fn matches(&self, device: &Device) -> bool {
        matches(device, &self.0)
    }

    /// First matching device in enumeration order
    pub fn first_match<'a>(&self, devices: &'a [Device]) -> Option<&'a Device> {
        devices.iter().find(|d| self.matches(d))
    }

    pub fn filters(&self) -> &[DeviceFilter] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl Default for FilterSet {
    fn default() -> Self {
        Self::uvc_default()
    }
}
