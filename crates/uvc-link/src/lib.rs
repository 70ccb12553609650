//! USB camera permission handshake and connection daemon
//!
//! Watches for attached USB Video Class cameras, obtains access to them
//! (with a bounded fallback poll for platforms that drop their permission
//! notification) and keeps exactly one camera session open.

pub mod app;
pub mod cli;
pub mod commands;
pub mod config;
pub mod hub;
pub mod logging;
pub mod notices;
pub mod scanner;
pub mod service;
pub mod sysfs;
#[cfg(feature = "udev-monitor")]
pub mod udev_monitor;
pub mod watch;

pub use config::{AppConfig, ConfigError};
pub use hub::{Command, Hub, HubEvent};
pub use logging::init_logging;
pub use service::CameraService;
