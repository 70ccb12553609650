//! Application configuration
//!
//! Layered from an optional TOML file and `UVC_LINK__*` environment
//! variables (`UVC_LINK__CAMERA__WIDTH=1280`). Every field has a default, so
//! running without any configuration is valid.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

use diagnostics::DiagnosticsConfig;
use permission_gate::PollPolicy;
use usb_device::FilterSet;
use uvc_camera::CameraConfig;

/// Default configuration file
pub const DEFAULT_CONFIG_PATH: &str = "/etc/uvc-link/config.toml";

/// Environment variable prefix
pub const ENV_PREFIX: &str = "UVC_LINK";

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Start-up scan settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoConnectConfig {
    pub enabled: bool,
    /// Delay after start-up before the scan (milliseconds)
    pub delay_ms: u64,
}

impl Default for AutoConnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            delay_ms: 3000,
        }
    }
}

impl AutoConnectConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

/// Hotplug detection when udev is not used
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HotplugConfig {
    /// sysfs re-scan period (milliseconds)
    pub poll_interval_ms: u64,
}

impl Default for HotplugConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
        }
    }
}

impl HotplugConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Complete application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Supported camera filters; empty means the built-in UVC filters
    pub filters: FilterSet,
    pub permission: PollPolicy,
    pub auto_connect: AutoConnectConfig,
    pub hotplug: HotplugConfig,
    pub camera: CameraConfig,
    pub diagnostics: DiagnosticsConfig,
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load from `path` (missing file allowed) and the environment
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = path.map_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH), Path::to_path_buf);

        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_path()).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: AppConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document without consulting the environment
    pub fn from_toml(source: &str) -> Result<Self, ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::from_str(source, config::FileFormat::Toml))
            .build()?;
        let config: AppConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let policy = &self.permission;
        if policy.interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "permission.interval_ms must be positive".into(),
            ));
        }
        if policy.multiplier < 1.0 {
            return Err(ConfigError::Invalid(format!(
                "permission.multiplier must be at least 1.0, got {}",
                policy.multiplier
            )));
        }
        if policy.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "permission.max_attempts must be positive".into(),
            ));
        }
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(ConfigError::Invalid(format!(
                "camera size {}x{} is empty",
                self.camera.width, self.camera.height
            )));
        }
        if self.hotplug.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "hotplug.poll_interval_ms must be positive".into(),
            ));
        }
        if self.camera.open_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "camera.open_timeout_ms must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Filters in effect
    pub fn filters(&self) -> FilterSet {
        if self.filters.is_empty() {
            warn!("No device filters configured, using built-in UVC filters");
            return FilterSet::uvc_default();
        }
        self.filters.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use usb_device::{class, Device, UsbClass};

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert!(config.auto_connect.enabled);
        assert_eq!(config.auto_connect.delay(), Duration::from_secs(3));
        assert_eq!(config.permission.max_attempts, 8);
        assert_eq!(config.diagnostics.monitor_interval_ms, 5000);
        assert_eq!(config.filters(), FilterSet::uvc_default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_toml_overrides() {
        let config = AppConfig::from_toml(
            r#"
            [[filters]]
            vendor_id = 0x1234

            [[filters]]
            vendor_id = 0x1234
            product_id = 0x0001
            exclude = true

            [permission]
            interval_ms = 500
            max_attempts = 4

            [auto_connect]
            enabled = false

            [camera]
            width = 1280
            height = 720
            format = "yuyv"
            "#,
        )
        .unwrap();

        assert_eq!(config.filters().len(), 2);
        assert_eq!(config.permission.interval_ms, 500);
        assert_eq!(config.permission.initial_delay_ms, 1000);
        assert!(!config.auto_connect.enabled);
        assert_eq!(config.camera.width, 1280);

        let filters = config.filters();
        assert!(filters.matches(&Device::new("/dev/bus/usb/001/004", 0x1234, 0x5678)));
        assert!(!filters.matches(&Device::new("/dev/bus/usb/001/005", 0x1234, 0x0001)));
    }

    #[test]
    fn test_empty_filters_fall_back_to_uvc() {
        let config = AppConfig::from_toml("filters = []").unwrap();
        let camera = Device::new("/dev/bus/usb/001/004", 0x1234, 0x5678)
            .with_interface(UsbClass::new(class::VIDEO, 0x01, 0x00));
        assert!(config.filters().matches(&camera));
    }

    #[test]
    fn test_invalid_policy_is_rejected() {
        let err = AppConfig::from_toml("[permission]\nmultiplier = 0.5").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(config.camera.width, 640);
    }
}
