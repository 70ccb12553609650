//! UVC Camera Library Bindings
//!
//! The native camera library owns USB transport, UVC negotiation, decoding
//! and encoding. This crate only describes the calls made into it:
//! - [`UvcCamera`]: open / close / preview / recording contract, plus the
//!   brightness and contrast controls and preview size enumeration
//! - [`NativeCamera`]: the shared library, loaded at runtime
//! - [`MockCamera`]: scriptable stand-in for tests and dry runs

pub mod ffi;
pub mod mock;

pub use ffi::{NativeCamera, NativeLibrary};
pub use mock::{MockCamera, MockCameraState, MOCK_DEFAULT_VALUE};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;
use usb_device::ControlBlock;

/// Camera error types
#[derive(Error, Debug)]
pub enum CameraError {
    #[error("Failed to load camera library: {0}")]
    Library(String),

    #[error("Failed to open camera: {0}")]
    Open(String),

    #[error("Camera not opened")]
    NotOpened,

    #[error("Preview error: {0}")]
    Preview(String),

    #[error("Recording error: {0}")]
    Recording(String),

    #[error("Still capture failed: {0}")]
    Capture(String),

    #[error("Camera call timed out after {0}ms")]
    Timeout(u64),

    #[error("{0} is not supported by this camera")]
    Unsupported(String),

    #[error("Control error: {0}")]
    Control(String),
}

/// Image controls exposed through the processing unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Control {
    Brightness,
    Contrast,
}

impl Control {
    pub const ALL: [Control; 2] = [Control::Brightness, Control::Contrast];

    /// Values are percentages of the camera's native range
    pub const RANGE: RangeInclusive<i32> = 0..=100;

    /// Control flag understood by the native library. The high bit selects
    /// the processing unit.
    pub fn native_flag(self) -> u32 {
        match self {
            Control::Brightness => 0x8000_0001,
            Control::Contrast => 0x8000_0002,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Control::Brightness => "brightness",
            Control::Contrast => "contrast",
        }
    }
}

impl fmt::Display for Control {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Control {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "brightness" => Ok(Control::Brightness),
            "contrast" => Ok(Control::Contrast),
            other => Err(format!("unknown control '{}'", other)),
        }
    }
}

/// Preview frame dimensions, written `WIDTHxHEIGHT`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

impl FrameSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl fmt::Display for FrameSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for FrameSize {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (width, height) = s
            .trim()
            .split_once(|c: char| c == 'x' || c == 'X')
            .ok_or_else(|| format!("expected WIDTHxHEIGHT, got '{}'", s))?;
        let parse = |v: &str| {
            v.trim()
                .parse::<u32>()
                .ok()
                .filter(|v| *v > 0)
                .ok_or_else(|| format!("invalid dimension '{}' in '{}'", v, s))
        };
        Ok(Self::new(parse(width)?, parse(height)?))
    }
}

/// Parse a comma separated size list as reported by the native library.
/// Malformed entries are skipped.
pub fn parse_size_list(list: &str) -> Vec<FrameSize> {
    list.split(',')
        .filter(|entry| !entry.trim().is_empty())
        .filter_map(|entry| entry.parse().ok())
        .collect()
}

/// Frame format requested from the camera
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameFormat {
    Yuyv,
    #[default]
    Mjpeg,
}

impl FrameFormat {
    /// Mode value understood by the native library
    pub fn native_mode(self) -> i32 {
        match self {
            FrameFormat::Yuyv => 0,
            FrameFormat::Mjpeg => 1,
        }
    }
}

/// Camera configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Shared library path (overridden by `UVC_CAMERA_LIBRARY`)
    pub library: String,
    /// Preview width
    pub width: u32,
    /// Preview height
    pub height: u32,
    /// Preview frame format
    pub format: FrameFormat,
    /// USB bandwidth factor (1.0 = full bandwidth)
    pub bandwidth_factor: f32,
    /// Upper bound for any single native call (milliseconds)
    pub open_timeout_ms: u64,
    /// Directory for recordings and still captures
    pub recordings_dir: PathBuf,
    /// Native window handle to render preview into; unset streams headless
    pub surface: Option<u64>,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            library: "libuvccamera.so".to_string(),
            width: 640,
            height: 480,
            format: FrameFormat::Mjpeg,
            bandwidth_factor: 1.0,
            open_timeout_ms: 5000,
            recordings_dir: PathBuf::from("/var/lib/uvc-link/recordings"),
            surface: None,
        }
    }
}

impl CameraConfig {
    pub fn preview_target(&self) -> PreviewTarget {
        PreviewTarget {
            width: self.width,
            height: self.height,
            format: self.format,
            bandwidth_factor: self.bandwidth_factor,
            surface: self.surface,
        }
    }
}

/// Where and how preview frames are delivered
#[derive(Debug, Clone, PartialEq)]
pub struct PreviewTarget {
    pub width: u32,
    pub height: u32,
    pub format: FrameFormat,
    pub bandwidth_factor: f32,
    /// Native window handle; `None` streams without display
    pub surface: Option<u64>,
}

impl PreviewTarget {
    pub fn size(&self) -> FrameSize {
        FrameSize::new(self.width, self.height)
    }

    /// Same target at another frame size
    pub fn with_size(mut self, size: FrameSize) -> Self {
        self.width = size.width;
        self.height = size.height;
        self
    }
}

/// Calls into the native camera library.
///
/// All methods may block; callers run them off the coordination task.
/// `start_preview` requires a prior successful `open`.
pub trait UvcCamera: Send {
    fn open(&mut self, control: &ControlBlock) -> Result<(), CameraError>;

    fn close(&mut self);

    fn is_opened(&self) -> bool;

    fn start_preview(&mut self, target: &PreviewTarget) -> Result<(), CameraError>;

    fn stop_preview(&mut self);

    fn start_recording(&mut self, path: &Path) -> Result<(), CameraError>;

    fn stop_recording(&mut self) -> Result<(), CameraError>;

    fn is_recording(&self) -> bool;

    fn capture_still(&mut self, path: &Path) -> Result<(), CameraError>;

    /// Whether the opened camera exposes `control`
    fn supports(&self, control: Control) -> bool;

    /// Current value of `control` in [`Control::RANGE`]
    fn get_value(&self, control: Control) -> Result<i32, CameraError>;

    /// Apply `value` and return what the camera settled on
    fn set_value(&mut self, control: Control, value: i32) -> Result<i32, CameraError>;

    /// Restore the camera default and return it
    fn reset_value(&mut self, control: Control) -> Result<i32, CameraError>;

    /// Preview sizes offered for the configured frame format
    fn supported_sizes(&self) -> Result<Vec<FrameSize>, CameraError>;
}
