//! Runtime bindings for the native UVC camera library
//!
//! The library is a shared object exposing a small C ABI around a camera
//! instance pointer. It is loaded with `libloading` so the workspace builds
//! and tests without it installed.

use libloading::{Library, Symbol};
use std::ffi::{c_void, CStr, CString};
use std::os::raw::{c_char, c_int, c_uint};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

use usb_device::ControlBlock;

use crate::{parse_size_list, CameraConfig, CameraError, Control, FrameSize, PreviewTarget, UvcCamera};

/// Environment variable overriding the configured library path
pub const LIBRARY_ENV: &str = "UVC_CAMERA_LIBRARY";

/// usbfs root handed to the library together with bus/address
const USBFS_ROOT: &str = "/dev/bus/usb";

type CreateFn = unsafe extern "C" fn() -> *mut c_void;
type DestroyFn = unsafe extern "C" fn(camera: *mut c_void);
type ConnectFn = unsafe extern "C" fn(
    camera: *mut c_void,
    vendor_id: c_int,
    product_id: c_int,
    fd: c_int,
    busnum: c_int,
    devaddr: c_int,
    usbfs: *const c_char,
) -> c_int;
type ReleaseFn = unsafe extern "C" fn(camera: *mut c_void) -> c_int;
type SetPreviewSizeFn = unsafe extern "C" fn(
    camera: *mut c_void,
    width: c_int,
    height: c_int,
    mode: c_int,
    bandwidth: f32,
) -> c_int;
type SetPreviewDisplayFn = unsafe extern "C" fn(camera: *mut c_void, window: *mut c_void) -> c_int;
type CameraFn = unsafe extern "C" fn(camera: *mut c_void) -> c_int;
type PathFn = unsafe extern "C" fn(camera: *mut c_void, path: *const c_char) -> c_int;
type LastErrorFn = unsafe extern "C" fn() -> *const c_char;
type SupportsFn = unsafe extern "C" fn(camera: *mut c_void) -> u64;
type GetValueFn = unsafe extern "C" fn(camera: *mut c_void, flag: c_uint, value: *mut c_int) -> c_int;
type SetValueFn = unsafe extern "C" fn(camera: *mut c_void, flag: c_uint, value: c_int) -> c_int;
type ResetValueFn = unsafe extern "C" fn(camera: *mut c_void, flag: c_uint) -> c_int;
/// Comma separated `WxH` list owned by the library, valid until the next call
type SizesFn = unsafe extern "C" fn(camera: *mut c_void) -> *const c_char;

/// Loaded camera library and its entry points
pub struct NativeLibrary {
    create: CreateFn,
    destroy: DestroyFn,
    connect: ConnectFn,
    release: ReleaseFn,
    set_preview_size: SetPreviewSizeFn,
    set_preview_display: SetPreviewDisplayFn,
    start_preview: CameraFn,
    stop_preview: CameraFn,
    start_recording: PathFn,
    stop_recording: CameraFn,
    capture_still: PathFn,
    processing_supports: SupportsFn,
    get_value: GetValueFn,
    set_value: SetValueFn,
    reset_value: ResetValueFn,
    supported_sizes: SizesFn,
    last_error: LastErrorFn,
    // keeps the function pointers above valid
    _library: Library,
}

unsafe fn symbol<T: Copy>(library: &Library, name: &[u8]) -> Result<T, CameraError> {
    let sym: Symbol<T> = library.get(name).map_err(|e| {
        CameraError::Library(format!(
            "missing symbol {}: {}",
            String::from_utf8_lossy(&name[..name.len().saturating_sub(1)]),
            e
        ))
    })?;
    Ok(*sym)
}

impl NativeLibrary {
    /// Load the library from `path`, or from `UVC_CAMERA_LIBRARY` when set
    pub fn load(path: &str) -> Result<Arc<Self>, CameraError> {
        let path = std::env::var(LIBRARY_ENV).unwrap_or_else(|_| path.to_string());
        info!("Loading camera library {}", path);

        let library = unsafe { Library::new(&path) }
            .map_err(|e| CameraError::Library(format!("{}: {}", path, e)))?;

        unsafe {
            Ok(Arc::new(Self {
                create: symbol(&library, b"uvccamera_create\0")?,
                destroy: symbol(&library, b"uvccamera_destroy\0")?,
                connect: symbol(&library, b"uvccamera_connect\0")?,
                release: symbol(&library, b"uvccamera_release\0")?,
                set_preview_size: symbol(&library, b"uvccamera_set_preview_size\0")?,
                set_preview_display: symbol(&library, b"uvccamera_set_preview_display\0")?,
                start_preview: symbol(&library, b"uvccamera_start_preview\0")?,
                stop_preview: symbol(&library, b"uvccamera_stop_preview\0")?,
                start_recording: symbol(&library, b"uvccamera_start_recording\0")?,
                stop_recording: symbol(&library, b"uvccamera_stop_recording\0")?,
                capture_still: symbol(&library, b"uvccamera_capture_still\0")?,
                processing_supports: symbol(&library, b"uvccamera_processing_supports\0")?,
                get_value: symbol(&library, b"uvccamera_get_value\0")?,
                set_value: symbol(&library, b"uvccamera_set_value\0")?,
                reset_value: symbol(&library, b"uvccamera_reset_value\0")?,
                supported_sizes: symbol(&library, b"uvccamera_get_supported_size\0")?,
                last_error: symbol(&library, b"uvccamera_last_error\0")?,
                _library: library,
            }))
        }
    }

    fn last_error(&self) -> String {
        let ptr = unsafe { (self.last_error)() };
        if ptr.is_null() {
            return "unknown error".to_string();
        }
        unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned()
    }

    fn describe(&self, ret: c_int) -> String {
        format!("{} (code {})", self.last_error(), ret)
    }
}

fn c_path(path: &Path) -> Result<CString, String> {
    CString::new(path.to_string_lossy().as_bytes()).map_err(|e| e.to_string())
}

/// Camera instance backed by the native library
pub struct NativeCamera {
    library: Arc<NativeLibrary>,
    camera: *mut c_void,
    opened: bool,
    previewing: bool,
    recording: bool,
}

// The instance pointer is only touched by the thread holding `&mut self`
unsafe impl Send for NativeCamera {}

impl NativeCamera {
    pub fn new(library: Arc<NativeLibrary>) -> Result<Self, CameraError> {
        let camera = unsafe { (library.create)() };
        if camera.is_null() {
            return Err(CameraError::Library(library.last_error()));
        }
        Ok(Self {
            library,
            camera,
            opened: false,
            previewing: false,
            recording: false,
        })
    }

    /// Load the configured library and create one camera instance
    pub fn load(config: &CameraConfig) -> Result<Self, CameraError> {
        Self::new(NativeLibrary::load(&config.library)?)
    }

    fn require_control(&self, control: Control) -> Result<(), CameraError> {
        if !self.opened {
            return Err(CameraError::NotOpened);
        }
        if !self.supports(control) {
            return Err(CameraError::Unsupported(control.to_string()));
        }
        Ok(())
    }

    fn read_value(&self, control: Control) -> Result<i32, CameraError> {
        let mut value: c_int = 0;
        let ret = unsafe { (self.library.get_value)(self.camera, control.native_flag(), &mut value) };
        if ret != 0 {
            return Err(CameraError::Control(format!(
                "reading {}: {}",
                control,
                self.library.describe(ret)
            )));
        }
        Ok(value)
    }
}

/// Whether the processing unit bitmask covers `flag`
fn processing_supports(supports: u64, flag: u32) -> bool {
    let bits = u64::from(flag & 0x7fff_ffff);
    supports & bits == bits
}

impl UvcCamera for NativeCamera {
    fn open(&mut self, control: &ControlBlock) -> Result<(), CameraError> {
        if self.opened {
            self.close();
        }
        let usbfs = CString::new(USBFS_ROOT).map_err(|e| CameraError::Open(e.to_string()))?;
        debug!(
            "Connecting {:04x}:{:04x} bus {} addr {}",
            control.vendor_id,
            control.product_id,
            control.bus(),
            control.address()
        );

        let ret = unsafe {
            (self.library.connect)(
                self.camera,
                control.vendor_id as c_int,
                control.product_id as c_int,
                control.raw_fd().unwrap_or(-1),
                control.bus() as c_int,
                control.address() as c_int,
                usbfs.as_ptr(),
            )
        };
        if ret != 0 {
            return Err(CameraError::Open(self.library.describe(ret)));
        }
        self.opened = true;
        Ok(())
    }

    fn close(&mut self) {
        if !self.opened {
            return;
        }
        if self.recording {
            if let Err(e) = self.stop_recording() {
                warn!("Stopping recording on close failed: {}", e);
            }
        }
        self.stop_preview();
        let ret = unsafe { (self.library.release)(self.camera) };
        if ret != 0 {
            warn!("Camera release failed: {}", self.library.describe(ret));
        }
        self.opened = false;
    }

    fn is_opened(&self) -> bool {
        self.opened
    }

    fn start_preview(&mut self, target: &PreviewTarget) -> Result<(), CameraError> {
        if !self.opened {
            return Err(CameraError::NotOpened);
        }

        let ret = unsafe {
            (self.library.set_preview_size)(
                self.camera,
                target.width as c_int,
                target.height as c_int,
                target.format.native_mode(),
                target.bandwidth_factor,
            )
        };
        if ret != 0 {
            return Err(CameraError::Preview(self.library.describe(ret)));
        }

        let window = target.surface.map_or(std::ptr::null_mut(), |s| s as usize as *mut c_void);
        let ret = unsafe { (self.library.set_preview_display)(self.camera, window) };
        if ret != 0 {
            return Err(CameraError::Preview(self.library.describe(ret)));
        }

        let ret = unsafe { (self.library.start_preview)(self.camera) };
        if ret != 0 {
            return Err(CameraError::Preview(self.library.describe(ret)));
        }
        self.previewing = true;
        Ok(())
    }

    fn stop_preview(&mut self) {
        if !self.previewing {
            return;
        }
        let ret = unsafe { (self.library.stop_preview)(self.camera) };
        if ret != 0 {
            warn!("Stop preview failed: {}", self.library.describe(ret));
        }
        self.previewing = false;
    }

    fn start_recording(&mut self, path: &Path) -> Result<(), CameraError> {
        if !self.opened {
            return Err(CameraError::NotOpened);
        }
        let path = c_path(path).map_err(CameraError::Recording)?;
        let ret = unsafe { (self.library.start_recording)(self.camera, path.as_ptr()) };
        if ret != 0 {
            return Err(CameraError::Recording(self.library.describe(ret)));
        }
        self.recording = true;
        Ok(())
    }

    fn stop_recording(&mut self) -> Result<(), CameraError> {
        if !self.recording {
            return Ok(());
        }
        let ret = unsafe { (self.library.stop_recording)(self.camera) };
        self.recording = false;
        if ret != 0 {
            return Err(CameraError::Recording(self.library.describe(ret)));
        }
        Ok(())
    }

    fn is_recording(&self) -> bool {
        self.recording
    }

    fn capture_still(&mut self, path: &Path) -> Result<(), CameraError> {
        if !self.opened {
            return Err(CameraError::NotOpened);
        }
        let path = c_path(path).map_err(CameraError::Capture)?;
        let ret = unsafe { (self.library.capture_still)(self.camera, path.as_ptr()) };
        if ret != 0 {
            return Err(CameraError::Capture(self.library.describe(ret)));
        }
        Ok(())
    }

    fn supports(&self, control: Control) -> bool {
        if !self.opened {
            return false;
        }
        let supports = unsafe { (self.library.processing_supports)(self.camera) };
        processing_supports(supports, control.native_flag())
    }

    fn get_value(&self, control: Control) -> Result<i32, CameraError> {
        self.require_control(control)?;
        self.read_value(control)
    }

    fn set_value(&mut self, control: Control, value: i32) -> Result<i32, CameraError> {
        self.require_control(control)?;
        let ret = unsafe { (self.library.set_value)(self.camera, control.native_flag(), value) };
        if ret != 0 {
            return Err(CameraError::Control(format!(
                "setting {} to {}: {}",
                control,
                value,
                self.library.describe(ret)
            )));
        }
        self.read_value(control)
    }

    fn reset_value(&mut self, control: Control) -> Result<i32, CameraError> {
        self.require_control(control)?;
        let ret = unsafe { (self.library.reset_value)(self.camera, control.native_flag()) };
        if ret != 0 {
            return Err(CameraError::Control(format!(
                "resetting {}: {}",
                control,
                self.library.describe(ret)
            )));
        }
        self.read_value(control)
    }

    fn supported_sizes(&self) -> Result<Vec<FrameSize>, CameraError> {
        if !self.opened {
            return Err(CameraError::NotOpened);
        }
        let ptr = unsafe { (self.library.supported_sizes)(self.camera) };
        if ptr.is_null() {
            return Err(CameraError::Preview(self.library.last_error()));
        }
        let list = unsafe { CStr::from_ptr(ptr) }.to_string_lossy();
        Ok(parse_size_list(&list))
    }
}

impl Drop for NativeCamera {
    fn drop(&mut self) {
        self.close();
        unsafe { (self.library.destroy)(self.camera) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_processing_support_mask() {
        let brightness_only = 0b01;
        assert!(processing_supports(brightness_only, Control::Brightness.native_flag()));
        assert!(!processing_supports(brightness_only, Control::Contrast.native_flag()));
        assert!(processing_supports(0b11, Control::Contrast.native_flag()));
    }

    #[test]
    fn test_missing_library_is_reported() {
        std::env::remove_var(LIBRARY_ENV);
        let result = NativeLibrary::load("/nonexistent/libuvccamera.so");
        assert!(matches!(result, Err(CameraError::Library(_))));
    }
}
