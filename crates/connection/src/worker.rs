//! Bounded calls into the native camera

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::warn;

use uvc_camera::{CameraError, UvcCamera};

/// Runs camera calls on the blocking pool, one at a time, each bounded by
/// `timeout`.
///
/// A call that times out keeps running in the background and holds the
/// camera until it returns; later calls queue behind it.
#[derive(Clone)]
pub struct CameraWorker {
    camera: Arc<Mutex<Box<dyn UvcCamera>>>,
    timeout: Duration,
}

impl CameraWorker {
    pub fn new(camera: Box<dyn UvcCamera>, timeout: Duration) -> Self {
        Self {
            camera: Arc::new(Mutex::new(camera)),
            timeout,
        }
    }

    pub async fn run<T, F>(&self, call: F) -> Result<T, CameraError>
    where
        F: FnOnce(&mut dyn UvcCamera) -> Result<T, CameraError> + Send + 'static,
        T: Send + 'static,
    {
        let camera = Arc::clone(&self.camera);
        let task = tokio::task::spawn_blocking(move || {
            let mut camera = camera.lock().unwrap_or_else(|e| e.into_inner());
            call(&mut **camera)
        });

        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(CameraError::Open(format!("camera worker failed: {}", e))),
            Err(_) => Err(CameraError::Timeout(self.timeout.as_millis() as u64)),
        }
    }

    /// Close the camera in the background, without waiting
    pub fn close_detached(&self) {
        let camera = Arc::clone(&self.camera);
        tokio::task::spawn_blocking(move || {
            let mut camera = camera.lock().unwrap_or_else(|e| e.into_inner());
            if camera.is_opened() {
                warn!("Closing camera left open by a timed out call");
                camera.close();
            }
        });
    }
}
