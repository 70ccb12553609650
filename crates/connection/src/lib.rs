//! Camera Connection Coordination
//!
//! Owns the one live camera [`Session`]. A permitted device is handed over
//! with its [`ControlBlock`](usb_device::ControlBlock); the coordinator opens
//! the native camera, starts preview and keeps the bound service and the UI
//! affordances in step with the session.

mod coordinator;
mod error;
mod notice;
mod session;
mod worker;

pub use coordinator::{ConnectionCoordinator, ServiceNotifier};
pub use error::ConnectError;
pub use notice::{Notice, NoticeBuffer, NoticeSink};
pub use session::{Affordances, Session};
pub use worker::CameraWorker;
