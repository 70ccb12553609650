//! USB Permission Gate
//!
//! Tracks the permission handshake per device. Platform permission
//! notifications may be dropped or delivered twice, so every transition is
//! guarded by the current state, and a bounded fallback poll re-checks the
//! platform while a request is outstanding.

mod error;
mod gate;
mod policy;

pub use error::GateError;
pub use gate::{PermissionGate, PermissionState, PollOutcome, PollTick, RequestOutcome, Transition};
pub use policy::PollPolicy;
