//! Notice delivery for the headless daemon

use tracing::{info, warn};

use connection::{Notice, NoticeSink};

/// Surfaces notices through the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotices;

impl NoticeSink for LogNotices {
    fn notify(&self, notice: Notice) {
        if notice.is_error() {
            warn!(target: "uvc_link::notice", "{}", notice);
        } else {
            info!(target: "uvc_link::notice", "{}", notice);
        }
    }
}
