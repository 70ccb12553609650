use std::any::Any;
use std::panic::{self, Location};

use crate::log::{events, DiagnosticLog};

/// Record every panic in `log` before handing it to the previous hook
pub fn install_crash_hook(log: DiagnosticLog) {
    let previous = panic::take_hook();
    panic::set_hook(Box::new(move |info| {
        let extra = describe(info.payload(), info.location());
        log.record(events::CRASH, None, Some(&extra), None);
        previous(info);
    }));
}

fn describe(payload: &(dyn Any + Send), location: Option<&Location<'_>>) -> String {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string());

    match location {
        Some(location) => format!(
            "{} at {}:{}:{}",
            message,
            location.file(),
            location.line(),
            location.column()
        ),
        None => message,
    }
}
