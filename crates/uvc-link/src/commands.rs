//! Line-oriented control input
//!
//! The daemon reads one command per line from stdin:
//!
//! ```text
//! connect /dev/bus/usb/001/004
//! close
//! record
//! still [path]
//! check
//! retry /dev/bus/usb/001/004
//! brightness 60
//! contrast 40
//! reset [brightness|contrast]
//! resolution 1280x720
//! resolutions
//! ```

use std::path::PathBuf;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use usb_device::DeviceId;
use uvc_camera::{Control, FrameSize};

use crate::hub::{Command, HubEvent};

#[derive(Error, Debug, PartialEq)]
pub enum CommandError {
    #[error("Unknown command: {0}")]
    Unknown(String),

    #[error("'{0}' needs a device id")]
    MissingDevice(&'static str),

    #[error("'{verb}': {reason}")]
    InvalidArgument { verb: String, reason: String },
}

/// Parse one input line; blank lines and `#` comments yield `None`
pub fn parse_command(line: &str) -> Result<Option<Command>, CommandError> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    let (verb, rest) = match line.split_once(char::is_whitespace) {
        Some((verb, rest)) => (verb, rest.trim()),
        None => (line, ""),
    };

    let command = match verb.to_ascii_lowercase().as_str() {
        "connect" => Command::Connect(device_arg("connect", rest)?),
        "retry" => Command::RetryPermission(device_arg("retry", rest)?),
        "close" | "disconnect" => Command::Close,
        "record" => Command::ToggleRecording,
        "still" | "capture" => {
            Command::CaptureStill((!rest.is_empty()).then(|| PathBuf::from(rest)))
        }
        "check" => Command::CheckPermissions,
        "brightness" | "contrast" => {
            let control = verb.parse::<Control>().map_err(|reason| invalid(verb, reason))?;
            let value = rest
                .parse::<i32>()
                .map_err(|_| invalid(verb, format!("expected a value 0-100, got '{}'", rest)))?;
            Command::SetControl(control, value)
        }
        "reset" if rest.is_empty() => Command::ResetControl(None),
        "reset" => Command::ResetControl(Some(
            rest.parse::<Control>().map_err(|reason| invalid(verb, reason))?,
        )),
        "resolution" => Command::ChangeResolution(
            rest.parse::<FrameSize>()
                .map_err(|reason| invalid(verb, reason))?,
        ),
        "resolutions" => Command::ListResolutions,
        _ => return Err(CommandError::Unknown(verb.to_string())),
    };
    Ok(Some(command))
}

fn invalid(verb: &str, reason: String) -> CommandError {
    CommandError::InvalidArgument {
        verb: verb.to_ascii_lowercase(),
        reason,
    }
}

fn device_arg(verb: &'static str, rest: &str) -> Result<DeviceId, CommandError> {
    if rest.is_empty() {
        return Err(CommandError::MissingDevice(verb));
    }
    Ok(DeviceId::new(rest))
}

/// Forward parsed commands from `input` until it closes
pub fn spawn_command_reader<R>(input: R, events: mpsc::Sender<HubEvent>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(input).lines();
        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    warn!("Reading commands failed: {}", e);
                    break;
                }
            };
            match parse_command(&line) {
                Ok(Some(command)) => {
                    if events.send(HubEvent::Command(command)).await.is_err() {
                        break;
                    }
                }
                Ok(None) => {}
                Err(e) => warn!("{}", e),
            }
        }
        debug!("Command input closed");
    })
}
