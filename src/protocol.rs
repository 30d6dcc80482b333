use std::fmt;

use crate::hex::encode_field;
use crate::types::OperationMode;
use crate::{Error, Result};

/// Every GET/POST command the client issues. Each one maps to a numeric
/// endpoint on the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Warnings,
    Mode,
    Maintenance,
    Sensors,
    Version,
    TemperatureUnit,
    ModeConfig,
    RoomName(u8),
    SetMode,
    /// Not defined for Automatic; callers validate first.
    SetModeTimeout(OperationMode),
    SetModeAirflow(OperationMode),
    FilterReset,
    FilterTest,
}

pub const ROOM_NAME_BASE: u16 = 43;

/// Polled on every refresh, in this order.
pub const POLL_COMMANDS: [Command; 7] = [
    Command::Warnings,
    Command::Mode,
    Command::Maintenance,
    Command::Sensors,
    Command::Version,
    Command::TemperatureUnit,
    Command::ModeConfig,
];

impl Command {
    /// Endpoint number. Room names span `43 + duct`, which can exceed a byte.
    pub fn code(&self) -> u16 {
        match self {
            Command::Warnings => 0,
            Command::Mode => 2,
            Command::Maintenance => 5,
            Command::Sensors => 6,
            Command::Version => 11,
            Command::TemperatureUnit => 13,
            Command::ModeConfig => 14,
            Command::RoomName(duct) => ROOM_NAME_BASE + u16::from(*duct),
            Command::SetMode => 15,
            Command::SetModeTimeout(mode) => 2 * u16::from(mode.code()),
            Command::SetModeAirflow(mode) => 2 * u16::from(mode.code()) + 1,
            Command::FilterReset => 16,
            Command::FilterTest => 17,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Command::Warnings => "warnings",
            Command::Mode => "mode",
            Command::Maintenance => "maintenance",
            Command::Sensors => "sensors",
            Command::Version => "version",
            Command::TemperatureUnit => "temperature_unit",
            Command::ModeConfig => "mode_config",
            Command::RoomName(_) => "room_name",
            Command::SetMode => "set_mode",
            Command::SetModeTimeout(_) => "set_mode_timeout",
            Command::SetModeAirflow(_) => "set_mode_airflow",
            Command::FilterReset => "filter_reset",
            Command::FilterTest => "filter_test",
        }
    }

    /// Path segment for GET requests.
    pub fn path(&self) -> String {
        format!("/{:02}", self.code())
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:02})", self.name(), self.code())
    }
}

pub const POST_PATH: &str = "/post";

/// A mutation ready to be form-posted as `p_i`/`p_v`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostRequest {
    pub command: Command,
    pub value: String,
}

impl PostRequest {
    pub fn form(&self) -> [(&'static str, String); 2] {
        [
            ("p_i", self.command.code().to_string()),
            ("p_v", self.value.clone()),
        ]
    }
}

fn encode(value: i64, width: usize) -> Result<String> {
    encode_field(value, width).map_err(|e| Error::InvalidArgument(e.reason))
}

pub fn set_mode_request(mode: OperationMode) -> Result<PostRequest> {
    Ok(PostRequest {
        command: Command::SetMode,
        value: encode(i64::from(mode.code()), 1)?,
    })
}

pub fn set_mode_timeout_request(mode: OperationMode, minutes: u16) -> Result<PostRequest> {
    if !mode.is_timed() {
        return Err(Error::InvalidArgument(format!("{mode} mode has no timeout")));
    }
    Ok(PostRequest {
        command: Command::SetModeTimeout(mode),
        value: mode_value(mode, minutes)?,
    })
}

pub fn set_mode_airflow_request(mode: OperationMode, airflow: u16) -> Result<PostRequest> {
    Ok(PostRequest {
        command: Command::SetModeAirflow(mode),
        value: mode_value(mode, airflow)?,
    })
}

pub fn filter_reset_request() -> Result<PostRequest> {
    Ok(PostRequest {
        command: Command::FilterReset,
        value: encode(1, 1)?,
    })
}

pub fn filter_test_request() -> Result<PostRequest> {
    Ok(PostRequest {
        command: Command::FilterTest,
        value: encode(1, 1)?,
    })
}

// mode byte followed by a 2-byte value
fn mode_value(mode: OperationMode, value: u16) -> Result<String> {
    Ok(format!(
        "{}{}",
        encode(i64::from(mode.code()), 1)?,
        encode(i64::from(value), 2)?
    ))
}
