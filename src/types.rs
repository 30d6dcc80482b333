use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::ops::RangeInclusive;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Device-wide ventilation behaviour. Exactly one is active at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum OperationMode {
    Automatic,
    FreeCooling,
    Boost,
    Absence,
    Stop,
}

/// Timeouts accepted by the controller, in minutes, for every timed mode.
pub const TIMEOUT_RANGE: RangeInclusive<u16> = 1..=999;

impl OperationMode {
    pub const ALL: [OperationMode; 5] = [
        OperationMode::Automatic,
        OperationMode::FreeCooling,
        OperationMode::Boost,
        OperationMode::Absence,
        OperationMode::Stop,
    ];

    pub fn code(&self) -> u8 {
        match self {
            OperationMode::Automatic => 0,
            OperationMode::FreeCooling => 1,
            OperationMode::Boost => 2,
            OperationMode::Absence => 3,
            OperationMode::Stop => 4,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(OperationMode::Automatic),
            1 => Some(OperationMode::FreeCooling),
            2 => Some(OperationMode::Boost),
            3 => Some(OperationMode::Absence),
            4 => Some(OperationMode::Stop),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            OperationMode::Automatic => "Automatic",
            OperationMode::FreeCooling => "Free Cooling",
            OperationMode::Boost => "Boost",
            OperationMode::Absence => "Absence",
            OperationMode::Stop => "Stop",
        }
    }

    /// Automatic runs indefinitely; every other mode expires.
    pub fn is_timed(&self) -> bool {
        !matches!(self, OperationMode::Automatic)
    }

    /// Airflow set-points the controller accepts for this mode, in m³/h.
    pub fn airflow_range(&self) -> RangeInclusive<u16> {
        match self {
            OperationMode::Automatic | OperationMode::FreeCooling => 0..=300,
            OperationMode::Boost => 0..=500,
            OperationMode::Absence => 0..=100,
            OperationMode::Stop => 0..=50,
        }
    }

    /// Timeout range in minutes, `None` for Automatic.
    pub fn timeout_range(&self) -> Option<RangeInclusive<u16>> {
        self.is_timed().then_some(TIMEOUT_RANGE)
    }
}

impl fmt::Display for OperationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Unit the controller reports a running timeout in. Passed through as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeoutUnit {
    Seconds,
    Minutes,
    Hours,
    Days,
    Unknown(u8),
}

impl TimeoutUnit {
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => TimeoutUnit::Seconds,
            1 => TimeoutUnit::Minutes,
            2 => TimeoutUnit::Hours,
            3 => TimeoutUnit::Days,
            other => TimeoutUnit::Unknown(other),
        }
    }

    pub fn suffix(&self) -> &'static str {
        match self {
            TimeoutUnit::Seconds => "s",
            TimeoutUnit::Minutes => "min",
            TimeoutUnit::Hours => "h",
            TimeoutUnit::Days => "d",
            TimeoutUnit::Unknown(_) => "?",
        }
    }
}

/// Time left in the active mode, in the unit the device reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeTimeout {
    pub value: u16,
    pub unit: TimeoutUnit,
}

impl ModeTimeout {
    pub fn minutes(value: u16) -> Self {
        Self {
            value,
            unit: TimeoutUnit::Minutes,
        }
    }

    /// `None` when the device used a unit code we cannot interpret.
    pub fn as_duration(&self) -> Option<Duration> {
        let secs = u64::from(self.value);
        match self.unit {
            TimeoutUnit::Seconds => Some(Duration::from_secs(secs)),
            TimeoutUnit::Minutes => Some(Duration::from_secs(secs * 60)),
            TimeoutUnit::Hours => Some(Duration::from_secs(secs * 3600)),
            TimeoutUnit::Days => Some(Duration::from_secs(secs * 86_400)),
            TimeoutUnit::Unknown(_) => None,
        }
    }
}

impl fmt::Display for ModeTimeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.value, self.unit.suffix())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TemperatureUnit {
    Celsius,
    Fahrenheit,
}

impl TemperatureUnit {
    /// Plausible room readings; anything outside is treated as a bad sample.
    pub fn plausible_range(&self) -> RangeInclusive<i16> {
        match self {
            TemperatureUnit::Celsius => -40..=60,
            TemperatureUnit::Fahrenheit => -40..=140,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            TemperatureUnit::Celsius => "\u{00b0}C",
            TemperatureUnit::Fahrenheit => "\u{00b0}F",
        }
    }
}

/// A room temperature in the controller's configured unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Temperature {
    pub value: i16,
    pub unit: TemperatureUnit,
}

impl Temperature {
    pub fn celsius(&self) -> f64 {
        match self.unit {
            TemperatureUnit::Celsius => f64::from(self.value),
            TemperatureUnit::Fahrenheit => (f64::from(self.value) - 32.0) * (5.0 / 9.0),
        }
    }

    pub fn fahrenheit(&self) -> f64 {
        match self.unit {
            TemperatureUnit::Celsius => f64::from(self.value) * (9.0 / 5.0) + 32.0,
            TemperatureUnit::Fahrenheit => f64::from(self.value),
        }
    }
}

impl fmt::Display for Temperature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.value, self.unit.symbol())
    }
}

/// Measurements a sensor slot can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Capability {
    Co2,
    Temperature,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomSensor {
    /// Slot position in the controller's sensor table. Stable for the
    /// lifetime of a connection.
    pub index: u8,
    /// Room/duct the slot reports for; selects the room-name command.
    pub duct: u8,
    pub name: String,
    pub capabilities: BTreeSet<Capability>,
    pub co2_ppm: Option<u16>,
    pub temperature: Option<Temperature>,
}

impl RoomSensor {
    pub fn has(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    pub fn default_name(duct: u8) -> String {
        format!("Room {}", u16::from(duct) + 1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BypassState {
    #[default]
    Closed,
    Open,
    Unknown(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FilterStatus {
    pub reset_pending: bool,
    pub test_running: bool,
    /// Clogging of the optional F7 filter stage, when fitted.
    pub f7_clogging: Option<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Maintenance {
    pub bypass: BypassState,
    pub preheater_level: Option<u8>,
    pub filter: FilterStatus,
}

/// Configured set-points for one mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ModeConfig {
    pub airflow: Option<u16>,
    /// Minutes. Always `None` for Automatic.
    pub timeout: Option<u16>,
}

pub type ModeConfigTable = BTreeMap<OperationMode, ModeConfig>;

/// One fully merged view of the controller, produced by a single refresh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    pub mode: OperationMode,
    /// The mode the user last selected, which the device returns to.
    pub user_mode: Option<OperationMode>,
    pub airflow: Option<u16>,
    /// Absent whenever `mode` is Automatic.
    pub timeout: Option<ModeTimeout>,
    pub filter_clogging: Option<u8>,
    pub maintenance: Option<Maintenance>,
    /// `None` when the warnings command failed; empty when the device
    /// reports no warnings.
    pub warnings: Option<BTreeSet<u8>>,
    pub system_version: Option<String>,
    pub temperature_unit: Option<TemperatureUnit>,
    pub mode_configs: ModeConfigTable,
    pub rooms: Option<Vec<RoomSensor>>,
    pub fetched_at: DateTime<Utc>,
}

impl DeviceSnapshot {
    pub fn room(&self, index: u8) -> Option<&RoomSensor> {
        self.rooms.as_ref()?.iter().find(|r| r.index == index)
    }

    pub fn mode_config(&self, mode: OperationMode) -> Option<&ModeConfig> {
        self.mode_configs.get(&mode)
    }

    pub fn has_warnings(&self) -> bool {
        self.warnings.as_ref().is_some_and(|w| !w.is_empty())
    }
}

/// Where the last refresh cycle ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CycleState {
    #[default]
    Idle,
    Fetching,
    Merging,
    Ready,
    Failed,
}

/// Changes detected between two consecutive snapshots.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    ModeChanged { from: Option<OperationMode>, to: OperationMode },
    AirflowChanged { airflow: Option<u16> },
    TimeoutChanged { timeout: Option<ModeTimeout> },
    FilterCloggingChanged { level: Option<u8> },
    BypassChanged { state: BypassState },
    WarningRaised { code: u8 },
    WarningCleared { code: u8 },
    ModeConfigChanged { mode: OperationMode, config: ModeConfig },
    RoomAdded { index: u8, name: String },
    RoomRemoved { index: u8 },
    RoomRenamed { index: u8, name: String },
    RoomCo2Changed { index: u8, name: String, ppm: Option<u16> },
    RoomTemperatureChanged { index: u8, name: String, temp: Option<Temperature> },
}
