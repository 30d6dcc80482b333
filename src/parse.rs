//! Pure decoders, one per polled command family.
//!
//! Parsers only check layout. Range checks and cross-field rules belong to
//! the merge step in [`crate::aggregate`], so each rule lives in one place.

use std::collections::BTreeSet;

use tracing::trace;

use crate::error::ParseError;
use crate::hex::{FieldReader, decode_flags, decode_str};
use crate::protocol::Command;
use crate::types::*;

pub const WARNING_BITS: usize = 16;
const MODE_LEN: usize = 5;
const MAINTENANCE_LEN: usize = 5;
const MAINTENANCE_F7_LEN: usize = 6;
const SENSOR_COLUMNS: usize = 4;
const MODE_CONFIG_RECORD_LEN: usize = 5;
const CO2_PPM_PER_STEP: u16 = 8;

const SLOT_CO2: u8 = 0x01;
const SLOT_TEMPERATURE: u8 = 0x02;
/// Set by the controller for humidity (pyro) sensors; no value is ever
/// reported for it.
const SLOT_HUMIDITY: u8 = 0x04;

/// A mode byte, kept even when the code is not one we know.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeByte {
    Known(OperationMode),
    Unknown(u8),
}

impl ModeByte {
    fn from_code(code: u8) -> Self {
        OperationMode::from_code(code).map_or(ModeByte::Unknown(code), ModeByte::Known)
    }

    pub fn known(&self) -> Option<OperationMode> {
        match self {
            ModeByte::Known(mode) => Some(*mode),
            ModeByte::Unknown(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeReading {
    pub current: ModeByte,
    pub user: ModeByte,
    pub timeout: u8,
    pub timeout_unit: TimeoutUnit,
    pub airflow: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaintenanceReading {
    pub filter_clogging: u8,
    pub filter_reset: bool,
    pub filter_test: bool,
    pub bypass: BypassState,
    pub preheater_level: u8,
    pub f7_clogging: Option<u8>,
}

/// One position in the controller's sensor table, bound or not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotRecord {
    pub index: u8,
    pub reading: u8,
    pub flags: u8,
    pub duct: u8,
    pub raw_temperature: i8,
}

impl SlotRecord {
    /// A slot is surfaced only when it carries CO2 or temperature. Humidity
    /// alone does not count since it is never reported.
    pub fn is_bound(&self) -> bool {
        self.flags & (SLOT_CO2 | SLOT_TEMPERATURE) != 0
    }

    pub fn capabilities(&self) -> BTreeSet<Capability> {
        let mut caps = BTreeSet::new();
        if self.flags & SLOT_CO2 != 0 {
            caps.insert(Capability::Co2);
        }
        if self.flags & SLOT_TEMPERATURE != 0 {
            caps.insert(Capability::Temperature);
        }
        caps
    }

    pub fn advertises_humidity(&self) -> bool {
        self.flags & SLOT_HUMIDITY != 0
    }
}

/// Every slot the controller reported, in slot order. Unbound slots stay in
/// the table so indices never shift.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SensorTable {
    pub slots: Vec<SlotRecord>,
}

impl SensorTable {
    pub fn bound(&self) -> impl Iterator<Item = &SlotRecord> {
        self.slots.iter().filter(|s| s.is_bound())
    }

    /// Turn bound slots into room sensors. Temperatures are only read when
    /// the unit is known, and implausible values are dropped.
    pub fn rooms(&self, unit: Option<TemperatureUnit>) -> Vec<RoomSensor> {
        self.bound()
            .map(|slot| {
                if slot.advertises_humidity() {
                    trace!(index = slot.index, "slot advertises humidity, not reported");
                }
                let capabilities = slot.capabilities();
                let co2_ppm = capabilities
                    .contains(&Capability::Co2)
                    .then(|| u16::from(slot.reading) * CO2_PPM_PER_STEP);
                let temperature = if capabilities.contains(&Capability::Temperature) {
                    unit.and_then(|unit| {
                        let value = i16::from(slot.raw_temperature);
                        unit.plausible_range()
                            .contains(&value)
                            .then_some(Temperature { value, unit })
                    })
                } else {
                    None
                };
                RoomSensor {
                    index: slot.index,
                    duct: slot.duct,
                    name: String::new(),
                    capabilities,
                    co2_ppm,
                    temperature,
                }
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeConfigRecord {
    pub mode: ModeByte,
    pub airflow: u16,
    pub timeout: u16,
}

fn reader(command: Command, raw: &str) -> Result<FieldReader, ParseError> {
    FieldReader::new(raw.trim()).map_err(|e| ParseError::from_malformed(command, e))
}

fn expect_len(command: Command, r: &FieldReader, allowed: &[usize]) -> Result<(), ParseError> {
    if allowed.contains(&r.len()) {
        Ok(())
    } else {
        Err(ParseError::new(
            command,
            r.len(),
            format!("expected {allowed:?} bytes, got {}", r.len()),
        ))
    }
}

pub fn parse_warnings(raw: &str) -> Result<BTreeSet<u8>, ParseError> {
    decode_flags(raw.trim(), WARNING_BITS).map_err(|e| ParseError::from_malformed(Command::Warnings, e))
}

pub fn parse_mode(raw: &str) -> Result<ModeReading, ParseError> {
    let cmd = Command::Mode;
    let mut r = reader(cmd, raw)?;
    expect_len(cmd, &r, &[MODE_LEN])?;
    let malformed = |e| ParseError::from_malformed(cmd, e);
    Ok(ModeReading {
        current: ModeByte::from_code(r.u8().map_err(malformed)?),
        user: ModeByte::from_code(r.u8().map_err(malformed)?),
        timeout: r.u8().map_err(malformed)?,
        timeout_unit: TimeoutUnit::from_code(r.u8().map_err(malformed)?),
        airflow: r.u8().map_err(malformed)?,
    })
}

pub fn parse_maintenance(raw: &str) -> Result<MaintenanceReading, ParseError> {
    let cmd = Command::Maintenance;
    let mut r = reader(cmd, raw)?;
    expect_len(cmd, &r, &[MAINTENANCE_LEN, MAINTENANCE_F7_LEN])?;
    let malformed = |e| ParseError::from_malformed(cmd, e);
    let filter_clogging = r.u8().map_err(malformed)?;
    let filter_reset = r.u8().map_err(malformed)? != 0;
    let filter_test = r.u8().map_err(malformed)? != 0;
    let bypass = match r.u8().map_err(malformed)? {
        0 => BypassState::Closed,
        1 => BypassState::Open,
        other => BypassState::Unknown(other),
    };
    let preheater_level = r.u8().map_err(malformed)?;
    let f7_clogging = if r.remaining() > 0 {
        Some(r.u8().map_err(malformed)?)
    } else {
        None
    };
    Ok(MaintenanceReading {
        filter_clogging,
        filter_reset,
        filter_test,
        bypass,
        preheater_level,
        f7_clogging,
    })
}

/// The sensor payload is four columns of equal length: readings,
/// capability flags, duct numbers, then signed temperatures.
pub fn parse_sensors(raw: &str) -> Result<SensorTable, ParseError> {
    let cmd = Command::Sensors;
    let r = reader(cmd, raw)?;
    if r.len() == 0 || r.len() % SENSOR_COLUMNS != 0 {
        return Err(ParseError::new(
            cmd,
            r.len(),
            format!("length {} is not a whole number of slots", r.len()),
        ));
    }
    let count = r.len() / SENSOR_COLUMNS;
    if count > usize::from(u8::MAX) {
        return Err(ParseError::new(cmd, 0, format!("{count} slots exceeds table size")));
    }
    let malformed = |e| ParseError::from_malformed(cmd, e);
    let slots = (0..count)
        .map(|i| {
            Ok::<_, ParseError>(SlotRecord {
                index: i as u8,
                reading: r.at(i).map_err(malformed)?,
                flags: r.at(count + i).map_err(malformed)?,
                duct: r.at(2 * count + i).map_err(malformed)?,
                raw_temperature: r.at(3 * count + i).map_err(malformed)? as i8,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(SensorTable { slots })
}

pub fn parse_version(raw: &str) -> Result<String, ParseError> {
    let cmd = Command::Version;
    let mut r = reader(cmd, raw)?;
    expect_len(cmd, &r, &[1])?;
    let family = r.u8().map_err(|e| ParseError::from_malformed(cmd, e))?;
    Ok(match family {
        0 => "DXR Basic".to_string(),
        1 => "DXR Premium".to_string(),
        2 => "DXR Comfort".to_string(),
        3 => "DXR Plus".to_string(),
        other => format!("DXR (unknown family {other:#04x})"),
    })
}

pub fn parse_temperature_unit(raw: &str) -> Result<TemperatureUnit, ParseError> {
    let cmd = Command::TemperatureUnit;
    let mut r = reader(cmd, raw)?;
    expect_len(cmd, &r, &[1])?;
    match r.u8().map_err(|e| ParseError::from_malformed(cmd, e))? {
        0 => Ok(TemperatureUnit::Celsius),
        1 => Ok(TemperatureUnit::Fahrenheit),
        other => Err(ParseError::new(cmd, 0, format!("unknown temperature unit {other}"))),
    }
}

pub fn parse_mode_config(raw: &str) -> Result<Vec<ModeConfigRecord>, ParseError> {
    let cmd = Command::ModeConfig;
    let mut r = reader(cmd, raw)?;
    if r.len() == 0 || r.len() % MODE_CONFIG_RECORD_LEN != 0 {
        return Err(ParseError::new(
            cmd,
            r.len(),
            format!("length {} is not a whole number of mode records", r.len()),
        ));
    }
    let malformed = |e| ParseError::from_malformed(cmd, e);
    let mut records = Vec::with_capacity(r.len() / MODE_CONFIG_RECORD_LEN);
    while r.remaining() > 0 {
        records.push(ModeConfigRecord {
            mode: ModeByte::from_code(r.u8().map_err(malformed)?),
            airflow: r.u16().map_err(malformed)?,
            timeout: r.u16().map_err(malformed)?,
        });
    }
    Ok(records)
}

pub fn parse_room_name(duct: u8, raw: &str) -> Result<String, ParseError> {
    decode_str(raw.trim()).map_err(|e| ParseError::from_malformed(Command::RoomName(duct), e))
}
