use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::error::ParseError;
use crate::parse::{MaintenanceReading, ModeConfigRecord, ModeByte, ModeReading, SensorTable};
use crate::protocol::Command;
use crate::types::*;
use crate::{Error, Result};

const PERCENT_MAX: u8 = 100;

/// Everything one refresh fetched, before validation. Only the mode reading
/// is mandatory; every other field may have failed on its own.
pub(crate) struct RawCycle {
    pub mode: ModeReading,
    pub warnings: Result<BTreeSet<u8>>,
    pub maintenance: Result<MaintenanceReading>,
    pub sensors: Result<SensorTable>,
    pub version: Result<String>,
    pub temperature_unit: Result<TemperatureUnit>,
    pub mode_config: Result<Vec<ModeConfigRecord>>,
    /// Room names by duct, for the fetches that succeeded.
    pub room_names: BTreeMap<u8, String>,
}

/// Validate and combine one cycle's readings into a snapshot, carrying over
/// what must survive from `previous`.
pub(crate) fn merge(
    raw: RawCycle,
    previous: Option<&DeviceSnapshot>,
    fetched_at: DateTime<Utc>,
) -> Result<DeviceSnapshot> {
    let mode = match raw.mode.current {
        ModeByte::Known(mode) => mode,
        ModeByte::Unknown(code) => {
            return Err(Error::ModeUnresolved(Box::new(Error::Parse(ParseError::new(
                Command::Mode,
                0,
                format!("unknown mode code {code}"),
            )))));
        }
    };

    let mode_configs = match raw.mode_config {
        Ok(records) => validate_mode_configs(&records),
        Err(e) => {
            warn!(error = %e, "mode configuration unavailable, keeping last known");
            previous.map(|p| p.mode_configs.clone()).unwrap_or_default()
        }
    };

    let airflow = in_range(u16::from(raw.mode.airflow), &mode.airflow_range());
    if airflow.is_none() {
        debug!(mode = %mode, airflow = raw.mode.airflow, "current airflow out of range");
    }
    let timeout = derive_timeout(mode, &raw.mode, &mode_configs);

    let (filter_clogging, maintenance) = match raw.maintenance {
        Ok(m) => (percent(m.filter_clogging), Some(maintenance_from(&m))),
        Err(e) => {
            warn!(error = %e, "maintenance data unavailable");
            (None, None)
        }
    };

    let warnings = raw
        .warnings
        .inspect_err(|e| warn!(error = %e, "warnings unavailable"))
        .ok();
    let system_version = raw
        .version
        .inspect_err(|e| warn!(error = %e, "system version unavailable"))
        .ok();
    let temperature_unit = raw
        .temperature_unit
        .inspect_err(|e| warn!(error = %e, "temperature unit unavailable"))
        .ok();

    let rooms = match raw.sensors {
        Ok(table) => {
            let previous_rooms = previous.and_then(|p| p.rooms.as_deref());
            let fresh = name_rooms(table.rooms(temperature_unit), previous_rooms, &raw.room_names);
            Some(reconcile_rooms(previous_rooms, fresh))
        }
        Err(e) => {
            warn!(error = %e, "sensor list unavailable");
            None
        }
    };

    Ok(DeviceSnapshot {
        mode,
        user_mode: raw.mode.user.known(),
        airflow,
        timeout,
        filter_clogging,
        maintenance,
        warnings,
        system_version,
        temperature_unit,
        mode_configs,
        rooms,
        fetched_at,
    })
}

/// The running timeout for `mode`. Automatic never has one, whatever the
/// payload says. A timed mode whose reported timeout is unusable falls back
/// to its configured timeout.
pub(crate) fn derive_timeout(
    mode: OperationMode,
    reading: &ModeReading,
    configs: &ModeConfigTable,
) -> Option<ModeTimeout> {
    let range = mode.timeout_range()?;
    let value = u16::from(reading.timeout);
    let reported = match reading.timeout_unit {
        TimeoutUnit::Unknown(_) => None,
        unit => range.contains(&value).then_some(ModeTimeout { value, unit }),
    };
    reported.or_else(|| {
        configs
            .get(&mode)
            .and_then(|c| c.timeout)
            .map(ModeTimeout::minutes)
    })
}

pub(crate) fn validate_mode_configs(records: &[ModeConfigRecord]) -> ModeConfigTable {
    let mut table = ModeConfigTable::new();
    for record in records {
        let Some(mode) = record.mode.known() else {
            debug!(mode = ?record.mode, "skipping unknown mode configuration record");
            continue;
        };
        let timeout = mode
            .timeout_range()
            .and_then(|range| in_range(record.timeout, &range));
        table.insert(
            mode,
            ModeConfig {
                airflow: in_range(record.airflow, &mode.airflow_range()),
                timeout,
            },
        );
    }
    table
}

/// Keep the previous cycle's order for slots that are still bound, drop the
/// ones that disappeared, and append new slots. Indices come from the
/// device and are never rewritten.
pub(crate) fn reconcile_rooms(
    previous: Option<&[RoomSensor]>,
    fresh: Vec<RoomSensor>,
) -> Vec<RoomSensor> {
    let mut by_index: BTreeMap<u8, RoomSensor> = fresh.into_iter().map(|r| (r.index, r)).collect();
    let mut rooms = Vec::with_capacity(by_index.len());
    for prev in previous.unwrap_or_default() {
        if let Some(room) = by_index.remove(&prev.index) {
            rooms.push(room);
        }
    }
    rooms.extend(by_index.into_values());
    rooms
}

fn name_rooms(
    mut rooms: Vec<RoomSensor>,
    previous: Option<&[RoomSensor]>,
    names: &BTreeMap<u8, String>,
) -> Vec<RoomSensor> {
    for room in &mut rooms {
        room.name = names
            .get(&room.duct)
            .filter(|n| !n.is_empty())
            .cloned()
            .or_else(|| {
                previous?
                    .iter()
                    .find(|p| p.index == room.index)
                    .map(|p| p.name.clone())
            })
            .unwrap_or_else(|| RoomSensor::default_name(room.duct));
    }
    rooms
}

fn maintenance_from(m: &MaintenanceReading) -> Maintenance {
    Maintenance {
        bypass: m.bypass,
        preheater_level: percent(m.preheater_level),
        filter: FilterStatus {
            reset_pending: m.filter_reset,
            test_running: m.filter_test,
            f7_clogging: m.f7_clogging.and_then(percent),
        },
    }
}

fn percent(value: u8) -> Option<u8> {
    (value <= PERCENT_MAX).then_some(value)
}

fn in_range(value: u16, range: &std::ops::RangeInclusive<u16>) -> Option<u16> {
    range.contains(&value).then_some(value)
}
