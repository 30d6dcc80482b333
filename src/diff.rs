use std::collections::BTreeSet;

use crate::types::*;

/// Compare two consecutive snapshots and describe what changed. With no
/// previous snapshot everything present counts as new.
pub(crate) fn diff_snapshots(previous: Option<&DeviceSnapshot>, current: &DeviceSnapshot) -> Vec<Event> {
    let mut events = Vec::new();

    let prev_mode = previous.map(|p| p.mode);
    if prev_mode != Some(current.mode) {
        events.push(Event::ModeChanged {
            from: prev_mode,
            to: current.mode,
        });
    }

    if let Some(prev) = previous {
        if prev.airflow != current.airflow {
            events.push(Event::AirflowChanged {
                airflow: current.airflow,
            });
        }
        if prev.timeout != current.timeout {
            events.push(Event::TimeoutChanged {
                timeout: current.timeout,
            });
        }
        if prev.filter_clogging != current.filter_clogging {
            events.push(Event::FilterCloggingChanged {
                level: current.filter_clogging,
            });
        }
    }

    let prev_bypass = previous.and_then(|p| p.maintenance).map(|m| m.bypass);
    if let Some(m) = current.maintenance
        && prev_bypass != Some(m.bypass)
    {
        events.push(Event::BypassChanged { state: m.bypass });
    }

    diff_warnings(previous.and_then(|p| p.warnings.as_ref()), current.warnings.as_ref(), &mut events);

    for (mode, config) in &current.mode_configs {
        let prev_config = previous.and_then(|p| p.mode_configs.get(mode));
        if prev_config != Some(config) {
            events.push(Event::ModeConfigChanged {
                mode: *mode,
                config: *config,
            });
        }
    }

    // An unavailable sensor list says nothing about which rooms exist.
    if let Some(rooms) = &current.rooms {
        let prev_rooms = previous.and_then(|p| p.rooms.as_deref()).unwrap_or_default();
        diff_rooms(prev_rooms, rooms, &mut events);
    }

    events
}

fn diff_warnings(previous: Option<&BTreeSet<u8>>, current: Option<&BTreeSet<u8>>, events: &mut Vec<Event>) {
    let Some(current) = current else {
        return;
    };
    let empty = BTreeSet::new();
    let previous = previous.unwrap_or(&empty);
    for code in current.difference(previous) {
        events.push(Event::WarningRaised { code: *code });
    }
    for code in previous.difference(current) {
        events.push(Event::WarningCleared { code: *code });
    }
}

fn diff_rooms(previous: &[RoomSensor], current: &[RoomSensor], events: &mut Vec<Event>) {
    for prev in previous {
        if !current.iter().any(|r| r.index == prev.index) {
            events.push(Event::RoomRemoved { index: prev.index });
        }
    }

    for room in current {
        let Some(prev) = previous.iter().find(|p| p.index == room.index) else {
            events.push(Event::RoomAdded {
                index: room.index,
                name: room.name.clone(),
            });
            continue;
        };
        if prev.name != room.name {
            events.push(Event::RoomRenamed {
                index: room.index,
                name: room.name.clone(),
            });
        }
        if prev.co2_ppm != room.co2_ppm {
            events.push(Event::RoomCo2Changed {
                index: room.index,
                name: room.name.clone(),
                ppm: room.co2_ppm,
            });
        }
        if prev.temperature != room.temperature {
            events.push(Event::RoomTemperatureChanged {
                index: room.index,
                name: room.name.clone(),
                temp: room.temperature,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn snapshot() -> DeviceSnapshot {
        DeviceSnapshot {
            mode: OperationMode::Automatic,
            user_mode: Some(OperationMode::Automatic),
            airflow: Some(90),
            timeout: None,
            filter_clogging: Some(10),
            maintenance: Some(Maintenance::default()),
            warnings: Some(BTreeSet::new()),
            system_version: Some("DXR Plus".to_string()),
            temperature_unit: Some(TemperatureUnit::Celsius),
            mode_configs: ModeConfigTable::new(),
            rooms: Some(vec![RoomSensor {
                index: 0,
                duct: 0,
                name: "Kitchen".to_string(),
                capabilities: BTreeSet::from([Capability::Co2, Capability::Temperature]),
                co2_ppm: Some(480),
                temperature: Some(Temperature {
                    value: 21,
                    unit: TemperatureUnit::Celsius,
                }),
            }]),
            fetched_at: Utc::now(),
        }
    }

    #[test]
    fn first_snapshot_reports_everything_new() {
        let events = diff_snapshots(None, &snapshot());
        assert!(events.contains(&Event::ModeChanged {
            from: None,
            to: OperationMode::Automatic
        }));
        assert!(events.contains(&Event::RoomAdded {
            index: 0,
            name: "Kitchen".to_string()
        }));
        assert!(events.contains(&Event::BypassChanged {
            state: BypassState::Closed
        }));
    }

    #[test]
    fn identical_snapshots_produce_no_events() {
        let a = snapshot();
        let mut b = a.clone();
        b.fetched_at = Utc::now();
        assert!(diff_snapshots(Some(&a), &b).is_empty());
    }

    #[test]
    fn mode_and_airflow_changes() {
        let a = snapshot();
        let mut b = a.clone();
        b.mode = OperationMode::Boost;
        b.airflow = Some(400);
        b.timeout = Some(ModeTimeout::minutes(30));
        let events = diff_snapshots(Some(&a), &b);
        assert_eq!(
            events,
            vec![
                Event::ModeChanged {
                    from: Some(OperationMode::Automatic),
                    to: OperationMode::Boost
                },
                Event::AirflowChanged { airflow: Some(400) },
                Event::TimeoutChanged {
                    timeout: Some(ModeTimeout::minutes(30))
                },
            ]
        );
    }

    #[test]
    fn warnings_raised_and_cleared() {
        let mut a = snapshot();
        a.warnings = Some(BTreeSet::from([1, 4]));
        let mut b = a.clone();
        b.warnings = Some(BTreeSet::from([4, 7]));
        let events = diff_snapshots(Some(&a), &b);
        assert_eq!(
            events,
            vec![Event::WarningRaised { code: 7 }, Event::WarningCleared { code: 1 }]
        );

        // unavailable warnings are not "all cleared"
        let mut c = a.clone();
        c.warnings = None;
        assert!(diff_snapshots(Some(&a), &c).is_empty());
    }

    #[test]
    fn room_readings_and_membership() {
        let a = snapshot();
        let mut b = a.clone();
        if let Some(rooms) = b.rooms.as_mut() {
            rooms[0].co2_ppm = Some(800);
            rooms.push(RoomSensor {
                index: 2,
                duct: 2,
                name: "Room 3".to_string(),
                capabilities: BTreeSet::from([Capability::Temperature]),
                co2_ppm: None,
                temperature: None,
            });
        }
        let events = diff_snapshots(Some(&a), &b);
        assert!(events.contains(&Event::RoomCo2Changed {
            index: 0,
            name: "Kitchen".to_string(),
            ppm: Some(800)
        }));
        assert!(events.contains(&Event::RoomAdded {
            index: 2,
            name: "Room 3".to_string()
        }));

        let events = diff_snapshots(Some(&b), &a);
        assert!(events.contains(&Event::RoomRemoved { index: 2 }));
    }
}
