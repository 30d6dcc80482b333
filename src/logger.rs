use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::Write;

use chrono::Utc;
use serde_json::{Map, Value, json};
use tracing::warn;
use uuid::Uuid;

use crate::protocol::{Command, PostRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageLogMode {
    /// Every response payload is written.
    Full,
    /// A response payload is written only when it differs from the last
    /// one seen for the same command.
    Diffed,
}

pub(crate) struct MessageLogger {
    mode: MessageLogMode,
    file: File,
    previous_payloads: HashMap<Command, String>,
}

impl MessageLogger {
    pub fn new(mode: MessageLogMode, path: &str) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            mode,
            file,
            previous_payloads: HashMap::new(),
        })
    }

    pub fn log_request(&mut self, method: &str, command: Command) {
        let mut entry = envelope("req", command);
        entry.insert("method".into(), method.into());
        entry.insert("name".into(), command.name().into());
        self.write_line(entry);
    }

    pub fn log_command(&mut self, action: &str, request: &PostRequest) {
        let mut entry = envelope("cmd", request.command);
        entry.insert("action".into(), action.into());
        entry.insert("value".into(), request.value.clone().into());
        self.write_line(entry);
    }

    pub fn log_response(&mut self, command: Command, status: u16, payload: &str) {
        let mut entry = envelope("resp", command);
        entry.insert("status".into(), status.into());

        if let MessageLogMode::Diffed = self.mode {
            match self.previous_payloads.insert(command, payload.to_string()) {
                None => {
                    entry.insert("full".into(), true.into());
                }
                Some(prev) if prev == payload => {
                    entry.insert("changed".into(), false.into());
                    self.write_line(entry);
                    return;
                }
                Some(prev) => {
                    entry.insert("changed".into(), true.into());
                    entry.insert("old".into(), prev.into());
                }
            }
        }

        entry.insert("payload".into(), payload.into());
        self.write_line(entry);
    }

    pub fn log_cycle(&mut self, cycle: Uuid, outcome: &str, error: Option<String>) {
        let entry = json!({
            "ts": Utc::now().to_rfc3339(),
            "dir": "cycle",
            "cycle": cycle.to_string(),
            "outcome": outcome,
            "error": error,
        });
        if let Value::Object(entry) = entry {
            self.write_line(entry);
        }
    }

    fn write_line(&mut self, entry: Map<String, Value>) {
        let line = Value::Object(entry).to_string();
        if let Err(e) = writeln!(self.file, "{line}") {
            warn!(error = %e, "message log write failed");
        }
    }
}

fn envelope(dir: &str, command: Command) -> Map<String, Value> {
    let mut entry = Map::new();
    entry.insert("ts".into(), Utc::now().to_rfc3339().into());
    entry.insert("dir".into(), dir.into());
    entry.insert("command".into(), command.code().into());
    entry
}
