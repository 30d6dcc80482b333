use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::aggregate::{RawCycle, merge};
use crate::config::{ConnectionConfig, DEFAULT_PORT};
use crate::diff::diff_snapshots;
use crate::logger::{MessageLogMode, MessageLogger};
use crate::parse::{
    SensorTable, parse_maintenance, parse_mode, parse_mode_config, parse_room_name, parse_sensors,
    parse_temperature_unit, parse_version, parse_warnings,
};
use crate::protocol::{self, Command, POLL_COMMANDS, PostRequest};
use crate::transport::Transport;
use crate::types::*;
use crate::{Error, Result};

type EventCallback = Box<dyn Fn(&Event) + Send + Sync>;
type SnapshotCallback = Box<dyn Fn(&DeviceSnapshot) + Send + Sync>;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_REFRESH_TIMEOUT: Duration = Duration::from_secs(25);
const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(1);
const MAX_RETRIES: u8 = 1;
/// Left of the refresh budget for merging once room names give up.
const MERGE_RESERVE: Duration = Duration::from_millis(200);

pub struct AerecoClientBuilder {
    host: String,
    port: u16,
    request_timeout: Duration,
    refresh_timeout: Duration,
    settle_delay: Duration,
    retries: u8,
    fetch_room_names: bool,
    event_callbacks: Vec<EventCallback>,
    snapshot_callbacks: Vec<SnapshotCallback>,
    log_mode: Option<MessageLogMode>,
    log_path: Option<String>,
}

impl AerecoClientBuilder {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_PORT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            refresh_timeout: DEFAULT_REFRESH_TIMEOUT,
            settle_delay: DEFAULT_SETTLE_DELAY,
            retries: MAX_RETRIES,
            fetch_room_names: true,
            event_callbacks: Vec::new(),
            snapshot_callbacks: Vec::new(),
            log_mode: None,
            log_path: None,
        }
    }

    /// Seed a builder from connection parameters. Zero timeouts are
    /// rejected by [`build`](Self::build).
    pub fn from_config(config: &ConnectionConfig) -> Self {
        Self::new(config.host.clone())
            .port(config.port)
            .request_timeout(config.request_timeout())
            .settle_delay(config.settle_delay())
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Upper bound for a whole refresh cycle, retries included.
    pub fn refresh_timeout(mut self, timeout: Duration) -> Self {
        self.refresh_timeout = timeout;
        self
    }

    /// Wait after a mutation before reading the device back.
    pub fn settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// Extra attempts on connection failures and timeouts. Capped at one.
    pub fn retries(mut self, retries: u8) -> Self {
        self.retries = retries.min(MAX_RETRIES);
        self
    }

    pub fn fetch_room_names(mut self, enabled: bool) -> Self {
        self.fetch_room_names = enabled;
        self
    }

    pub fn on_event(mut self, f: impl Fn(&Event) + Send + Sync + 'static) -> Self {
        self.event_callbacks.push(Box::new(f));
        self
    }

    pub fn on_snapshot(mut self, f: impl Fn(&DeviceSnapshot) + Send + Sync + 'static) -> Self {
        self.snapshot_callbacks.push(Box::new(f));
        self
    }

    pub fn message_log(mut self, mode: MessageLogMode, path: impl Into<String>) -> Self {
        self.log_mode = Some(mode);
        self.log_path = Some(path.into());
        self
    }

    pub fn build(self) -> Result<AerecoClient> {
        if self.host.trim().is_empty() {
            return Err(Error::InvalidArgument("host must not be empty".to_string()));
        }
        if self.request_timeout.is_zero() {
            return Err(Error::InvalidArgument("request timeout must be positive".to_string()));
        }
        if self.refresh_timeout.is_zero() {
            return Err(Error::InvalidArgument("refresh timeout must be positive".to_string()));
        }

        let logger = match (self.log_mode, self.log_path) {
            (Some(mode), Some(path)) => Some(MessageLogger::new(mode, &path)?),
            _ => None,
        };

        let base_url = format!("http://{}:{}", self.host, self.port);
        let transport = Transport::new(base_url, self.request_timeout, self.retries, logger)?;

        Ok(AerecoClient {
            transport: Arc::new(transport),
            refresh_timeout: self.refresh_timeout,
            settle_delay: self.settle_delay,
            fetch_room_names: self.fetch_room_names,
            device: tokio::sync::Mutex::new(()),
            snapshot: RwLock::new(None),
            state: Mutex::new(CycleState::Idle),
            event_callbacks: self.event_callbacks,
            snapshot_callbacks: self.snapshot_callbacks,
        })
    }
}

/// Client for one DXR controller.
///
/// Refreshes and mutations are serialized: at most one of them talks to the
/// device at any time and the others queue in arrival order. The current
/// snapshot is swapped in whole, so readers see either the old or the new
/// state.
pub struct AerecoClient {
    transport: Arc<Transport>,
    refresh_timeout: Duration,
    settle_delay: Duration,
    fetch_room_names: bool,
    device: tokio::sync::Mutex<()>,
    snapshot: RwLock<Option<Arc<DeviceSnapshot>>>,
    state: Mutex<CycleState>,
    event_callbacks: Vec<EventCallback>,
    snapshot_callbacks: Vec<SnapshotCallback>,
}

impl AerecoClient {
    pub fn builder(host: impl Into<String>) -> AerecoClientBuilder {
        AerecoClientBuilder::new(host)
    }

    /// Last snapshot a refresh produced, if any has succeeded yet.
    pub fn current_snapshot(&self) -> Option<Arc<DeviceSnapshot>> {
        self.snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn cycle_state(&self) -> CycleState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run one poll cycle and publish the resulting snapshot.
    ///
    /// On failure the previous snapshot stays current and the error is
    /// returned; the caller retries on its next scheduled poll.
    pub async fn refresh(&self) -> Result<Arc<DeviceSnapshot>> {
        let _device = self.device.lock().await;
        self.refresh_locked().await
    }

    async fn refresh_locked(&self) -> Result<Arc<DeviceSnapshot>> {
        let cycle = Uuid::new_v4();
        let previous = self.current_snapshot();
        self.set_state(CycleState::Fetching);
        debug!(%cycle, url = %self.transport.base_url(), "refresh started");

        let deadline = Instant::now() + self.refresh_timeout;
        let cycle_run = self.run_cycle(previous.as_deref(), deadline);
        let outcome = tokio::time::timeout_at(deadline, cycle_run)
            .await
            .unwrap_or(Err(Error::Timeout));

        let snapshot = match outcome {
            Ok(snapshot) => Arc::new(snapshot),
            Err(e) => {
                self.set_state(CycleState::Failed);
                warn!(%cycle, error = %e, "refresh failed, keeping previous snapshot");
                self.transport.log_cycle(cycle, "failed", Some(e.to_string()));
                return Err(e);
            }
        };

        let events = diff_snapshots(previous.as_deref(), &snapshot);
        *self.snapshot.write().unwrap_or_else(PoisonError::into_inner) = Some(snapshot.clone());
        self.set_state(CycleState::Ready);
        self.transport.log_cycle(cycle, "ready", None);

        for event in &events {
            for cb in &self.event_callbacks {
                cb(event);
            }
        }
        for cb in &self.snapshot_callbacks {
            cb(&snapshot);
        }
        if !events.is_empty() {
            debug!(%cycle, count = events.len(), "refresh produced events");
        }

        Ok(snapshot)
    }

    async fn run_cycle(
        &self,
        previous: Option<&DeviceSnapshot>,
        deadline: Instant,
    ) -> Result<DeviceSnapshot> {
        let t = &self.transport;
        let [c_warn, c_mode, c_maint, c_sensors, c_version, c_unit, c_config] = POLL_COMMANDS;
        let (warnings, mode, maintenance, sensors, version, unit, mode_config) = tokio::join!(
            t.get(c_warn),
            t.get(c_mode),
            t.get(c_maint),
            t.get(c_sensors),
            t.get(c_version),
            t.get(c_unit),
            t.get(c_config),
        );

        let mode = mode
            .and_then(|raw| Ok(parse_mode(&raw)?))
            .map_err(|e| Error::ModeUnresolved(Box::new(e)))?;

        let sensors = sensors.and_then(|raw| Ok(parse_sensors(&raw)?));
        let room_names = match &sensors {
            Ok(table) if self.fetch_room_names => {
                let names_deadline = deadline.checked_sub(MERGE_RESERVE).unwrap_or(deadline);
                self.fetch_names(table, names_deadline).await
            }
            _ => BTreeMap::new(),
        };

        self.set_state(CycleState::Merging);
        let raw = RawCycle {
            mode,
            warnings: warnings.and_then(|raw| Ok(parse_warnings(&raw)?)),
            maintenance: maintenance.and_then(|raw| Ok(parse_maintenance(&raw)?)),
            sensors,
            version: version.and_then(|raw| Ok(parse_version(&raw)?)),
            temperature_unit: unit.and_then(|raw| Ok(parse_temperature_unit(&raw)?)),
            mode_config: mode_config.and_then(|raw| Ok(parse_mode_config(&raw)?)),
            room_names,
        };
        merge(raw, previous, Utc::now())
    }

    /// Fetch the names of every bound room at once. Names still missing at
    /// `deadline` are left out, so the merge keeps the previous or default
    /// name for them.
    async fn fetch_names(&self, table: &SensorTable, deadline: Instant) -> BTreeMap<u8, String> {
        let ducts: BTreeSet<u8> = table.bound().map(|s| s.duct).collect();
        let mut lookups = JoinSet::new();
        for duct in ducts {
            let transport = Arc::clone(&self.transport);
            lookups.spawn(async move {
                let name = transport
                    .get(Command::RoomName(duct))
                    .await
                    .and_then(|raw| Ok(parse_room_name(duct, &raw)?));
                (duct, name)
            });
        }

        let mut names = BTreeMap::new();
        let collect = async {
            while let Some(joined) = lookups.join_next().await {
                match joined {
                    Ok((duct, Ok(name))) => {
                        names.insert(duct, name);
                    }
                    Ok((duct, Err(e))) => debug!(duct, error = %e, "room name unavailable"),
                    Err(e) => debug!(error = %e, "room name lookup aborted"),
                }
            }
        };
        let finished = tokio::time::timeout_at(deadline, collect).await.is_ok();
        if !finished {
            warn!(pending = lookups.len(), "room names timed out, keeping last known");
            lookups.abort_all();
        }
        names
    }

    fn set_state(&self, state: CycleState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    // -- Command methods --

    /// Switch the device to `mode`. Timed modes run for their configured
    /// timeout.
    pub async fn set_operation_mode(&self, mode: OperationMode) -> Result<()> {
        let request = protocol::set_mode_request(mode)?;
        self.dispatch("set_operation_mode", &[request]).await
    }

    /// Set how long a timed mode runs, in minutes.
    pub async fn set_mode_timeout(&self, mode: OperationMode, minutes: u16) -> Result<()> {
        validate_timeout(mode, minutes)?;
        let request = protocol::set_mode_timeout_request(mode, minutes)?;
        self.dispatch("set_mode_timeout", &[request]).await
    }

    /// Set the airflow set-point of a mode, in m³/h.
    pub async fn set_mode_airflow(&self, mode: OperationMode, airflow: u16) -> Result<()> {
        validate_airflow(mode, airflow)?;
        let request = protocol::set_mode_airflow_request(mode, airflow)?;
        self.dispatch("set_mode_airflow", &[request]).await
    }

    /// Switch to a timed mode and set its timeout in one settle window.
    pub async fn set_mode_with_timeout(&self, mode: OperationMode, minutes: u16) -> Result<()> {
        validate_timeout(mode, minutes)?;
        let requests = [
            protocol::set_mode_request(mode)?,
            protocol::set_mode_timeout_request(mode, minutes)?,
        ];
        self.dispatch("set_mode_with_timeout", &requests).await
    }

    pub async fn reset_filter(&self) -> Result<()> {
        let request = protocol::filter_reset_request()?;
        self.dispatch("reset_filter", &[request]).await
    }

    pub async fn start_filter_test(&self) -> Result<()> {
        let request = protocol::filter_test_request()?;
        self.dispatch("start_filter_test", &[request]).await
    }

    // -- Helpers --

    /// Send `requests` in order, let the device settle, then refresh out of
    /// cycle. The device lock is held throughout so no poll reads a
    /// half-applied change.
    async fn dispatch(&self, action: &str, requests: &[PostRequest]) -> Result<()> {
        let _device = self.device.lock().await;
        let mut outcome = Ok(());
        let mut accepted = 0;
        for request in requests {
            match self.transport.post(action, request).await {
                Ok(_) => accepted += 1,
                Err(e) => {
                    outcome = Err(e);
                    break;
                }
            }
        }
        // Nothing reached the device, nothing to read back.
        if accepted == 0 {
            return outcome;
        }

        tokio::time::sleep(self.settle_delay).await;

        // A failed read-back is reported through cycle_state and the next
        // poll; the mutation outcome stands on its own.
        if let Err(e) = self.refresh_locked().await {
            warn!(action, error = %e, "refresh after mutation failed");
        }
        outcome
    }
}

fn validate_airflow(mode: OperationMode, airflow: u16) -> Result<()> {
    let range = mode.airflow_range();
    if !range.contains(&airflow) {
        return Err(Error::InvalidArgument(format!(
            "{mode} airflow {airflow} m³/h not in {}..={}",
            range.start(),
            range.end()
        )));
    }
    Ok(())
}

fn validate_timeout(mode: OperationMode, minutes: u16) -> Result<()> {
    let Some(range) = mode.timeout_range() else {
        return Err(Error::InvalidArgument(format!("{mode} mode has no timeout")));
    };
    if !range.contains(&minutes) {
        return Err(Error::InvalidArgument(format!(
            "{mode} timeout {minutes} min not in {}..={}",
            range.start(),
            range.end()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn airflow_limits_per_mode() {
        assert!(validate_airflow(OperationMode::Boost, 500).is_ok());
        assert!(validate_airflow(OperationMode::Boost, 501).is_err());
        assert!(validate_airflow(OperationMode::Absence, 100).is_ok());
        assert!(validate_airflow(OperationMode::Absence, 101).is_err());
        assert!(validate_airflow(OperationMode::Stop, 55).is_err());
        assert!(validate_airflow(OperationMode::Automatic, 0).is_ok());
    }

    #[test]
    fn timeout_limits() {
        assert!(validate_timeout(OperationMode::Absence, 1).is_ok());
        assert!(validate_timeout(OperationMode::Absence, 999).is_ok());
        assert!(validate_timeout(OperationMode::Absence, 0).is_err());
        assert!(validate_timeout(OperationMode::Boost, 1000).is_err());
        let err = validate_timeout(OperationMode::Automatic, 30).unwrap_err();
        assert!(err.to_string().contains("no timeout"));
    }

    #[test]
    fn builder_rejects_empty_host() {
        assert!(matches!(
            AerecoClient::builder("").build(),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn builder_caps_retries() {
        let builder = AerecoClient::builder("10.0.0.2").retries(5);
        assert_eq!(builder.retries, 1);
    }

    #[test]
    fn zero_timeouts_are_rejected_at_build() {
        let mut cfg = ConnectionConfig::new("10.0.0.2");
        cfg.request_timeout_secs = 0;
        assert!(matches!(
            AerecoClientBuilder::from_config(&cfg).build(),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            AerecoClient::builder("10.0.0.2")
                .refresh_timeout(Duration::ZERO)
                .build(),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn from_config_carries_connection_parameters() {
        let mut cfg = ConnectionConfig::new("10.0.0.2");
        cfg.port = 8080;
        cfg.settle_delay_ms = 10;
        let builder = AerecoClientBuilder::from_config(&cfg);
        assert_eq!(builder.port, 8080);
        assert_eq!(builder.settle_delay, Duration::from_millis(10));
    }
}
