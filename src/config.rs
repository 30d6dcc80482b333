use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

pub const DEFAULT_PORT: u16 = 80;
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_SETTLE_DELAY_MS: u64 = 1000;

/// Connection parameters handed over by whatever configures the client.
/// Missing fields take the controller's usual defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_settle_delay")]
    pub settle_delay_ms: u64,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_poll_interval() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}

fn default_request_timeout() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

fn default_settle_delay() -> u64 {
    DEFAULT_SETTLE_DELAY_MS
}

impl ConnectionConfig {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_PORT,
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            settle_delay_ms: DEFAULT_SETTLE_DELAY_MS,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(Error::InvalidArgument("host must not be empty".to_string()));
        }
        if self.poll_interval_secs == 0 {
            return Err(Error::InvalidArgument("poll interval must be at least 1s".to_string()));
        }
        if self.request_timeout_secs == 0 {
            return Err(Error::InvalidArgument("request timeout must be at least 1s".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_fields() {
        let cfg: ConnectionConfig = serde_json::from_str(r#"{"host": "192.168.1.50"}"#).unwrap();
        assert_eq!(cfg, ConnectionConfig::new("192.168.1.50"));
        assert_eq!(cfg.poll_interval(), Duration::from_secs(30));
        assert_eq!(cfg.request_timeout(), Duration::from_secs(10));
        assert_eq!(cfg.settle_delay(), Duration::from_secs(1));
    }

    #[test]
    fn explicit_fields_win() {
        let cfg: ConnectionConfig = serde_json::from_str(
            r#"{"host": "dxr.local", "port": 8080, "poll_interval_secs": 60, "settle_delay_ms": 250}"#,
        )
        .unwrap();
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.poll_interval(), Duration::from_secs(60));
        assert_eq!(cfg.settle_delay(), Duration::from_millis(250));
    }

    #[test]
    fn validation() {
        assert!(ConnectionConfig::new("dxr.local").validate().is_ok());
        assert!(ConnectionConfig::new(" ").validate().is_err());
        let mut cfg = ConnectionConfig::new("dxr.local");
        cfg.poll_interval_secs = 0;
        assert!(matches!(cfg.validate(), Err(Error::InvalidArgument(_))));
    }
}
