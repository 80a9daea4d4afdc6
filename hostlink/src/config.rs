//! Controller and peripheral configuration.
//!
//! Both structs are plain builders with defaults. `from_env` overlays the
//! `HOSTLINK_*` environment variables; values that fail to parse are logged
//! and ignored.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const ENV_CMD_SLOTS: &str = "HOSTLINK_CMD_SLOTS";
pub const ENV_CMD_TIMEOUT_MS: &str = "HOSTLINK_CMD_TIMEOUT_MS";
pub const ENV_MAX_RETRY: &str = "HOSTLINK_MAX_RETRY";
pub const ENV_CONNECT_TIMEOUT_MS: &str = "HOSTLINK_CONNECT_TIMEOUT_MS";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Pool capacity: queued, active and uncollected commands combined.
    pub command_slots: usize,
    /// Default deadline for the typed command API.
    pub command_timeout: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            command_slots: 4,
            command_timeout: Duration::from_secs(5),
        }
    }
}

impl ControllerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_env() -> Self {
        Self::default().overlay(|name| std::env::var(name).ok())
    }

    /// Apply overrides from `lookup`, keyed by environment variable name.
    pub fn overlay(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(slots) = parse_var::<usize>(&lookup, ENV_CMD_SLOTS) {
            self = self.with_command_slots(slots);
        }
        if let Some(ms) = parse_var::<u64>(&lookup, ENV_CMD_TIMEOUT_MS) {
            self = self.with_command_timeout(Duration::from_millis(ms));
        }
        self
    }

    /// At least one slot is always configured.
    pub fn with_command_slots(mut self, slots: usize) -> Self {
        self.command_slots = slots.max(1);
        self
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeripheralConfig {
    /// Reconnect attempts after the first failed association.
    pub max_connect_retries: u32,
    /// Bound on a single connect command. `None` waits for the driver.
    pub connect_timeout: Option<Duration>,
    /// Requests buffered ahead of the handler task.
    pub request_queue: usize,
}

impl Default for PeripheralConfig {
    fn default() -> Self {
        Self {
            max_connect_retries: 5,
            connect_timeout: None,
            request_queue: 8,
        }
    }
}

impl PeripheralConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_env() -> Self {
        Self::default().overlay(|name| std::env::var(name).ok())
    }

    pub fn overlay(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(retries) = parse_var::<u32>(&lookup, ENV_MAX_RETRY) {
            self = self.with_max_connect_retries(retries);
        }
        if let Some(ms) = parse_var::<u64>(&lookup, ENV_CONNECT_TIMEOUT_MS) {
            self = self.with_connect_timeout(Some(Duration::from_millis(ms)));
        }
        self
    }

    pub fn with_max_connect_retries(mut self, retries: u32) -> Self {
        self.max_connect_retries = retries;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_request_queue(mut self, depth: usize) -> Self {
        self.request_queue = depth.max(1);
        self
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<T> {
    let raw = lookup(name)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(var = name, value = %raw, "Ignoring invalid configuration value");
            None
        }
    }
}
