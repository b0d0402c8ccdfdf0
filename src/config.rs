//! Tunables for route switching, read from a JSON document such as
//!
//! ```json
//! {
//!     "log_level": "debug",
//!     "connection_timeout_ms": 6000,
//!     "transition_timeout_ms": 10000,
//!     "retry_backoff_ms": 500,
//!     "headset_bind_timeout_ms": 500,
//!     "local_log_capacity": 20
//! }
//! ```
//!
//! Keys that are absent keep their default value.

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use log::LevelFilter;
use serde_json::Value;

use crate::core::local_log;

/// Hard bound on scheduled reconnection attempts after a rejected connect
pub const MAX_CONNECTION_RETRIES: u32 = 2;

/// Bound on the round trip of a synchronous state query through the queue
pub const QUERY_TIMEOUT: Duration = Duration::from_secs(1);

const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_millis(6000);
const DEFAULT_TRANSITION_TIMEOUT: Duration = Duration::from_millis(10000);
const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(500);
const DEFAULT_HEADSET_BIND_TIMEOUT: Duration = Duration::from_millis(500);

/// The timeout policy collaborator. Delays are wall-clock and best effort.
pub trait TimeoutsProvider: Send + Sync {
    /// How long a `Connecting` state waits for audio before giving up
    fn connection_timeout(&self) -> Duration;

    /// How long a route transition waits for its confirmations. Longer
    /// than a connection attempt including its retries.
    fn transition_timeout(&self) -> Duration;

    /// Delay before the given retry attempt (1-based)
    fn retry_backoff(&self, attempt: u32) -> Duration;
}

/// Route switching configuration
#[derive(Debug, Clone, PartialEq)]
pub struct RouteConfig {
    /// Level installed by `init_logging`
    pub log_level: LevelFilter,
    /// See `TimeoutsProvider::connection_timeout`
    pub connection_timeout: Duration,
    /// See `TimeoutsProvider::transition_timeout`
    pub transition_timeout: Duration,
    /// Base delay of the first retry; doubled for each further attempt
    pub retry_backoff: Duration,
    /// How long headset operations wait for the profile service to attach
    pub headset_bind_timeout: Duration,
    /// Number of entries kept in the transition log
    pub local_log_capacity: usize,
}

impl Default for RouteConfig {
    fn default() -> Self {
        Self {
            log_level: LevelFilter::Info,
            connection_timeout: DEFAULT_CONNECTION_TIMEOUT,
            transition_timeout: DEFAULT_TRANSITION_TIMEOUT,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
            headset_bind_timeout: DEFAULT_HEADSET_BIND_TIMEOUT,
            local_log_capacity: local_log::DEFAULT_CAPACITY,
        }
    }
}

impl RouteConfig {
    /// Read and parse the config file at `path`
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read route config {}", path.display()))?;
        Self::from_json(&content).with_context(|| format!("invalid route config {}", path.display()))
    }

    /// Parse a JSON document. Unknown keys are ignored.
    pub fn from_json(config: &str) -> Result<Self> {
        let value = serde_json::from_str::<Value>(config)?;
        let Some(section) = value.as_object() else {
            bail!("route config must be a JSON object");
        };

        let mut out = Self::default();
        if let Some(level) = section.get("log_level") {
            out.log_level = match level.as_str().map(str::parse::<LevelFilter>) {
                Some(Ok(level)) => level,
                _ => bail!("bad log_level {level}"),
            };
        }
        if let Some(ms) = get_millis(section.get("connection_timeout_ms"))? {
            out.connection_timeout = ms;
        }
        if let Some(ms) = get_millis(section.get("transition_timeout_ms"))? {
            out.transition_timeout = ms;
        }
        if let Some(ms) = get_millis(section.get("retry_backoff_ms"))? {
            out.retry_backoff = ms;
        }
        if let Some(ms) = get_millis(section.get("headset_bind_timeout_ms"))? {
            out.headset_bind_timeout = ms;
        }
        if let Some(capacity) = section.get("local_log_capacity") {
            let Some(capacity) = capacity.as_u64() else {
                bail!("bad local_log_capacity {capacity}");
            };
            out.local_log_capacity = capacity as usize;
        }
        Ok(out)
    }
}

fn get_millis(value: Option<&Value>) -> Result<Option<Duration>> {
    match value {
        None => Ok(None),
        Some(v) => match v.as_u64() {
            Some(ms) => Ok(Some(Duration::from_millis(ms))),
            None => bail!("expected milliseconds, got {v}"),
        },
    }
}

impl TimeoutsProvider for RouteConfig {
    fn connection_timeout(&self) -> Duration {
        self.connection_timeout
    }

    fn transition_timeout(&self) -> Duration {
        self.transition_timeout
    }

    fn retry_backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.retry_backoff.saturating_mul(1 << exponent)
    }
}
