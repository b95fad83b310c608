//! Session configuration.
//!
//! Every component takes an explicit configuration struct at construction.
//! The `Default` impls carry the protocol defaults; heartbeat settings of
//! workers must agree with what the broker expects.
//!
//! Durations are stored as [`Duration`] and serialized as integer
//! milliseconds, so a JSON file can override any subset of fields:
//!
//! ```
//! use majordomo::config::BrokerConfig;
//!
//! let config: BrokerConfig = serde_json::from_str(r#"{ "heartbeat_interval_ms": 1000 }"#).unwrap();
//! assert_eq!(config.heartbeat_interval.as_millis(), 1000);
//! assert_eq!(config.heartbeat_liveness, 3);
//! ```

use std::path::Path;
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Endpoint the broker binds to by default.
pub const DEFAULT_BROKER_BIND: &str = "tcp://*:5555";

/// Endpoint workers and clients connect to by default.
pub const DEFAULT_BROKER_CONNECT: &str = "tcp://127.0.0.1:5555";

/// Default heartbeat interval.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(2500);

/// Default number of missed heartbeats before a peer is considered dead.
pub const DEFAULT_HEARTBEAT_LIVENESS: usize = 3;

/// Default pause before a worker reconnects.
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_millis(2500);

/// Default time a synchronous client waits for each reply.
pub const DEFAULT_CLIENT_TIMEOUT: Duration = Duration::from_millis(2500);

/// Default number of attempts a synchronous client makes.
pub const DEFAULT_CLIENT_RETRIES: usize = 3;

/// Default time the asynchronous client waits in `recv`.
pub const DEFAULT_ASYNC_CLIENT_TIMEOUT: Duration = Duration::from_millis(5000);

/// Broker configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Interval between heartbeats sent to idle workers.
    #[serde(rename = "heartbeat_interval_ms", with = "millis")]
    pub heartbeat_interval: Duration,
    /// Heartbeat intervals a worker may stay silent before it is purged.
    pub heartbeat_liveness: usize,
}

impl BrokerConfig {
    /// Time after the last sign of life at which a worker expires.
    ///
    /// Saturates at [`Duration::MAX`] instead of overflowing.
    pub fn expiry(&self) -> Duration {
        let liveness = u32::try_from(self.heartbeat_liveness).unwrap_or(u32::MAX);
        self.heartbeat_interval
            .checked_mul(liveness)
            .unwrap_or(Duration::MAX)
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            heartbeat_liveness: DEFAULT_HEARTBEAT_LIVENESS,
        }
    }
}

/// Worker session configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Interval between heartbeats sent to the broker.
    #[serde(rename = "heartbeat_interval_ms", with = "millis")]
    pub heartbeat_interval: Duration,
    /// Silent heartbeat intervals tolerated before reconnecting.
    pub heartbeat_liveness: usize,
    /// Pause before reconnecting after the broker went silent.
    #[serde(rename = "reconnect_interval_ms", with = "millis")]
    pub reconnect_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            heartbeat_liveness: DEFAULT_HEARTBEAT_LIVENESS,
            reconnect_interval: DEFAULT_RECONNECT_INTERVAL,
        }
    }
}

/// Synchronous client session configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Time to wait for a reply on each attempt.
    #[serde(rename = "timeout_ms", with = "millis")]
    pub timeout: Duration,
    /// Number of attempts before giving up.
    pub retries: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_CLIENT_TIMEOUT,
            retries: DEFAULT_CLIENT_RETRIES,
        }
    }
}

/// Asynchronous client session configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AsyncClientConfig {
    /// Time `recv` waits for a reply.
    #[serde(rename = "timeout_ms", with = "millis")]
    pub timeout: Duration,
}

impl Default for AsyncClientConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_ASYNC_CLIENT_TIMEOUT,
        }
    }
}

/// Furthest deadline handed out when `from + after` is not representable.
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// `from + after`, clamped so that huge configured durations never panic.
pub(crate) fn deadline(from: Instant, after: Duration) -> Instant {
    from.checked_add(after)
        .or_else(|| from.checked_add(FAR_FUTURE))
        .unwrap_or(from)
}

/// Load any configuration struct from a JSON file.
///
/// Missing fields fall back to their defaults.
pub fn from_json_file<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let text = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
