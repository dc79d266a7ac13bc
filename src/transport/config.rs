//! Transport configuration and tuning options.
//!
//! [`TransportConfig`] identifies *which* device to talk to and is usually
//! produced by discovery. [`TransportOptions`] controls *how* the transport
//! behaves: heartbeat timing, reconnection policy and outbound queuing.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use device_link::{ReconnectPolicy, TransportConfig, TransportOptions};
//!
//! let config = TransportConfig::websocket("d1", "ws://10.0.0.5:7497");
//!
//! let options = TransportOptions::new()
//!     .with_ping_interval(Duration::from_secs(15))
//!     .with_reconnect(ReconnectPolicy::fixed(Duration::from_secs(2)))
//!     .with_queue_capacity(50);
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::identifiers::DeviceId;

use super::backoff::ReconnectPolicy;

// ============================================================================
// Constants
// ============================================================================

/// Default idle time before a ping is sent.
const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(20);

/// Default time to wait for any traffic after a ping.
const DEFAULT_PONG_TIMEOUT: Duration = Duration::from_secs(10);

/// Default bound on a single connection attempt.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default settle delay before reconnecting on foreground resume.
const DEFAULT_IMMEDIATE_RECONNECT_DELAY: Duration = Duration::from_millis(500);

/// Default outbound queue capacity.
const DEFAULT_QUEUE_CAPACITY: usize = 100;

// ============================================================================
// TransportKind
// ============================================================================

/// Transport variant used to reach a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// WebSocket over the local network.
    #[serde(rename = "websocket")]
    WebSocket,
    /// Bluetooth (interface reserved, no implementation yet).
    Bluetooth,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WebSocket => f.write_str("websocket"),
            Self::Bluetooth => f.write_str("bluetooth"),
        }
    }
}

// ============================================================================
// TransportConfig
// ============================================================================

/// Identifies one device and how to reach it.
///
/// # Format
///
/// ```json
/// { "deviceId": "d1", "type": "websocket", "address": "ws://10.0.0.5:7497" }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportConfig {
    /// Unique registry key.
    pub device_id: DeviceId,

    /// Transport variant.
    #[serde(rename = "type")]
    pub kind: TransportKind,

    /// Device address; a `ws://` or `wss://` URL for WebSocket transports.
    pub address: String,
}

impl TransportConfig {
    /// Creates a WebSocket device config.
    #[inline]
    #[must_use]
    pub fn websocket(device_id: impl Into<DeviceId>, address: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            kind: TransportKind::WebSocket,
            address: address.into(),
        }
    }

    /// Creates a Bluetooth device config.
    #[inline]
    #[must_use]
    pub fn bluetooth(device_id: impl Into<DeviceId>, address: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            kind: TransportKind::Bluetooth,
            address: address.into(),
        }
    }

    /// Parses a config from its JSON form.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if the document is malformed.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

// ============================================================================
// SendOptions
// ============================================================================

/// Per-message send behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendOptions {
    /// Buffer the message if the socket is not open.
    pub queue: bool,
}

impl SendOptions {
    /// Buffer while disconnected.
    #[inline]
    #[must_use]
    pub const fn queued() -> Self {
        Self { queue: true }
    }

    /// Fail immediately while disconnected.
    #[inline]
    #[must_use]
    pub const fn immediate() -> Self {
        Self { queue: false }
    }
}

impl Default for SendOptions {
    fn default() -> Self {
        Self::queued()
    }
}

// ============================================================================
// TransportOptions
// ============================================================================

/// Tuning shared by every transport a manager creates.
///
/// Durations serialize as integer milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TransportOptions {
    /// Idle time with no inbound traffic before a ping is sent.
    #[serde(rename = "pingIntervalMs", with = "duration_ms")]
    pub ping_interval: Duration,

    /// Time after the ping deadline before the connection is declared dead.
    #[serde(rename = "pongTimeoutMs", with = "duration_ms")]
    pub pong_timeout: Duration,

    /// Upper bound on a single connection attempt.
    #[serde(rename = "connectTimeoutMs", with = "duration_ms")]
    pub connect_timeout: Duration,

    /// Settle delay used by `immediate_reconnect`.
    #[serde(rename = "immediateReconnectDelayMs", with = "duration_ms")]
    pub immediate_reconnect_delay: Duration,

    /// Delay policy between reconnection attempts.
    pub reconnect: ReconnectPolicy,

    /// Default for [`SendOptions::queue`] when sending without options.
    pub queue_messages: bool,

    /// Maximum buffered messages; the oldest is dropped on overflow.
    pub queue_capacity: usize,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl TransportOptions {
    /// Creates options with default settings.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            ping_interval: DEFAULT_PING_INTERVAL,
            pong_timeout: DEFAULT_PONG_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            immediate_reconnect_delay: DEFAULT_IMMEDIATE_RECONNECT_DELAY,
            reconnect: ReconnectPolicy::default(),
            queue_messages: true,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }

    /// Checks that every setting is usable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first invalid setting.
    pub fn validate(&self) -> Result<()> {
        if self.ping_interval.is_zero() {
            return Err(Error::config("pingIntervalMs must be greater than zero"));
        }
        if self.pong_timeout.is_zero() {
            return Err(Error::config("pongTimeoutMs must be greater than zero"));
        }
        if self.connect_timeout.is_zero() {
            return Err(Error::config("connectTimeoutMs must be greater than zero"));
        }
        if self.queue_messages && self.queue_capacity == 0 {
            return Err(Error::config(
                "queueCapacity must be greater than zero when queueMessages is enabled",
            ));
        }
        self.reconnect.validate()
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl TransportOptions {
    /// Sets the idle time before a ping.
    #[inline]
    #[must_use]
    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    /// Sets the pong timeout.
    #[inline]
    #[must_use]
    pub fn with_pong_timeout(mut self, timeout: Duration) -> Self {
        self.pong_timeout = timeout;
        self
    }

    /// Sets the connection attempt timeout.
    #[inline]
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the foreground-resume settle delay.
    #[inline]
    #[must_use]
    pub fn with_immediate_reconnect_delay(mut self, delay: Duration) -> Self {
        self.immediate_reconnect_delay = delay;
        self
    }

    /// Sets the reconnection policy.
    #[inline]
    #[must_use]
    pub fn with_reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    /// Enables or disables default queuing.
    #[inline]
    #[must_use]
    pub fn with_queue_messages(mut self, queue: bool) -> Self {
        self.queue_messages = queue;
        self
    }

    /// Sets the queue capacity.
    #[inline]
    #[must_use]
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }
}

// ============================================================================
// Serde Helpers
// ============================================================================

/// (De)serializes a [`Duration`] as integer milliseconds.
pub(crate) mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub(crate) fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }

    pub(crate) fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

// ============================================================================
// Tests
// ============================================================================
