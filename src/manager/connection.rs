//! Per-device connection snapshot and manager events.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio_tungstenite::tungstenite::Message;

use crate::identifiers::DeviceId;
use crate::transport::{TransportConfig, TransportKind, TransportState};

// ============================================================================
// DeviceConnection
// ============================================================================

/// Bookkeeping record for one registered device.
///
/// Owned by the manager and updated only from transport events; callers
/// always receive copies.
///
/// # Format
///
/// ```json
/// {
///   "deviceId": "d1",
///   "address": "ws://10.0.0.5:7497",
///   "type": "websocket",
///   "state": "connected",
///   "hasData": true,
///   "lastDataTimestamp": 1760774400000,
///   "hasConnectedBefore": true
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceConnection {
    /// Registry key.
    pub device_id: DeviceId,

    /// Address the transport connects to.
    pub address: String,

    /// Transport variant.
    #[serde(rename = "type")]
    pub kind: TransportKind,

    /// Last reported transport state.
    pub state: TransportState,

    /// `true` once any application message has arrived.
    pub has_data: bool,

    /// Arrival time of the latest application message, in Unix milliseconds.
    pub last_data_timestamp: Option<u64>,

    /// `true` once the transport has ever connected. Never reverts.
    pub has_connected_before: bool,
}

impl DeviceConnection {
    /// Creates the initial record for a newly added device.
    #[must_use]
    pub fn new(config: &TransportConfig) -> Self {
        Self {
            device_id: config.device_id.clone(),
            address: config.address.clone(),
            kind: config.kind,
            state: TransportState::Disconnected,
            has_data: false,
            last_data_timestamp: None,
            has_connected_before: false,
        }
    }

    /// Returns `true` if the device socket is open.
    #[inline]
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state.is_connected()
    }
}

// ============================================================================
// ManagerEvent
// ============================================================================

/// Notification delivered to the manager's subscriber.
#[derive(Debug, Clone)]
pub enum ManagerEvent {
    /// A device's transport changed state.
    ConnectionChanged {
        /// Device whose state changed.
        device_id: DeviceId,
        /// Snapshot after the change.
        connection: DeviceConnection,
    },

    /// Application frame from a device.
    Message {
        /// Originating device.
        device_id: DeviceId,
        /// Raw frame.
        message: Message,
    },

    /// The active device was set, replaced or cleared.
    ActiveDeviceChanged {
        /// New active device, if any.
        device_id: Option<DeviceId>,
    },
}

/// Manager event callback.
///
/// Invoked without the manager lock held, so it may call any manager method.
pub type ManagerEventHandler = Arc<dyn Fn(ManagerEvent) + Send + Sync>;

// ============================================================================
// Helpers
// ============================================================================

/// Returns the current time in Unix milliseconds.
pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

// ============================================================================
// Tests
// ============================================================================
