//! Per-device transport layer.
//!
//! A transport owns one device's connection lifecycle: connecting,
//! detecting dead links, reconnecting and buffering outbound traffic.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────┐  Connector   ┌──────────────┐    WebSocket    ┌────────┐
//! │ WebSocketTransport│─────────────►│ Socket task  │◄───────────────►│ Device │
//! │  (state machine)  │◄─────────────│ (select! I/O)│                 └────────┘
//! └───────────────────┘   inbound    └──────────────┘
//!          │ TransportEvent
//!          ▼
//!   ConnectionManager
//! ```
//!
//! # State Machine
//!
//! | From | Trigger | To |
//! |------|---------|----|
//! | disconnected | `connect()` | connecting, or reconnecting once connected before |
//! | connecting / reconnecting | socket opens | connected |
//! | connecting / reconnecting | attempt fails | unchanged, or reconnecting once connected before |
//! | connected | close or heartbeat timeout | reconnecting |
//! | any | `disconnect()` / `destroy()` | disconnected |
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `config` | Device config and tuning options |
//! | `backoff` | Reconnection delay policy |
//! | `socket` | Connector seam and tungstenite client |
//! | `websocket` | Reconnecting WebSocket transport |

// ============================================================================
// Submodules
// ============================================================================

/// Reconnection delay policy.
pub mod backoff;

/// Device config and tuning options.
pub mod config;

/// Connector seam and tungstenite client.
pub mod socket;

/// Reconnecting WebSocket transport.
pub mod websocket;

/// In-memory sockets for tests.
#[cfg(test)]
pub(crate) mod mock;

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_tungstenite::tungstenite::Message;
use tracing::error;

use crate::error::{Error, Result};
use crate::identifiers::DeviceId;

// ============================================================================
// Re-exports
// ============================================================================

pub use backoff::ReconnectPolicy;
pub use config::{SendOptions, TransportConfig, TransportKind, TransportOptions};
pub use socket::{Connector, Socket, TungsteniteConnector};
pub use websocket::WebSocketTransport;

// ============================================================================
// TransportState
// ============================================================================

/// Connection state of a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportState {
    /// Idle; no attempt in flight and none scheduled.
    Disconnected,
    /// Connecting for the first time.
    Connecting,
    /// Socket open.
    Connected,
    /// Connecting again after having been connected before.
    Reconnecting,
}

impl TransportState {
    /// Returns `true` if the socket is open.
    #[inline]
    #[must_use]
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Returns the lowercase name of the state.
    #[inline]
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
        }
    }
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// TransportEvent
// ============================================================================

/// Notification emitted by a transport.
#[derive(Debug)]
pub enum TransportEvent {
    /// Socket opened. Always preceded by `StateChange(Connected)`.
    Open,
    /// An open socket closed.
    Close,
    /// Attempt failure, socket error or heartbeat timeout.
    Error(Error),
    /// Application frame from the device.
    Message(Message),
    /// State transition.
    StateChange(TransportState),
}

/// Transport event callback.
///
/// Invoked without any transport lock held, so it may call back into the
/// transport.
pub type TransportEventHandler = Arc<dyn Fn(TransportEvent) + Send + Sync>;

// ============================================================================
// Transport
// ============================================================================

/// Contract every transport variant satisfies.
///
/// All methods are synchronous and must be called within a tokio runtime.
pub trait Transport: Send + Sync {
    /// Returns the device this transport serves.
    fn device_id(&self) -> &DeviceId;

    /// Returns the transport variant.
    fn kind(&self) -> TransportKind;

    /// Returns the current state.
    fn state(&self) -> TransportState;

    /// Returns `true` once a socket has ever opened.
    fn has_connected_before(&self) -> bool;

    /// Returns `true` after [`Transport::destroy`].
    fn is_destroyed(&self) -> bool;

    /// Starts connecting if disconnected.
    fn connect(&self);

    /// Closes the socket and cancels all timers. Reusable afterwards.
    fn disconnect(&self);

    /// Tears the transport down permanently.
    fn destroy(&self);

    /// Reconnects quickly after the host app returns to the foreground.
    fn immediate_reconnect(&self);

    /// Stops the heartbeat cycle without closing the socket.
    fn pause_heartbeat(&self);

    /// Restarts the heartbeat cycle if connected.
    fn resume_heartbeat(&self);

    /// Sends a text frame, buffering it while disconnected if allowed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SocketNotOpen`] if the socket is closed and
    /// `options.queue` is `false`.
    fn send(&self, data: String, options: SendOptions) -> Result<()>;

    /// Replaces the event handler.
    fn set_event_handler(&self, handler: Option<TransportEventHandler>);
}

// ============================================================================
// Factory
// ============================================================================

/// Creates the transport variant selected by `config.kind`.
///
/// # Errors
///
/// - [`Error::UnsupportedTransport`] for [`TransportKind::Bluetooth`]
/// - [`Error::InvalidAddress`] if the address is malformed
/// - [`Error::Config`] if `options` are invalid
pub fn create_transport(
    config: &TransportConfig,
    options: TransportOptions,
    connector: Arc<dyn Connector>,
) -> Result<Arc<dyn Transport>> {
    match config.kind {
        TransportKind::WebSocket => {
            let transport = WebSocketTransport::with_connector(
                config.device_id.clone(),
                &config.address,
                options,
                connector,
            )?;
            Ok(Arc::new(transport))
        }
        TransportKind::Bluetooth => {
            error!(device_id = %config.device_id, "Bluetooth transport is not implemented");
            Err(Error::unsupported_transport(config.kind))
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
