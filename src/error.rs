//! Error types for device-link.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use device_link::{ConnectionManager, Result, TransportConfig};
//!
//! fn example(manager: &ConnectionManager) -> Result<()> {
//!     manager.add_device(TransportConfig::websocket("d1", "ws://10.0.0.5:7497"))?;
//!     manager.send_to_device("d1", "hello")?;
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::InvalidAddress`], [`Error::UnsupportedTransport`], [`Error::Config`] |
//! | Connection | [`Error::Connection`], [`Error::ConnectionTimeout`], [`Error::ConnectionClosed`] |
//! | Liveness | [`Error::HeartbeatTimeout`] |
//! | Usage | [`Error::SocketNotOpen`], [`Error::DeviceNotFound`] |
//! | External | [`Error::Io`], [`Error::Json`], [`Error::WebSocket`] |

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;

use crate::identifiers::DeviceId;
use crate::transport::TransportKind;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Device address is malformed.
    ///
    /// Requires correction by the user; never retried.
    #[error("Invalid device address '{address}': {reason}")]
    InvalidAddress {
        /// The address as supplied.
        address: String,
        /// Why the address was rejected.
        reason: String,
    },

    /// No transport implementation exists for the requested kind.
    #[error("Unsupported transport type: {kind}")]
    UnsupportedTransport {
        /// The requested transport kind.
        kind: TransportKind,
    },

    /// Invalid transport options.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// Socket error or failed connection attempt.
    ///
    /// Socket error events rarely carry detail; the message is best-effort.
    #[error("Connection failed: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    /// A single connection attempt did not open in time.
    #[error("Connection timeout after {timeout_ms}ms")]
    ConnectionTimeout {
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// Socket stream ended without a close frame.
    #[error("Connection closed")]
    ConnectionClosed,

    // ========================================================================
    // Liveness Errors
    // ========================================================================
    /// No traffic (including pong) arrived within the heartbeat window.
    #[error("Heartbeat timeout: no response within {timeout_ms}ms")]
    HeartbeatTimeout {
        /// Milliseconds of silence tolerated after the ping.
        timeout_ms: u64,
    },

    // ========================================================================
    // Usage Errors
    // ========================================================================
    /// Send attempted with queuing disabled while the socket is not open.
    #[error("Socket not open for device {device_id}")]
    SocketNotOpen {
        /// The device whose socket was closed.
        device_id: DeviceId,
    },

    /// No device registered under this id.
    #[error("Device not found: {device_id}")]
    DeviceNotFound {
        /// The missing device id.
        device_id: DeviceId,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket read or write failure on an open socket.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates an invalid address error.
    #[inline]
    pub fn invalid_address(address: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidAddress {
            address: address.into(),
            reason: reason.into(),
        }
    }

    /// Creates an unsupported transport error.
    #[inline]
    pub fn unsupported_transport(kind: TransportKind) -> Self {
        Self::UnsupportedTransport { kind }
    }

    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a connection error.
    #[inline]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a connection timeout error.
    #[inline]
    pub fn connection_timeout(timeout_ms: u64) -> Self {
        Self::ConnectionTimeout { timeout_ms }
    }

    /// Creates a heartbeat timeout error.
    #[inline]
    pub fn heartbeat_timeout(timeout_ms: u64) -> Self {
        Self::HeartbeatTimeout { timeout_ms }
    }

    /// Creates a socket not open error.
    #[inline]
    pub fn socket_not_open(device_id: impl Into<DeviceId>) -> Self {
        Self::SocketNotOpen {
            device_id: device_id.into(),
        }
    }

    /// Creates a device not found error.
    #[inline]
    pub fn device_not_found(device_id: impl Into<DeviceId>) -> Self {
        Self::DeviceNotFound {
            device_id: device_id.into(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::ConnectionTimeout { .. } | Self::HeartbeatTimeout { .. }
        )
    }

    /// Returns `true` if this is a connection error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. }
                | Self::ConnectionTimeout { .. }
                | Self::ConnectionClosed
                | Self::HeartbeatTimeout { .. }
                | Self::WebSocket(_)
        )
    }

    /// Returns `true` if this error is recoverable.
    ///
    /// Recoverable errors are absorbed by the reconnect policy.
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        self.is_connection_error()
    }

    /// Returns `true` if the user must correct something before retrying.
    #[inline]
    #[must_use]
    pub fn requires_user_action(&self) -> bool {
        matches!(
            self,
            Self::InvalidAddress { .. } | Self::UnsupportedTransport { .. } | Self::Config { .. }
        )
    }
}

// ============================================================================
// Tests
// ============================================================================
