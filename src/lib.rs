//! Device Link - reconnecting device transports with multi-device orchestration.
//!
//! This library keeps an app connected to nearby devices over WebSocket. It
//! detects dead links, reconnects with backoff, buffers outbound messages
//! while a device is unreachable and coordinates any number of devices.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │                  ConnectionManager                     │
//! │  DeviceId=d1 → WebSocketTransport → ws://10.0.0.5:7497 │
//! │  DeviceId=d2 → WebSocketTransport → ws://10.0.0.6:7497 │
//! │  active = d1                                           │
//! └────────────────────────────────────────────────────────┘
//!           │ ManagerEvent
//!           ▼
//!       UI layer
//! ```
//!
//! Key design principles:
//!
//! - Each [`WebSocketTransport`] owns one device's socket and timers
//! - Transient failures never surface as fatal; only `destroy()` ends a transport
//! - A ping/pong heartbeat tells a silently-dead link from an idle one
//! - Callbacks run outside every lock and may call back in
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use device_link::{ConnectionManager, ManagerEvent, Result, TransportConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let manager = ConnectionManager::builder()
//!         .event_handler(Arc::new(|event| match event {
//!             ManagerEvent::ConnectionChanged { device_id, connection } => {
//!                 println!("{device_id} is {}", connection.state);
//!             }
//!             ManagerEvent::Message { device_id, message } => {
//!                 println!("{device_id}: {message}");
//!             }
//!             ManagerEvent::ActiveDeviceChanged { .. } => {}
//!         }))
//!         .build()?;
//!
//!     manager.add_device(TransportConfig::websocket("d1", "ws://10.0.0.5:7497"))?;
//!     manager.set_active_device(Some("d1"));
//!     manager.send_to_active("{\"cmd\":\"status\"}")?;
//!
//!     tokio::signal::ctrl_c().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`manager`] | [`ConnectionManager`] and its events |
//! | [`transport`] | [`Transport`] trait and [`WebSocketTransport`] |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`protocol`] | Reserved liveness frames |

// ============================================================================
// Modules
// ============================================================================

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe identifiers.
pub mod identifiers;

/// Multi-device connection manager.
///
/// Use [`ConnectionManager::builder()`] to create a configured manager.
pub mod manager;

/// Reserved ping/pong frames.
pub mod protocol;

/// Per-device transports.
///
/// - [`Transport`] - Contract shared by every transport variant
/// - [`WebSocketTransport`] - Reconnecting WebSocket transport
/// - [`Connector`] - Seam for opening sockets
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::DeviceId;

// Manager types
pub use manager::{
    ConnectionManager, DeviceConnection, ManagerBuilder, ManagerEvent, ManagerEventHandler,
};

// Transport types
pub use transport::{
    Connector, ReconnectPolicy, SendOptions, Socket, Transport, TransportConfig, TransportEvent,
    TransportEventHandler, TransportKind, TransportOptions, TransportState, TungsteniteConnector,
    WebSocketTransport, create_transport,
};

// Message frame type carried by events
pub use tokio_tungstenite::tungstenite::Message;
