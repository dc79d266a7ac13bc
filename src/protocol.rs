//! Wire-level framing shared by all transports.
//!
//! The application message schema belongs to the layer above; this module
//! only knows about the reserved liveness literals and how to tell them
//! apart from application traffic.
//!
//! # Liveness Exchange
//!
//! ```text
//! local                         device
//!   │ ── "ping" (text frame) ──►  │
//!   │ ◄── "pong" (text frame) ──  │
//! ```
//!
//! Any inbound frame counts as proof of life, not only `pong`.

// ============================================================================
// Imports
// ============================================================================

use tokio_tungstenite::tungstenite::Message;

// ============================================================================
// Constants
// ============================================================================

/// Reserved text payload sent to check a quiet connection.
pub const PING: &str = "ping";

/// Reserved text payload answering a [`PING`].
pub const PONG: &str = "pong";

// ============================================================================
// Frame
// ============================================================================

/// Classification of an inbound WebSocket message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frame {
    /// Reserved `ping` literal; must be answered with `pong`.
    Ping,
    /// Reserved `pong` literal.
    Pong,
    /// WebSocket-level control frame (ping/pong/raw), handled by the socket.
    Control,
    /// Close frame.
    Close,
    /// Application data, forwarded to subscribers.
    Data,
}

impl Frame {
    /// Classifies an inbound message.
    #[must_use]
    pub fn classify(message: &Message) -> Self {
        match message {
            Message::Text(text) if text.as_str() == PING => Self::Ping,
            Message::Text(text) if text.as_str() == PONG => Self::Pong,
            Message::Text(_) | Message::Binary(_) => Self::Data,
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => Self::Control,
            Message::Close(_) => Self::Close,
        }
    }
}

/// Builds the outbound ping frame.
#[inline]
#[must_use]
pub fn ping() -> Message {
    Message::text(PING)
}

/// Builds the outbound pong frame.
#[inline]
#[must_use]
pub fn pong() -> Message {
    Message::text(PONG)
}

// ============================================================================
// Tests
// ============================================================================
