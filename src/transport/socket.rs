//! Connector seam and the tungstenite client.
//!
//! A [`Connector`] opens one socket for a URL. The transport never touches
//! the network directly, so tests can substitute an in-memory connector and
//! drive open, close, failure and inbound traffic deterministically.

// ============================================================================
// Imports
// ============================================================================

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::{Sink, Stream, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::debug;
use url::Url;

use crate::error::{Error, Result};

// ============================================================================
// Types
// ============================================================================

/// Outbound half of an open socket.
pub type SocketSink = Pin<Box<dyn Sink<Message, Error = WsError> + Send>>;

/// Inbound half of an open socket.
pub type SocketStream = Pin<Box<dyn Stream<Item = std::result::Result<Message, WsError>> + Send>>;

// ============================================================================
// Socket
// ============================================================================

/// An open, framed socket split into its two halves.
pub struct Socket {
    /// Outbound frames.
    pub sink: SocketSink,
    /// Inbound frames.
    pub stream: SocketStream,
}

impl Socket {
    /// Creates a socket from already-split halves.
    #[inline]
    #[must_use]
    pub fn new(sink: SocketSink, stream: SocketStream) -> Self {
        Self { sink, stream }
    }

    /// Creates a socket from a WebSocket stream.
    #[must_use]
    pub fn from_websocket<S>(ws_stream: WebSocketStream<S>) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (sink, stream) = ws_stream.split();
        Self {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        }
    }
}

impl std::fmt::Debug for Socket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Socket").finish_non_exhaustive()
    }
}

// ============================================================================
// Connector
// ============================================================================

/// Opens sockets on behalf of a transport.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Opens one socket to `url`.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidAddress`] if the URL cannot be used at all
    /// - [`Error::Connection`] for any network or handshake failure
    async fn connect(&self, url: &Url) -> Result<Socket>;
}

// ============================================================================
// TungsteniteConnector
// ============================================================================

/// Production connector backed by `tokio-tungstenite`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteConnector;

impl TungsteniteConnector {
    /// Creates a new connector.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for TungsteniteConnector {
    async fn connect(&self, url: &Url) -> Result<Socket> {
        debug!(url = %url, "Opening WebSocket");

        let (ws_stream, response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| map_connect_error(url, e))?;

        debug!(url = %url, status = %response.status(), "WebSocket handshake completed");

        Ok(Socket::from_websocket(ws_stream))
    }
}

/// Maps a handshake failure onto the crate taxonomy.
fn map_connect_error(url: &Url, err: WsError) -> Error {
    match err {
        WsError::Url(e) => Error::invalid_address(url.as_str(), e.to_string()),
        other => Error::connection(other.to_string()),
    }
}

// ============================================================================
// Tests
// ============================================================================
