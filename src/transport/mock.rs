//! In-memory sockets for tests.
//!
//! [`network`] returns a connector to hand to a transport and the test-side
//! [`MockNetwork`] that observes its connection attempts. Each attempt is
//! resolved explicitly, so tests decide when a socket opens or fails.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{sink, stream};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use url::Url;

use crate::error::{Error, Result};

use super::socket::{Connector, Socket, SocketSink};
use super::{TransportEvent, TransportEventHandler};

// ============================================================================
// Types
// ============================================================================

type Inbound = std::result::Result<Message, WsError>;

// ============================================================================
// Network
// ============================================================================

/// Creates a connected pair of mock connector and network.
pub(crate) fn network() -> (Arc<MockConnector>, MockNetwork) {
    let (attempts_tx, attempts_rx) = mpsc::unbounded_channel();
    (
        Arc::new(MockConnector {
            attempts: attempts_tx,
        }),
        MockNetwork {
            attempts: attempts_rx,
        },
    )
}

/// Lets spawned tasks run without moving the clock.
pub(crate) async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}

/// Connector that parks every attempt until the test resolves it.
pub(crate) struct MockConnector {
    attempts: mpsc::UnboundedSender<PendingAttempt>,
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, url: &Url) -> Result<Socket> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.attempts
            .send(PendingAttempt {
                url: url.clone(),
                reply: reply_tx,
            })
            .map_err(|_| Error::connection("mock network dropped"))?;
        reply_rx
            .await
            .map_err(|_| Error::connection("mock attempt dropped"))?
    }
}

/// Test-side view of the connection attempts.
pub(crate) struct MockNetwork {
    attempts: mpsc::UnboundedReceiver<PendingAttempt>,
}

impl MockNetwork {
    /// Returns the next attempt if one was made.
    pub(crate) fn try_next_attempt(&mut self) -> Option<PendingAttempt> {
        self.attempts.try_recv().ok()
    }

    /// Returns the number of attempts made since the last call.
    pub(crate) fn count_attempts(&mut self) -> usize {
        let mut count = 0;
        while self.attempts.try_recv().is_ok() {
            count += 1;
        }
        count
    }
}

// ============================================================================
// PendingAttempt
// ============================================================================

/// A connection attempt awaiting resolution.
pub(crate) struct PendingAttempt {
    pub(crate) url: Url,
    reply: oneshot::Sender<Result<Socket>>,
}

impl PendingAttempt {
    /// Opens the socket and returns the device side of it.
    pub(crate) fn accept(self) -> MockPeer {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<Message>();
        let sink = sink::unfold(outbound_tx, |tx, message: Message| async move {
            tx.send(message).map_err(|_| WsError::ConnectionClosed)?;
            Ok::<_, WsError>(tx)
        });
        self.open(Box::pin(sink), outbound_rx)
    }

    /// Opens a socket whose every write fails.
    pub(crate) fn accept_failing_writes(self) -> MockPeer {
        let (_, outbound_rx) = mpsc::unbounded_channel::<Message>();
        let sink = sink::unfold((), |(), _message: Message| async move {
            Err::<(), _>(WsError::ConnectionClosed)
        });
        self.open(Box::pin(sink), outbound_rx)
    }

    fn open(self, sink: SocketSink, outbound: mpsc::UnboundedReceiver<Message>) -> MockPeer {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<Inbound>();
        let stream = stream::unfold(inbound_rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });

        let _ = self.reply.send(Ok(Socket::new(sink, Box::pin(stream))));

        MockPeer {
            inbound: inbound_tx,
            outbound,
        }
    }

    /// Fails the attempt.
    pub(crate) fn reject(self, error: Error) {
        let _ = self.reply.send(Err(error));
    }

    /// Returns `true` if the transport stopped waiting for this attempt.
    pub(crate) fn is_abandoned(&self) -> bool {
        self.reply.is_closed()
    }
}

// ============================================================================
// MockPeer
// ============================================================================

/// Device side of an open mock socket.
pub(crate) struct MockPeer {
    inbound: mpsc::UnboundedSender<Inbound>,
    outbound: mpsc::UnboundedReceiver<Message>,
}

impl MockPeer {
    /// Delivers a text frame to the transport.
    pub(crate) fn send_text(&self, text: &str) {
        let _ = self.inbound.send(Ok(Message::text(text)));
    }

    /// Delivers any frame to the transport.
    pub(crate) fn send(&self, message: Message) {
        let _ = self.inbound.send(Ok(message));
    }

    /// Delivers a socket error to the transport.
    pub(crate) fn fail(&self, error: WsError) {
        let _ = self.inbound.send(Err(error));
    }

    /// Sends a close frame to the transport.
    pub(crate) fn close(&self) {
        let _ = self.inbound.send(Ok(Message::Close(None)));
    }

    /// Returns `true` once the transport has dropped its end.
    pub(crate) fn is_closed(&self) -> bool {
        self.inbound.is_closed()
    }

    /// Returns every text frame written by the transport so far.
    pub(crate) fn drain_texts(&mut self) -> Vec<String> {
        let mut texts = Vec::new();
        while let Ok(message) = self.outbound.try_recv() {
            if let Message::Text(text) = message {
                texts.push(text.as_str().to_owned());
            }
        }
        texts
    }
}

// ============================================================================
// EventLog
// ============================================================================

/// Records transport events as short strings.
///
/// | Event | Entry |
/// |-------|-------|
/// | `Open` | `open` |
/// | `Close` | `close` |
/// | `Error(e)` | `error:{e}` |
/// | `Message(m)` | `message:{text}` |
/// | `StateChange(s)` | `state:{s}` |
#[derive(Clone, Default)]
pub(crate) struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    /// Returns a handler appending to this log.
    pub(crate) fn handler(&self) -> TransportEventHandler {
        let log = self.clone();
        Arc::new(move |event| log.0.lock().push(describe(&event)))
    }

    /// Removes and returns every entry.
    pub(crate) fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.0.lock())
    }

    /// Returns how many entries start with `prefix`.
    pub(crate) fn count(&self, prefix: &str) -> usize {
        self.0
            .lock()
            .iter()
            .filter(|entry| entry.starts_with(prefix))
            .count()
    }
}

fn describe(event: &TransportEvent) -> String {
    match event {
        TransportEvent::Open => "open".to_owned(),
        TransportEvent::Close => "close".to_owned(),
        TransportEvent::Error(e) => format!("error:{e}"),
        TransportEvent::Message(m) => format!("message:{}", m.to_text().unwrap_or("<binary>")),
        TransportEvent::StateChange(s) => format!("state:{s}"),
    }
}
