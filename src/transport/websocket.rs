//! Reconnecting WebSocket transport.
//!
//! [`WebSocketTransport`] keeps one device connected: it bounds each
//! connection attempt, detects silently-dead sockets through a ping/pong
//! heartbeat, reconnects with backoff and buffers outbound messages while
//! the socket is down.
//!
//! # Tasks
//!
//! All state sits behind one mutex. Background work runs as tokio tasks that
//! hold only a `Weak` reference and carry a numeric id:
//!
//! | Slot | Task |
//! |------|------|
//! | `attempt` | One connection attempt bounded by `connect_timeout` |
//! | `socket` | Socket I/O loop |
//! | `heartbeat` | Ping/pong liveness cycle |
//! | `reconnect` | Backoff timer |
//! | `immediate` | Foreground-resume timer |
//!
//! A task that fires checks its id against the slot before acting, so a
//! stale callback never touches a reset or destroyed transport.
//!
//! # Events
//!
//! Events are collected while the lock is held and dispatched after it is
//! released; handlers may call back into the transport.

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendError;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep, sleep_until, timeout};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, trace, warn};
use url::Url;

use crate::error::{Error, Result};
use crate::identifiers::DeviceId;
use crate::protocol::{self, Frame};

use super::config::{SendOptions, TransportKind, TransportOptions};
use super::socket::{Connector, Socket, TungsteniteConnector};
use super::{Transport, TransportEvent, TransportEventHandler, TransportState};

// ============================================================================
// Constants
// ============================================================================

/// Upper bound on a graceful close handshake.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

// ============================================================================
// Internal Types
// ============================================================================

/// A spawned background task tagged with its slot id.
struct TaskHandle {
    id: u64,
    handle: JoinHandle<()>,
}

impl TaskHandle {
    fn cancel(self) {
        self.handle.abort();
    }
}

/// Writer side of an open socket.
///
/// Dropping it ends the socket task, which closes the socket gracefully.
struct OpenSocket {
    id: u64,
    outbound: mpsc::UnboundedSender<Outbound>,
}

impl OpenSocket {
    /// Hands application text to the socket task.
    ///
    /// Returns the text if the task has already stopped.
    fn write(&self, data: String) -> std::result::Result<(), String> {
        match self.outbound.send(Outbound::Data(data)) {
            Ok(()) => Ok(()),
            Err(SendError(Outbound::Data(data))) => Err(data),
            Err(SendError(Outbound::Liveness(_))) => Ok(()),
        }
    }

    fn write_liveness(&self, message: Message) {
        let _ = self.outbound.send(Outbound::Liveness(message));
    }
}

/// Frame handed to the socket task.
enum Outbound {
    /// Application text. Returned to the queue if never written.
    Data(String),
    /// Reserved ping or pong. Dropped with the socket.
    Liveness(Message),
}

/// Next action of the heartbeat task.
enum HeartbeatStep {
    Sleep(Instant),
    Stop,
}

/// Mutable transport state.
struct Inner {
    connector: Arc<dyn Connector>,
    options: TransportOptions,
    state: TransportState,
    has_connected_before: bool,
    destroyed: bool,
    /// Reconnect attempts since the last successful open.
    attempts: u32,
    queue: VecDeque<String>,
    last_activity: Instant,
    awaiting_pong: bool,
    heartbeat_paused: bool,
    next_task_id: u64,
    attempt: Option<TaskHandle>,
    heartbeat: Option<TaskHandle>,
    reconnect: Option<TaskHandle>,
    immediate: Option<TaskHandle>,
    socket: Option<OpenSocket>,
    handler: Option<TransportEventHandler>,
    /// Events awaiting dispatch after the lock is released.
    pending: Vec<TransportEvent>,
}

impl Inner {
    fn next_task_id(&mut self) -> u64 {
        self.next_task_id += 1;
        self.next_task_id
    }

    fn emit(&mut self, event: TransportEvent) {
        self.pending.push(event);
    }

    fn set_state(&mut self, state: TransportState) {
        if self.state != state {
            self.state = state;
            self.emit(TransportEvent::StateChange(state));
        }
    }

    /// State entered when an attempt starts from idle.
    fn connecting_state(&self) -> TransportState {
        if self.has_connected_before {
            TransportState::Reconnecting
        } else {
            TransportState::Connecting
        }
    }

    fn cancel_heartbeat(&mut self) {
        if let Some(task) = self.heartbeat.take() {
            task.cancel();
        }
        self.awaiting_pong = false;
    }

    fn cancel_reconnect_timers(&mut self) {
        if let Some(task) = self.reconnect.take() {
            task.cancel();
        }
        if let Some(task) = self.immediate.take() {
            task.cancel();
        }
    }

    fn cancel_all(&mut self) {
        if let Some(task) = self.attempt.take() {
            task.cancel();
        }
        self.cancel_heartbeat();
        self.cancel_reconnect_timers();
    }

    /// Drops the socket writer. Returns `true` if a socket was open.
    fn close_socket(&mut self) -> bool {
        self.socket.take().is_some()
    }

    fn is_current(slot: &Option<TaskHandle>, id: u64) -> bool {
        slot.as_ref().is_some_and(|task| task.id == id)
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

// ============================================================================
// Shared
// ============================================================================

/// State shared between the handle and its background tasks.
struct Shared {
    device_id: DeviceId,
    url: Url,
    me: Weak<Shared>,
    inner: Mutex<Inner>,
}

impl Shared {
    /// Runs `f` under the lock, then dispatches the events it produced.
    fn update<R>(&self, f: impl FnOnce(&mut Inner) -> R) -> R {
        let (result, events, handler) = {
            let mut inner = self.inner.lock();
            let result = f(&mut inner);
            let events = std::mem::take(&mut inner.pending);
            (result, events, inner.handler.clone())
        };

        if let Some(handler) = handler {
            for event in events {
                handler(event);
            }
        }

        result
    }

    // ========================================================================
    // Connection Attempts
    // ========================================================================

    fn start_attempt(&self, inner: &mut Inner) {
        let id = inner.next_task_id();
        let me = self.me.clone();
        let connector = Arc::clone(&inner.connector);
        let url = self.url.clone();
        let limit = inner.options.connect_timeout;

        debug!(device_id = %self.device_id, url = %self.url, "Starting connection attempt");

        let handle = tokio::spawn(async move {
            let outcome = match timeout(limit, connector.connect(&url)).await {
                Ok(result) => result,
                Err(_) => Err(Error::connection_timeout(millis(limit))),
            };
            if let Some(shared) = me.upgrade() {
                shared.finish_attempt(id, outcome);
            }
        });

        inner.attempt = Some(TaskHandle { id, handle });
    }

    fn finish_attempt(&self, id: u64, outcome: Result<Socket>) {
        self.update(|inner| {
            if !Inner::is_current(&inner.attempt, id) {
                trace!(device_id = %self.device_id, "Ignoring stale connection attempt");
                return;
            }
            inner.attempt = None;

            match outcome {
                Ok(socket) => self.on_open(inner, socket),
                Err(e) => self.on_attempt_failed(inner, e),
            }
        });
    }

    fn on_open(&self, inner: &mut Inner, socket: Socket) {
        let id = inner.next_task_id();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_socket(self.me.clone(), id, socket, outbound_rx));

        inner.socket = Some(OpenSocket {
            id,
            outbound: outbound_tx,
        });
        inner.cancel_reconnect_timers();
        inner.attempts = 0;
        inner.has_connected_before = true;

        info!(device_id = %self.device_id, url = %self.url, "Device connected");

        inner.set_state(TransportState::Connected);
        inner.emit(TransportEvent::Open);

        if inner.heartbeat_paused {
            debug!(device_id = %self.device_id, "Heartbeat paused, not starting");
        } else {
            self.start_heartbeat(inner);
        }

        self.flush_queue(inner);
    }

    fn on_attempt_failed(&self, inner: &mut Inner, err: Error) {
        if matches!(err, Error::InvalidAddress { .. }) {
            error!(device_id = %self.device_id, error = %err, "Device address rejected");
            inner.emit(TransportEvent::Error(err));
            inner.attempts = 0;
            inner.set_state(TransportState::Disconnected);
            return;
        }

        warn!(
            device_id = %self.device_id,
            error = %err,
            attempts = inner.attempts,
            "Connection attempt failed"
        );

        inner.emit(TransportEvent::Error(err));
        if inner.has_connected_before {
            inner.set_state(TransportState::Reconnecting);
        }
        self.schedule_reconnect(inner);
    }

    // ========================================================================
    // Reconnection
    // ========================================================================

    /// Schedules the next attempt. No-op while one is already scheduled.
    fn schedule_reconnect(&self, inner: &mut Inner) {
        if inner.destroyed || inner.reconnect.is_some() {
            return;
        }

        inner.attempts = inner.attempts.saturating_add(1);
        let delay = inner.options.reconnect.next_delay(inner.attempts);
        let id = inner.next_task_id();
        let me = self.me.clone();

        info!(
            device_id = %self.device_id,
            attempt = inner.attempts,
            delay_ms = millis(delay),
            "Scheduling reconnect"
        );

        let handle = tokio::spawn(async move {
            sleep(delay).await;
            if let Some(shared) = me.upgrade() {
                shared.fire_reconnect(id);
            }
        });

        inner.reconnect = Some(TaskHandle { id, handle });
    }

    fn fire_reconnect(&self, id: u64) {
        self.update(|inner| {
            if !Inner::is_current(&inner.reconnect, id) {
                return;
            }
            inner.reconnect = None;
            self.reconnect_now(inner);
        });
    }

    fn fire_immediate(&self, id: u64) {
        self.update(|inner| {
            if !Inner::is_current(&inner.immediate, id) {
                return;
            }
            inner.immediate = None;
            self.reconnect_now(inner);
        });
    }

    fn reconnect_now(&self, inner: &mut Inner) {
        if inner.destroyed || inner.state == TransportState::Connected || inner.attempt.is_some() {
            return;
        }
        if inner.state == TransportState::Disconnected {
            let state = inner.connecting_state();
            inner.set_state(state);
        }
        self.start_attempt(inner);
    }

    /// Tears down an open connection and starts reconnecting.
    fn connection_lost(&self, inner: &mut Inner, err: Option<Error>) {
        inner.close_socket();
        inner.cancel_heartbeat();

        if let Some(err) = err {
            warn!(device_id = %self.device_id, error = %err, "Connection lost");
            inner.emit(TransportEvent::Error(err));
        } else {
            info!(device_id = %self.device_id, "Connection closed by device");
        }

        inner.emit(TransportEvent::Close);
        inner.set_state(TransportState::Reconnecting);
        self.schedule_reconnect(inner);
    }

    // ========================================================================
    // Heartbeat
    // ========================================================================

    fn start_heartbeat(&self, inner: &mut Inner) {
        inner.cancel_heartbeat();

        let now = Instant::now();
        inner.last_activity = now;

        let id = inner.next_task_id();
        let first_wake = now + inner.options.ping_interval;
        let handle = tokio::spawn(run_heartbeat(self.me.clone(), id, first_wake));
        inner.heartbeat = Some(TaskHandle { id, handle });

        trace!(device_id = %self.device_id, "Heartbeat started");
    }

    fn heartbeat_tick(&self, id: u64) -> HeartbeatStep {
        self.update(|inner| {
            if !Inner::is_current(&inner.heartbeat, id) {
                return HeartbeatStep::Stop;
            }

            let now = Instant::now();
            let ping_due = inner.last_activity + inner.options.ping_interval;
            let dead_at = ping_due + inner.options.pong_timeout;

            if inner.awaiting_pong {
                if now < dead_at {
                    return HeartbeatStep::Sleep(dead_at);
                }
                inner.heartbeat = None;
                let timeout_ms = millis(inner.options.pong_timeout);
                self.connection_lost(inner, Some(Error::heartbeat_timeout(timeout_ms)));
                return HeartbeatStep::Stop;
            }

            if now < ping_due {
                return HeartbeatStep::Sleep(ping_due);
            }

            trace!(device_id = %self.device_id, "Sending ping");
            if let Some(socket) = &inner.socket {
                socket.write_liveness(protocol::ping());
            }
            inner.awaiting_pong = true;
            HeartbeatStep::Sleep(dead_at)
        })
    }

    // ========================================================================
    // Socket I/O
    // ========================================================================

    fn handle_inbound(&self, id: u64, message: Message) {
        self.update(|inner| {
            let outbound = match inner.socket.as_ref() {
                Some(socket) if socket.id == id => socket.outbound.clone(),
                _ => return,
            };

            match Frame::classify(&message) {
                Frame::Ping => {
                    trace!(device_id = %self.device_id, "Answering ping");
                    let _ = outbound.send(Outbound::Liveness(protocol::pong()));
                }
                Frame::Pong | Frame::Control | Frame::Close => {
                    trace!(device_id = %self.device_id, "Liveness frame received");
                }
                Frame::Data => inner.emit(TransportEvent::Message(message)),
            }

            inner.last_activity = Instant::now();
            inner.awaiting_pong = false;
        });
    }

    fn handle_socket_closed(&self, id: u64, err: Option<Error>, unsent: Vec<String>) {
        self.update(|inner| {
            self.requeue_unsent(inner, unsent);
            if !inner.socket.as_ref().is_some_and(|socket| socket.id == id) {
                return;
            }
            self.connection_lost(inner, err);
        });
    }

    /// Puts messages the socket never wrote back at the front of the queue.
    fn requeue_unsent(&self, inner: &mut Inner, unsent: Vec<String>) {
        if unsent.is_empty() || inner.destroyed {
            return;
        }

        let count = unsent.len();
        for data in unsent.into_iter().rev() {
            inner.queue.push_front(data);
        }

        let capacity = inner.options.queue_capacity;
        let mut dropped = 0;
        while inner.queue.len() > capacity {
            inner.queue.pop_front();
            dropped += 1;
        }

        warn!(
            device_id = %self.device_id,
            count,
            dropped,
            "Requeued messages the socket did not write"
        );
    }

    /// Writes queued messages in FIFO order.
    ///
    /// A message the socket refuses goes back to the front of the queue.
    fn flush_queue(&self, inner: &mut Inner) {
        let Some(socket) = inner.socket.as_ref() else {
            return;
        };
        if inner.queue.is_empty() {
            return;
        }

        let total = inner.queue.len();
        while let Some(data) = inner.queue.pop_front() {
            if let Err(data) = socket.write(data) {
                inner.queue.push_front(data);
                warn!(
                    device_id = %self.device_id,
                    remaining = inner.queue.len(),
                    "Socket closed while flushing queue"
                );
                return;
            }
        }

        debug!(device_id = %self.device_id, count = total, "Flushed queued messages");
    }

    fn send(&self, inner: &mut Inner, data: String, options: SendOptions) -> Result<()> {
        let data = match inner.socket.as_ref() {
            Some(socket) => match socket.write(data) {
                Ok(()) => return Ok(()),
                Err(data) => data,
            },
            None => data,
        };

        let capacity = inner.options.queue_capacity;
        if inner.destroyed || !options.queue || capacity == 0 {
            return Err(Error::socket_not_open(&self.device_id));
        }

        if inner.queue.len() >= capacity {
            inner.queue.pop_front();
            warn!(
                device_id = %self.device_id,
                capacity,
                "Outbound queue full, dropped oldest message"
            );
        }
        inner.queue.push_back(data);

        debug!(device_id = %self.device_id, queued = inner.queue.len(), "Message queued");
        Ok(())
    }
}

// ============================================================================
// Background Tasks
// ============================================================================

/// Socket I/O loop: forwards inbound frames and writes outbound text.
///
/// Ends when the writer is dropped, the device closes, or the socket fails.
/// Application text still waiting in the channel, and the frame whose write
/// failed, are handed back to the transport.
async fn run_socket(
    me: Weak<Shared>,
    id: u64,
    socket: Socket,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
) {
    let Socket {
        mut sink,
        mut stream,
    } = socket;
    let mut unsent = Vec::new();

    let failure = loop {
        tokio::select! {
            inbound = stream.next() => {
                match inbound {
                    Some(Ok(Message::Close(frame))) => {
                        debug!(?frame, "WebSocket closed by device");
                        break None;
                    }

                    Some(Ok(message)) => {
                        let Some(shared) = me.upgrade() else {
                            break None;
                        };
                        shared.handle_inbound(id, message);
                    }

                    Some(Err(e)) => {
                        break Some(Error::WebSocket(e));
                    }

                    None => {
                        debug!("WebSocket stream ended without close frame");
                        break Some(Error::ConnectionClosed);
                    }
                }
            }

            frame = outbound.recv() => {
                let (message, data) = match frame {
                    Some(Outbound::Data(data)) => (Message::text(data.clone()), Some(data)),
                    Some(Outbound::Liveness(message)) => (message, None),
                    None => {
                        trace!("Socket writer dropped, closing");
                        let _ = timeout(CLOSE_TIMEOUT, sink.close()).await;
                        return;
                    }
                };

                if let Err(e) = sink.send(message).await {
                    unsent.extend(data);
                    break Some(Error::WebSocket(e));
                }
            }
        }
    };

    outbound.close();
    while let Ok(frame) = outbound.try_recv() {
        if let Outbound::Data(data) = frame {
            unsent.push(data);
        }
    }

    let _ = timeout(CLOSE_TIMEOUT, sink.close()).await;

    if let Some(shared) = me.upgrade() {
        shared.handle_socket_closed(id, failure, unsent);
    }
}

/// Heartbeat loop: sleeps until the next deadline, then re-evaluates.
async fn run_heartbeat(me: Weak<Shared>, id: u64, mut wake: Instant) {
    loop {
        sleep_until(wake).await;

        let Some(shared) = me.upgrade() else {
            return;
        };
        match shared.heartbeat_tick(id) {
            HeartbeatStep::Sleep(next) => wake = next,
            HeartbeatStep::Stop => return,
        }
    }
}

// ============================================================================
// WebSocketTransport
// ============================================================================

/// Reconnecting WebSocket connection to one device.
///
/// Cloning yields another handle to the same transport.
///
/// # Example
///
/// ```ignore
/// use std::sync::Arc;
/// use device_link::{TransportEvent, WebSocketTransport};
///
/// let transport = WebSocketTransport::new("d1", "ws://10.0.0.5:7497")?;
/// transport.set_event_handler(Arc::new(|event| {
///     if let TransportEvent::Message(message) = event {
///         println!("{message}");
///     }
/// }));
/// transport.connect();
/// transport.send("{\"cmd\":\"status\"}")?;
/// ```
#[derive(Clone)]
pub struct WebSocketTransport {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for WebSocketTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketTransport")
            .field("device_id", &self.shared.device_id)
            .field("url", &self.shared.url.as_str())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl WebSocketTransport {
    /// Creates a transport with default options and the tungstenite client.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidAddress`] if `address` is not a `ws://` or
    /// `wss://` URL with a host.
    pub fn new(device_id: impl Into<DeviceId>, address: &str) -> Result<Self> {
        Self::with_options(device_id, address, TransportOptions::default())
    }

    /// Creates a transport with custom options.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidAddress`] if `address` is malformed
    /// - [`Error::Config`] if `options` are invalid
    pub fn with_options(
        device_id: impl Into<DeviceId>,
        address: &str,
        options: TransportOptions,
    ) -> Result<Self> {
        Self::with_connector(
            device_id,
            address,
            options,
            Arc::new(TungsteniteConnector::new()),
        )
    }

    /// Creates a transport that opens sockets through `connector`.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidAddress`] if `address` is malformed
    /// - [`Error::Config`] if `options` are invalid
    pub fn with_connector(
        device_id: impl Into<DeviceId>,
        address: &str,
        options: TransportOptions,
        connector: Arc<dyn Connector>,
    ) -> Result<Self> {
        let device_id = device_id.into();
        let url = parse_address(address).inspect_err(|e| {
            error!(device_id = %device_id, error = %e, "Invalid device address");
        })?;
        options.validate()?;

        let shared = Arc::new_cyclic(|me| Shared {
            device_id,
            url,
            me: me.clone(),
            inner: Mutex::new(Inner {
                connector,
                options,
                state: TransportState::Disconnected,
                has_connected_before: false,
                destroyed: false,
                attempts: 0,
                queue: VecDeque::new(),
                last_activity: Instant::now(),
                awaiting_pong: false,
                heartbeat_paused: false,
                next_task_id: 0,
                attempt: None,
                heartbeat: None,
                reconnect: None,
                immediate: None,
                socket: None,
                handler: None,
                pending: Vec::new(),
            }),
        });

        Ok(Self { shared })
    }
}

// ============================================================================
// WebSocketTransport - Accessors
// ============================================================================

impl WebSocketTransport {
    /// Returns the device id.
    #[inline]
    #[must_use]
    pub fn device_id(&self) -> &DeviceId {
        &self.shared.device_id
    }

    /// Returns the parsed device URL.
    #[inline]
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.shared.url
    }

    /// Returns the current state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> TransportState {
        self.shared.inner.lock().state
    }

    /// Returns `true` once a socket has ever opened.
    #[inline]
    #[must_use]
    pub fn has_connected_before(&self) -> bool {
        self.shared.inner.lock().has_connected_before
    }

    /// Returns `true` after [`destroy`](Self::destroy).
    #[inline]
    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.shared.inner.lock().destroyed
    }

    /// Returns the number of buffered outbound messages.
    #[inline]
    #[must_use]
    pub fn queued_len(&self) -> usize {
        self.shared.inner.lock().queue.len()
    }

    /// Returns reconnect attempts since the last successful open.
    #[inline]
    #[must_use]
    pub fn reconnect_attempts(&self) -> u32 {
        self.shared.inner.lock().attempts
    }

    /// Returns `true` if a backoff timer is pending.
    #[inline]
    #[must_use]
    pub fn is_reconnect_scheduled(&self) -> bool {
        self.shared.inner.lock().reconnect.is_some()
    }

    /// Returns `true` if the heartbeat cycle is running.
    #[inline]
    #[must_use]
    pub fn is_heartbeat_active(&self) -> bool {
        self.shared.inner.lock().heartbeat.is_some()
    }

    /// Returns the options this transport was created with.
    #[must_use]
    pub fn options(&self) -> TransportOptions {
        self.shared.inner.lock().options.clone()
    }
}

// ============================================================================
// WebSocketTransport - Lifecycle
// ============================================================================

impl WebSocketTransport {
    /// Starts connecting.
    ///
    /// No-op unless disconnected, and after [`destroy`](Self::destroy).
    pub fn connect(&self) {
        let shared = &self.shared;
        shared.update(|inner| {
            if inner.destroyed {
                debug!(device_id = %shared.device_id, "Connect ignored, transport destroyed");
                return;
            }
            if inner.state != TransportState::Disconnected {
                debug!(
                    device_id = %shared.device_id,
                    state = %inner.state,
                    "Connect ignored, already active"
                );
                return;
            }

            let state = inner.connecting_state();
            inner.set_state(state);
            shared.start_attempt(inner);
        });
    }

    /// Closes the socket and cancels every timer.
    ///
    /// The transport stays usable and keeps its queue.
    pub fn disconnect(&self) {
        let shared = &self.shared;
        shared.update(|inner| {
            if inner.destroyed {
                return;
            }

            inner.cancel_all();
            inner.attempts = 0;
            if inner.close_socket() {
                inner.emit(TransportEvent::Close);
            }
            inner.set_state(TransportState::Disconnected);

            info!(device_id = %shared.device_id, "Device disconnected");
        });
    }

    /// Tears the transport down permanently.
    ///
    /// The handler is detached first, so nothing is emitted. Later calls to
    /// [`connect`](Self::connect) and
    /// [`immediate_reconnect`](Self::immediate_reconnect) do nothing.
    pub fn destroy(&self) {
        let shared = &self.shared;
        shared.update(|inner| {
            if inner.destroyed {
                return;
            }

            inner.destroyed = true;
            inner.handler = None;
            inner.cancel_all();
            inner.close_socket();
            inner.queue.clear();
            inner.attempts = 0;
            inner.set_state(TransportState::Disconnected);
            inner.pending.clear();

            info!(device_id = %shared.device_id, "Transport destroyed");
        });
    }

    /// Reconnects quickly after the host app returns to the foreground.
    ///
    /// Always clears the paused heartbeat flag. When connected, only the
    /// heartbeat restarts. Otherwise pending timers are dropped, the attempt
    /// count resets and one attempt is made after
    /// `immediate_reconnect_delay`.
    pub fn immediate_reconnect(&self) {
        let shared = &self.shared;
        shared.update(|inner| {
            if inner.destroyed {
                return;
            }

            inner.heartbeat_paused = false;

            if inner.state == TransportState::Connected {
                shared.start_heartbeat(inner);
                return;
            }

            inner.cancel_reconnect_timers();
            inner.attempts = 0;

            let delay = inner.options.immediate_reconnect_delay;
            let id = inner.next_task_id();
            let me = shared.me.clone();

            debug!(
                device_id = %shared.device_id,
                delay_ms = millis(delay),
                "Scheduling immediate reconnect"
            );

            let handle = tokio::spawn(async move {
                sleep(delay).await;
                if let Some(shared) = me.upgrade() {
                    shared.fire_immediate(id);
                }
            });
            inner.immediate = Some(TaskHandle { id, handle });
        });
    }

    /// Stops the heartbeat cycle without closing the socket.
    pub fn pause_heartbeat(&self) {
        let shared = &self.shared;
        shared.update(|inner| {
            inner.heartbeat_paused = true;
            inner.cancel_heartbeat();
            debug!(device_id = %shared.device_id, "Heartbeat paused");
        });
    }

    /// Restarts the heartbeat cycle if connected.
    pub fn resume_heartbeat(&self) {
        let shared = &self.shared;
        shared.update(|inner| {
            inner.heartbeat_paused = false;
            if inner.state == TransportState::Connected && !inner.destroyed {
                shared.start_heartbeat(inner);
            }
        });
    }
}

// ============================================================================
// WebSocketTransport - Messaging
// ============================================================================

impl WebSocketTransport {
    /// Sends a text frame using the default queuing option.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SocketNotOpen`] if the socket is closed and queuing
    /// is disabled.
    pub fn send(&self, data: impl Into<String>) -> Result<()> {
        let queue = self.shared.inner.lock().options.queue_messages;
        self.send_with_options(data, SendOptions { queue })
    }

    /// Sends a text frame.
    ///
    /// Buffers the frame while the socket is down if `options.queue` is set.
    /// When the buffer is full the oldest frame is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SocketNotOpen`] if the socket is closed and
    /// `options.queue` is `false`, or the transport is destroyed.
    pub fn send_with_options(&self, data: impl Into<String>, options: SendOptions) -> Result<()> {
        let data = data.into();
        let shared = &self.shared;
        shared.update(|inner| shared.send(inner, data, options))
    }

    /// Sets the event handler.
    ///
    /// Ignored after [`destroy`](Self::destroy).
    pub fn set_event_handler(&self, handler: TransportEventHandler) {
        let mut inner = self.shared.inner.lock();
        if !inner.destroyed {
            inner.handler = Some(handler);
        }
    }

    /// Clears the event handler.
    pub fn clear_event_handler(&self) {
        self.shared.inner.lock().handler = None;
    }
}

// ============================================================================
// Transport Impl
// ============================================================================

impl Transport for WebSocketTransport {
    fn device_id(&self) -> &DeviceId {
        &self.shared.device_id
    }

    fn kind(&self) -> TransportKind {
        TransportKind::WebSocket
    }

    fn state(&self) -> TransportState {
        WebSocketTransport::state(self)
    }

    fn has_connected_before(&self) -> bool {
        WebSocketTransport::has_connected_before(self)
    }

    fn is_destroyed(&self) -> bool {
        WebSocketTransport::is_destroyed(self)
    }

    fn connect(&self) {
        WebSocketTransport::connect(self);
    }

    fn disconnect(&self) {
        WebSocketTransport::disconnect(self);
    }

    fn destroy(&self) {
        WebSocketTransport::destroy(self);
    }

    fn immediate_reconnect(&self) {
        WebSocketTransport::immediate_reconnect(self);
    }

    fn pause_heartbeat(&self) {
        WebSocketTransport::pause_heartbeat(self);
    }

    fn resume_heartbeat(&self) {
        WebSocketTransport::resume_heartbeat(self);
    }

    fn send(&self, data: String, options: SendOptions) -> Result<()> {
        self.send_with_options(data, options)
    }

    fn set_event_handler(&self, handler: Option<TransportEventHandler>) {
        match handler {
            Some(handler) => WebSocketTransport::set_event_handler(self, handler),
            None => self.clear_event_handler(),
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Parses and checks a device address.
fn parse_address(address: &str) -> Result<Url> {
    let url = Url::parse(address).map_err(|e| Error::invalid_address(address, e.to_string()))?;

    match url.scheme() {
        "ws" | "wss" => {}
        other => {
            return Err(Error::invalid_address(
                address,
                format!("unsupported scheme '{other}', expected ws or wss"),
            ));
        }
    }

    if url.host_str().is_none_or(str::is_empty) {
        return Err(Error::invalid_address(address, "missing host"));
    }

    Ok(url)
}

#[inline]
fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    use crate::transport::ReconnectPolicy;
    use crate::transport::mock::{self, EventLog, MockNetwork, MockPeer, settle};

    const ADDRESS: &str = "ws://10.0.0.5:7497";

    fn test_options() -> TransportOptions {
        TransportOptions::new().with_reconnect(ReconnectPolicy::fixed(Duration::from_secs(1)))
    }

    fn setup(options: TransportOptions) -> (WebSocketTransport, MockNetwork, EventLog) {
        let (connector, network) = mock::network();
        let transport =
            WebSocketTransport::with_connector("d1", ADDRESS, options, connector).unwrap();
        let log = EventLog::default();
        transport.set_event_handler(log.handler());
        (transport, network, log)
    }

    async fn open(transport: &WebSocketTransport, network: &mut MockNetwork) -> MockPeer {
        transport.connect();
        settle().await;
        let peer = network.try_next_attempt().expect("attempt started").accept();
        settle().await;
        assert_eq!(transport.state(), TransportState::Connected);
        peer
    }

    async fn advance(duration: Duration) {
        tokio::time::advance(duration).await;
        settle().await;
    }

    // ========================================================================
    // Construction
    // ========================================================================

    #[tokio::test]
    async fn test_rejects_malformed_addresses() {
        for address in ["not a url", "http://10.0.0.5:7497", "ws://", "mailto:d1@device"] {
            let result = WebSocketTransport::new("d1", address);
            assert!(
                matches!(result, Err(Error::InvalidAddress { .. })),
                "accepted {address}"
            );
        }
    }

    #[tokio::test]
    async fn test_rejects_invalid_options() {
        let options = TransportOptions::new().with_connect_timeout(Duration::ZERO);
        let result = WebSocketTransport::with_options("d1", ADDRESS, options);
        assert!(matches!(result, Err(Error::Config { .. })));
    }

    #[tokio::test]
    async fn test_accepts_secure_address() {
        let transport = WebSocketTransport::new("d1", "wss://device.local/ws").unwrap();
        assert_eq!(transport.url().scheme(), "wss");
        assert_eq!(transport.state(), TransportState::Disconnected);
    }

    // ========================================================================
    // Connect / Open
    // ========================================================================

    #[tokio::test(start_paused = true)]
    async fn test_connect_then_open() {
        let (transport, mut network, log) = setup(test_options());

        transport.connect();
        assert_eq!(transport.state(), TransportState::Connecting);
        assert_eq!(log.take(), vec!["state:connecting"]);

        settle().await;
        let attempt = network.try_next_attempt().unwrap();
        assert_eq!(attempt.url.host_str(), Some("10.0.0.5"));
        assert_eq!(attempt.url.port(), Some(7497));

        let _peer = attempt.accept();
        settle().await;

        assert_eq!(transport.state(), TransportState::Connected);
        assert!(transport.has_connected_before());
        assert!(transport.is_heartbeat_active());
        assert_eq!(log.take(), vec!["state:connected", "open"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_double_connect_single_transition() {
        let (transport, mut network, log) = setup(test_options());

        transport.connect();
        transport.connect();
        settle().await;

        assert_eq!(network.count_attempts(), 1);
        assert_eq!(log.count("state:"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_attempt_stays_connecting() {
        let (transport, mut network, log) = setup(test_options());

        transport.connect();
        settle().await;
        network
            .try_next_attempt()
            .unwrap()
            .reject(Error::connection("refused"));
        settle().await;

        assert_eq!(transport.state(), TransportState::Connecting);
        assert!(transport.is_reconnect_scheduled());
        assert_eq!(transport.reconnect_attempts(), 1);
        assert_eq!(log.count("error:Connection failed: refused"), 1);
        assert_eq!(log.count("state:"), 1);

        advance(Duration::from_secs(1)).await;
        assert!(network.try_next_attempt().is_some());
        assert_eq!(transport.state(), TransportState::Connecting);
        assert!(!transport.is_reconnect_scheduled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_schedule_reconnect_is_idempotent() {
        let (transport, _network, _log) = setup(test_options());
        let shared = &transport.shared;

        shared.update(|inner| shared.schedule_reconnect(inner));
        shared.update(|inner| shared.schedule_reconnect(inner));

        assert_eq!(transport.reconnect_attempts(), 1);
        assert!(transport.is_reconnect_scheduled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_timeout() {
        let (transport, mut network, log) = setup(test_options());

        transport.connect();
        settle().await;
        let attempt = network.try_next_attempt().unwrap();

        advance(Duration::from_millis(5000)).await;

        assert!(attempt.is_abandoned());
        assert_eq!(log.count("error:Connection timeout after 5000ms"), 1);
        assert!(transport.is_reconnect_scheduled());
        assert_eq!(transport.state(), TransportState::Connecting);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connector_address_error_is_not_retried() {
        let (transport, mut network, log) = setup(test_options());

        transport.connect();
        settle().await;
        network
            .try_next_attempt()
            .unwrap()
            .reject(Error::invalid_address(ADDRESS, "no host name"));
        settle().await;

        assert_eq!(transport.state(), TransportState::Disconnected);
        assert!(!transport.is_reconnect_scheduled());
        assert_eq!(log.count("error:Invalid device address"), 1);

        advance(Duration::from_secs(60)).await;
        assert_eq!(network.count_attempts(), 0);
    }

    // ========================================================================
    // Close / Reconnect
    // ========================================================================

    #[tokio::test(start_paused = true)]
    async fn test_remote_close_reconnects() {
        let (transport, mut network, log) = setup(test_options());
        let peer = open(&transport, &mut network).await;
        log.take();

        peer.close();
        settle().await;

        assert_eq!(transport.state(), TransportState::Reconnecting);
        assert_eq!(log.take(), vec!["close", "state:reconnecting"]);
        assert!(transport.is_reconnect_scheduled());

        advance(Duration::from_secs(1)).await;
        let _peer = network.try_next_attempt().unwrap().accept();
        settle().await;

        assert_eq!(transport.state(), TransportState::Connected);
        assert_eq!(transport.reconnect_attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_socket_error_reconnects() {
        let (transport, mut network, log) = setup(test_options());
        let peer = open(&transport, &mut network).await;
        log.take();

        peer.fail(tokio_tungstenite::tungstenite::Error::ConnectionClosed);
        settle().await;

        assert_eq!(transport.state(), TransportState::Reconnecting);
        assert_eq!(log.count("error:WebSocket error"), 1);
        assert_eq!(log.count("close"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_end_without_close_frame() {
        let (transport, mut network, log) = setup(test_options());
        let peer = open(&transport, &mut network).await;
        log.take();

        drop(peer);
        settle().await;

        assert_eq!(transport.state(), TransportState::Reconnecting);
        assert_eq!(
            log.take(),
            vec!["error:Connection closed", "close", "state:reconnecting"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_after_connected_is_reconnecting() {
        let (transport, mut network, _log) = setup(test_options());
        let peer = open(&transport, &mut network).await;

        peer.close();
        settle().await;
        advance(Duration::from_secs(1)).await;
        network
            .try_next_attempt()
            .unwrap()
            .reject(Error::connection("unreachable"));
        settle().await;

        assert_eq!(transport.state(), TransportState::Reconnecting);
        assert_eq!(transport.reconnect_attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_is_reusable() {
        let (transport, mut network, log) = setup(test_options());
        let peer = open(&transport, &mut network).await;
        log.take();

        transport.disconnect();
        assert_eq!(transport.state(), TransportState::Disconnected);
        assert_eq!(log.take(), vec!["close", "state:disconnected"]);

        settle().await;
        assert!(peer.is_closed());

        advance(Duration::from_secs(60)).await;
        assert_eq!(network.count_attempts(), 0);

        transport.connect();
        assert_eq!(transport.state(), TransportState::Reconnecting);
        settle().await;
        assert_eq!(network.count_attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_cancels_pending_reconnect() {
        let (transport, mut network, _log) = setup(test_options());

        transport.connect();
        settle().await;
        network
            .try_next_attempt()
            .unwrap()
            .reject(Error::connection("refused"));
        settle().await;
        assert!(transport.is_reconnect_scheduled());

        transport.disconnect();
        assert!(!transport.is_reconnect_scheduled());
        assert_eq!(transport.reconnect_attempts(), 0);

        advance(Duration::from_secs(10)).await;
        assert_eq!(network.count_attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_destroy_is_terminal() {
        let (transport, mut network, log) = setup(test_options());
        let peer = open(&transport, &mut network).await;
        transport.send("pending").unwrap();
        log.take();

        transport.destroy();
        assert!(transport.is_destroyed());
        assert_eq!(transport.state(), TransportState::Disconnected);
        assert!(log.take().is_empty());

        transport.connect();
        transport.immediate_reconnect();
        advance(Duration::from_secs(10)).await;

        assert_eq!(transport.state(), TransportState::Disconnected);
        assert_eq!(network.count_attempts(), 0);
        assert!(peer.is_closed());
        assert!(transport.send("late").is_err());
        assert_eq!(transport.queued_len(), 0);
        assert!(log.take().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_abandons_attempt() {
        let (transport, mut network, _log) = setup(test_options());

        transport.connect();
        settle().await;
        let attempt = network.try_next_attempt().unwrap();

        drop(transport);
        settle().await;

        assert!(attempt.is_abandoned());
    }

    // ========================================================================
    // Heartbeat
    // ========================================================================

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_timeout_reconnects() {
        let (transport, mut network, log) = setup(test_options());
        let mut peer = open(&transport, &mut network).await;
        log.take();

        advance(Duration::from_secs(20)).await;
        assert_eq!(peer.drain_texts(), vec!["ping"]);
        assert_eq!(transport.state(), TransportState::Connected);

        advance(Duration::from_millis(10_001)).await;

        assert_eq!(transport.state(), TransportState::Reconnecting);
        assert!(transport.is_reconnect_scheduled());
        assert!(!transport.is_heartbeat_active());
        assert_eq!(
            log.take(),
            vec![
                "error:Heartbeat timeout: no response within 10000ms",
                "close",
                "state:reconnecting",
            ]
        );
        assert!(peer.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_silence_past_deadline_in_one_step() {
        let (transport, mut network, _log) = setup(test_options());
        let _peer = open(&transport, &mut network).await;

        advance(Duration::from_millis(30_001)).await;

        assert_eq!(transport.state(), TransportState::Reconnecting);
        assert!(transport.is_reconnect_scheduled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pong_resets_cycle() {
        let (transport, mut network, log) = setup(test_options());
        let mut peer = open(&transport, &mut network).await;

        advance(Duration::from_secs(20)).await;
        assert_eq!(peer.drain_texts(), vec!["ping"]);

        peer.send_text("pong");
        settle().await;

        advance(Duration::from_millis(10_001)).await;
        assert_eq!(transport.state(), TransportState::Connected);
        assert_eq!(log.count("message:"), 0);

        advance(Duration::from_secs(10)).await;
        assert_eq!(peer.drain_texts(), vec!["ping"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_any_traffic_counts_as_activity() {
        let (transport, mut network, log) = setup(test_options());
        let mut peer = open(&transport, &mut network).await;

        advance(Duration::from_secs(15)).await;
        peer.send_text("{\"battery\":80}");
        settle().await;

        advance(Duration::from_secs(15)).await;
        assert!(peer.drain_texts().is_empty());
        assert_eq!(transport.state(), TransportState::Connected);
        assert_eq!(log.count("message:{\"battery\":80}"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_inbound_ping_answered() {
        let (transport, mut network, log) = setup(test_options());
        let mut peer = open(&transport, &mut network).await;

        peer.send_text("ping");
        settle().await;

        assert_eq!(peer.drain_texts(), vec!["pong"]);
        assert_eq!(log.count("message:"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_and_resume_heartbeat() {
        let (transport, mut network, _log) = setup(test_options());
        let mut peer = open(&transport, &mut network).await;

        transport.pause_heartbeat();
        assert!(!transport.is_heartbeat_active());

        advance(Duration::from_secs(60)).await;
        assert!(peer.drain_texts().is_empty());
        assert_eq!(transport.state(), TransportState::Connected);

        transport.resume_heartbeat();
        assert!(transport.is_heartbeat_active());

        advance(Duration::from_secs(20)).await;
        assert_eq!(peer.drain_texts(), vec!["ping"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_heartbeat_while_disconnected() {
        let (transport, _network, _log) = setup(test_options());

        transport.resume_heartbeat();
        assert!(!transport.is_heartbeat_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_paused_heartbeat_not_started_on_open() {
        let (transport, mut network, _log) = setup(test_options());

        transport.pause_heartbeat();
        let mut peer = open(&transport, &mut network).await;

        assert!(!transport.is_heartbeat_active());
        advance(Duration::from_secs(60)).await;
        assert!(peer.drain_texts().is_empty());
        assert_eq!(transport.state(), TransportState::Connected);
    }

    // ========================================================================
    // Immediate Reconnect
    // ========================================================================

    #[tokio::test(start_paused = true)]
    async fn test_immediate_reconnect_replaces_backoff() {
        let options = TransportOptions::new()
            .with_reconnect(ReconnectPolicy::fixed(Duration::from_secs(10)));
        let (transport, mut network, _log) = setup(options);

        transport.connect();
        settle().await;
        network
            .try_next_attempt()
            .unwrap()
            .reject(Error::connection("refused"));
        settle().await;
        assert!(transport.is_reconnect_scheduled());

        transport.immediate_reconnect();
        assert!(!transport.is_reconnect_scheduled());
        assert_eq!(transport.reconnect_attempts(), 0);

        advance(Duration::from_millis(499)).await;
        assert_eq!(network.count_attempts(), 0);

        advance(Duration::from_millis(1)).await;
        assert_eq!(network.count_attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_immediate_reconnect_from_disconnected() {
        let (transport, mut network, log) = setup(test_options());

        transport.immediate_reconnect();
        assert_eq!(transport.state(), TransportState::Disconnected);

        advance(Duration::from_millis(500)).await;

        assert_eq!(transport.state(), TransportState::Connecting);
        assert_eq!(log.take(), vec!["state:connecting"]);
        assert_eq!(network.count_attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_immediate_reconnect_skips_in_flight_attempt() {
        let (transport, mut network, _log) = setup(test_options());

        transport.connect();
        settle().await;
        let _attempt = network.try_next_attempt().unwrap();

        transport.immediate_reconnect();
        advance(Duration::from_millis(500)).await;

        assert_eq!(network.count_attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_immediate_reconnect_when_connected_restarts_heartbeat() {
        let (transport, mut network, log) = setup(test_options());
        let mut peer = open(&transport, &mut network).await;
        log.take();

        transport.pause_heartbeat();
        advance(Duration::from_secs(30)).await;

        transport.immediate_reconnect();
        assert!(transport.is_heartbeat_active());
        assert!(log.take().is_empty());

        advance(Duration::from_secs(20)).await;
        assert_eq!(peer.drain_texts(), vec!["ping"]);
        assert_eq!(network.count_attempts(), 0);
    }

    // ========================================================================
    // Sending / Queue
    // ========================================================================

    #[tokio::test(start_paused = true)]
    async fn test_send_while_open() {
        let (transport, mut network, _log) = setup(test_options());
        let mut peer = open(&transport, &mut network).await;

        transport.send("{\"cmd\":\"status\"}").unwrap();
        settle().await;

        assert_eq!(peer.drain_texts(), vec!["{\"cmd\":\"status\"}"]);
        assert_eq!(transport.queued_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_queue_flushes_fifo() {
        let (transport, mut network, _log) = setup(test_options());

        transport.send("payload-1").unwrap();
        transport.connect();
        settle().await;
        transport.send("payload-2").unwrap();
        assert_eq!(transport.queued_len(), 2);

        let mut peer = network.try_next_attempt().unwrap().accept();
        settle().await;
        transport.send("payload-3").unwrap();
        settle().await;

        assert_eq!(
            peer.drain_texts(),
            vec!["payload-1", "payload-2", "payload-3"]
        );
        assert_eq!(transport.queued_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_queue_overflow_drops_oldest() {
        let (transport, mut network, _log) = setup(test_options().with_queue_capacity(2));

        for data in ["a", "b", "c"] {
            transport.send(data).unwrap();
        }
        assert_eq!(transport.queued_len(), 2);

        let mut peer = open(&transport, &mut network).await;
        settle().await;
        assert_eq!(peer.drain_texts(), vec!["b", "c"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_queue_disabled_fails() {
        let (transport, _network, _log) = setup(test_options().with_queue_messages(false));

        let err = transport.send("x").unwrap_err();
        assert!(matches!(err, Error::SocketNotOpen { .. }));
        assert_eq!(transport.queued_len(), 0);

        transport
            .send_with_options("y", SendOptions::queued())
            .unwrap();
        assert_eq!(transport.queued_len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_keeps_queue() {
        let (transport, _network, _log) = setup(test_options());

        transport.send("kept").unwrap();
        transport.disconnect();

        assert_eq!(transport.queued_len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_flush_requeues_in_order() {
        let (transport, mut network, log) = setup(test_options());
        transport.send("payload-1").unwrap();
        transport.send("payload-2").unwrap();

        transport.connect();
        settle().await;
        let _broken = network.try_next_attempt().unwrap().accept_failing_writes();
        settle().await;

        assert_eq!(transport.state(), TransportState::Reconnecting);
        assert_eq!(transport.queued_len(), 2);
        assert_eq!(log.count("error:WebSocket error"), 1);

        transport.send("payload-3").unwrap();

        advance(Duration::from_secs(1)).await;
        let mut peer = network.try_next_attempt().unwrap().accept();
        settle().await;

        assert_eq!(transport.state(), TransportState::Connected);
        assert_eq!(
            peer.drain_texts(),
            vec!["payload-1", "payload-2", "payload-3"]
        );
        assert_eq!(transport.queued_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_write_while_open_requeues() {
        let (transport, mut network, _log) = setup(test_options());

        transport.connect();
        settle().await;
        let _broken = network.try_next_attempt().unwrap().accept_failing_writes();
        settle().await;
        assert_eq!(transport.state(), TransportState::Connected);

        transport.send("status").unwrap();
        settle().await;

        assert_eq!(transport.state(), TransportState::Reconnecting);
        let queue: Vec<String> = transport.shared.inner.lock().queue.iter().cloned().collect();
        assert_eq!(queue, vec!["status"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_ping_is_not_requeued() {
        let (transport, mut network, _log) = setup(test_options());

        transport.connect();
        settle().await;
        let _broken = network.try_next_attempt().unwrap().accept_failing_writes();
        settle().await;

        advance(Duration::from_secs(20)).await;

        assert_eq!(transport.state(), TransportState::Reconnecting);
        assert_eq!(transport.queued_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_write_after_destroy_drops_messages() {
        let (connector, mut network) = mock::network();
        let transport =
            WebSocketTransport::with_connector("d1", ADDRESS, test_options(), connector).unwrap();

        let weak = Arc::downgrade(&transport.shared);
        transport.set_event_handler(Arc::new(move |event| {
            if matches!(event, TransportEvent::Open)
                && let Some(shared) = weak.upgrade()
            {
                WebSocketTransport { shared }.destroy();
            }
        }));
        transport.send("gone").unwrap();

        transport.connect();
        settle().await;
        let _broken = network.try_next_attempt().unwrap().accept_failing_writes();
        settle().await;

        assert!(transport.is_destroyed());
        assert_eq!(transport.queued_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_handler_may_reenter() {
        let (connector, mut network) = mock::network();
        let transport =
            WebSocketTransport::with_connector("d1", ADDRESS, test_options(), connector).unwrap();

        let weak = Arc::downgrade(&transport.shared);
        transport.set_event_handler(Arc::new(move |event| {
            if matches!(event, TransportEvent::Open)
                && let Some(shared) = weak.upgrade()
            {
                let handle = WebSocketTransport { shared };
                let _ = handle.send("hello");
                let _ = handle.state();
            }
        }));

        let mut peer = open(&transport, &mut network).await;
        settle().await;
        assert_eq!(peer.drain_texts(), vec!["hello"]);
    }

    // ========================================================================
    // State Machine Properties
    // ========================================================================

    #[derive(Debug, Clone)]
    enum Op {
        Connect,
        Disconnect,
        Destroy,
        ImmediateReconnect,
        PauseHeartbeat,
        ResumeHeartbeat,
        Accept,
        Reject,
        RemoteClose,
        Advance(u64),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            3 => Just(Op::Connect),
            1 => Just(Op::Disconnect),
            1 => Just(Op::Destroy),
            1 => Just(Op::ImmediateReconnect),
            1 => Just(Op::PauseHeartbeat),
            1 => Just(Op::ResumeHeartbeat),
            3 => Just(Op::Accept),
            2 => Just(Op::Reject),
            2 => Just(Op::RemoteClose),
            3 => (1u64..40_000).prop_map(Op::Advance),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_state_machine_invariants(ops in proptest::collection::vec(op_strategy(), 1..40)) {
            tokio_test::block_on(async move {
                tokio::time::pause();

                let (transport, mut network, log) = setup(test_options());
                let mut peers: Vec<MockPeer> = Vec::new();
                let mut connected_before = false;
                let mut destroyed = false;

                for op in ops {
                    match op {
                        Op::Connect => transport.connect(),
                        Op::Disconnect => transport.disconnect(),
                        Op::Destroy => {
                            transport.destroy();
                            destroyed = true;
                        }
                        Op::ImmediateReconnect => transport.immediate_reconnect(),
                        Op::PauseHeartbeat => transport.pause_heartbeat(),
                        Op::ResumeHeartbeat => transport.resume_heartbeat(),
                        Op::Accept => {
                            if let Some(attempt) = network.try_next_attempt() {
                                peers.push(attempt.accept());
                            }
                        }
                        Op::Reject => {
                            if let Some(attempt) = network.try_next_attempt() {
                                attempt.reject(Error::connection("refused"));
                            }
                        }
                        Op::RemoteClose => {
                            if let Some(peer) = peers.last() {
                                peer.close();
                            }
                        }
                        Op::Advance(ms) => tokio::time::advance(Duration::from_millis(ms)).await,
                    }
                    settle().await;

                    let state = transport.state();
                    let has_connected_before = transport.has_connected_before();

                    assert!(has_connected_before || !connected_before, "has_connected_before reverted");
                    connected_before = has_connected_before;

                    if state == TransportState::Connected {
                        assert!(has_connected_before);
                    }
                    if destroyed {
                        assert_eq!(state, TransportState::Disconnected);
                        assert!(log.take().is_empty(), "event after destroy");
                    } else {
                        log.take();
                    }
                }
            });
        }
    }
}
