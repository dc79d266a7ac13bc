//! Multi-device connection orchestration.
//!
//! [`ConnectionManager`] owns one transport per device, keeps a
//! [`DeviceConnection`] snapshot for each, marks one device as active and
//! routes outbound traffic.
//!
//! # Locking
//!
//! The registry sits behind one mutex. Transport methods that may emit
//! events are always called after it is released, and subscriber callbacks
//! run without it, so handlers can call back into the manager. When both
//! locks are held the order is manager, then transport.

// ============================================================================
// Imports
// ============================================================================

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::{debug, info, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::DeviceId;
use crate::transport::{
    Connector, SendOptions, Transport, TransportConfig, TransportEvent, TransportEventHandler,
    TransportOptions, TungsteniteConnector, create_transport,
};

use super::builder::ManagerBuilder;
use super::connection::{DeviceConnection, ManagerEvent, ManagerEventHandler, now_ms};

// ============================================================================
// Internal Types
// ============================================================================

/// Registry entry for one device.
struct DeviceEntry {
    transport: Arc<dyn Transport>,
    connection: DeviceConnection,
    /// Distinguishes this transport from any it replaced.
    generation: u64,
}

/// Mutable manager state.
#[derive(Default)]
struct ManagerState {
    devices: FxHashMap<DeviceId, DeviceEntry>,
    active: Option<DeviceId>,
    paused: bool,
    next_generation: u64,
    handler: Option<ManagerEventHandler>,
}

impl ManagerState {
    fn next_generation(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }

    fn transports(&self) -> Vec<Arc<dyn Transport>> {
        self.devices
            .values()
            .map(|entry| Arc::clone(&entry.transport))
            .collect()
    }

    /// Empties the registry, returning the transports and the cleared active id.
    fn drain(&mut self) -> (Vec<Arc<dyn Transport>>, Option<DeviceId>) {
        let transports = self
            .devices
            .drain()
            .map(|(_, entry)| entry.transport)
            .collect();
        (transports, self.active.take())
    }
}

/// State shared by manager handles and transport callbacks.
struct ManagerShared {
    me: Weak<ManagerShared>,
    connector: Arc<dyn Connector>,
    options: TransportOptions,
    state: Mutex<ManagerState>,
}

impl ManagerShared {
    /// Builds the callback installed on a transport.
    fn transport_handler(&self, device_id: DeviceId, generation: u64) -> TransportEventHandler {
        let manager = self.me.clone();
        Arc::new(move |event| {
            if let Some(shared) = manager.upgrade() {
                shared.on_transport_event(&device_id, generation, event);
            }
        })
    }

    fn on_transport_event(&self, device_id: &DeviceId, generation: u64, event: TransportEvent) {
        let (notification, handler) = {
            let mut state = self.state.lock();
            let Some(entry) = state
                .devices
                .get_mut(device_id)
                .filter(|entry| entry.generation == generation)
            else {
                trace!(device_id = %device_id, "Ignoring event from replaced transport");
                return;
            };

            let notification = match event {
                // Events are dispatched outside the transport lock, so a late
                // one may carry a superseded state. The snapshot follows the
                // transport itself.
                TransportEvent::StateChange(reported) => {
                    let current = entry.transport.state();
                    let connected_before = entry.connection.has_connected_before
                        || entry.transport.has_connected_before();

                    if current == entry.connection.state
                        && connected_before == entry.connection.has_connected_before
                    {
                        trace!(
                            device_id = %device_id,
                            reported = %reported,
                            state = %current,
                            "Ignoring superseded state change"
                        );
                        None
                    } else {
                        entry.connection.state = current;
                        entry.connection.has_connected_before = connected_before;

                        debug!(device_id = %device_id, state = %current, "Connection state changed");

                        Some(ManagerEvent::ConnectionChanged {
                            device_id: device_id.clone(),
                            connection: entry.connection.clone(),
                        })
                    }
                }

                TransportEvent::Message(message) => {
                    entry.connection.has_data = true;
                    entry.connection.last_data_timestamp = Some(now_ms());

                    Some(ManagerEvent::Message {
                        device_id: device_id.clone(),
                        message,
                    })
                }

                TransportEvent::Error(err) => {
                    warn!(device_id = %device_id, error = %err, "Transport error");
                    None
                }

                TransportEvent::Open | TransportEvent::Close => None,
            };

            (notification, state.handler.clone())
        };

        if let (Some(event), Some(handler)) = (notification, handler) {
            handler(event);
        }
    }

    /// Destroys every transport and clears the active device.
    fn shutdown(&self) {
        let (transports, active, handler) = {
            let mut state = self.state.lock();
            let (transports, active) = state.drain();
            (transports, active, state.handler.clone())
        };

        finish_shutdown(transports, active, handler);
    }
}

impl Drop for ManagerShared {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        let (transports, active) = state.drain();
        finish_shutdown(transports, active, state.handler.take());
    }
}

fn finish_shutdown(
    transports: Vec<Arc<dyn Transport>>,
    active: Option<DeviceId>,
    handler: Option<ManagerEventHandler>,
) {
    if transports.is_empty() && active.is_none() {
        return;
    }

    info!(count = transports.len(), "Shutting down connection manager");

    for transport in transports {
        transport.destroy();
    }

    if active.is_some()
        && let Some(handler) = handler
    {
        handler(ManagerEvent::ActiveDeviceChanged { device_id: None });
    }
}

// ============================================================================
// ConnectionManager
// ============================================================================

/// Coordinates connections to any number of devices.
///
/// Cloning yields another handle to the same registry. Every transport is
/// destroyed when the last handle is dropped.
///
/// # Example
///
/// ```ignore
/// use std::sync::Arc;
/// use device_link::{ConnectionManager, ManagerEvent, TransportConfig};
///
/// let manager = ConnectionManager::builder()
///     .event_handler(Arc::new(|event| {
///         if let ManagerEvent::ConnectionChanged { device_id, connection } = event {
///             println!("{device_id}: {}", connection.state);
///         }
///     }))
///     .build()?;
///
/// manager.add_device(TransportConfig::websocket("d1", "ws://10.0.0.5:7497"))?;
/// manager.set_active_device(Some("d1"));
/// manager.send_to_active("{\"cmd\":\"status\"}")?;
/// ```
#[derive(Clone)]
pub struct ConnectionManager {
    shared: Arc<ManagerShared>,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("ConnectionManager")
            .field("devices", &state.devices.len())
            .field("active", &state.active)
            .field("paused", &state.paused)
            .finish_non_exhaustive()
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// ConnectionManager - Constructors
// ============================================================================

impl ConnectionManager {
    /// Creates a manager with default options and the tungstenite client.
    #[must_use]
    pub fn new() -> Self {
        Self::from_parts(
            Arc::new(TungsteniteConnector::new()),
            TransportOptions::default(),
            None,
        )
    }

    /// Creates a builder for custom wiring.
    #[inline]
    #[must_use]
    pub fn builder() -> ManagerBuilder {
        ManagerBuilder::new()
    }

    pub(crate) fn from_parts(
        connector: Arc<dyn Connector>,
        options: TransportOptions,
        handler: Option<ManagerEventHandler>,
    ) -> Self {
        let shared = Arc::new_cyclic(|me| ManagerShared {
            me: me.clone(),
            connector,
            options,
            state: Mutex::new(ManagerState {
                handler,
                ..ManagerState::default()
            }),
        });
        Self { shared }
    }
}

// ============================================================================
// ConnectionManager - Registry
// ============================================================================

impl ConnectionManager {
    /// Registers a device and starts connecting to it.
    ///
    /// An existing device with the same id is replaced and its transport
    /// destroyed. While paused, connecting waits for
    /// [`resume_all`](Self::resume_all).
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidAddress`] if the address is malformed
    /// - [`Error::UnsupportedTransport`] for unimplemented transport kinds
    ///
    /// Nothing is registered on error.
    pub fn add_device(&self, config: TransportConfig) -> Result<()> {
        let shared = &self.shared;
        let transport = create_transport(
            &config,
            shared.options.clone(),
            Arc::clone(&shared.connector),
        )?;

        let (replaced, paused) = {
            let mut state = shared.state.lock();
            let generation = state.next_generation();

            transport.set_event_handler(Some(
                shared.transport_handler(config.device_id.clone(), generation),
            ));

            let replaced = state.devices.insert(
                config.device_id.clone(),
                DeviceEntry {
                    transport: Arc::clone(&transport),
                    connection: DeviceConnection::new(&config),
                    generation,
                },
            );
            (replaced, state.paused)
        };

        if let Some(old) = replaced {
            info!(device_id = %config.device_id, "Replacing existing transport");
            old.transport.destroy();
        }

        info!(
            device_id = %config.device_id,
            kind = %config.kind,
            address = %config.address,
            "Device added"
        );

        if paused {
            debug!(device_id = %config.device_id, "Manager paused, deferring connect");
        } else {
            transport.connect();
        }

        Ok(())
    }

    /// Destroys a device's transport and forgets it.
    ///
    /// Clears the active device if it was this one. Returns `false` for an
    /// unknown id.
    pub fn remove_device(&self, device_id: &str) -> bool {
        let (entry, cleared, handler) = {
            let mut state = self.shared.state.lock();
            let Some(entry) = state.devices.remove(device_id) else {
                warn!(device_id, "Cannot remove unknown device");
                return false;
            };

            let cleared = state
                .active
                .as_ref()
                .is_some_and(|active| active.as_str() == device_id);
            if cleared {
                state.active = None;
            }
            (entry, cleared, state.handler.clone())
        };

        entry.transport.destroy();
        info!(device_id, "Device removed");

        if cleared && let Some(handler) = handler {
            handler(ManagerEvent::ActiveDeviceChanged { device_id: None });
        }
        true
    }

    /// Selects the device that receives [`send_to_active`](Self::send_to_active).
    ///
    /// Returns `true` if the active device changed. Unknown ids are rejected
    /// and setting the current device again does nothing.
    pub fn set_active_device(&self, device_id: Option<&str>) -> bool {
        let (active, handler) = {
            let mut state = self.shared.state.lock();

            let active = match device_id {
                Some(id) => match state.devices.get_key_value(id) {
                    Some((key, _)) => Some(key.clone()),
                    None => {
                        warn!(device_id = id, "Cannot activate unknown device");
                        return false;
                    }
                },
                None => None,
            };

            if state.active == active {
                return false;
            }
            state.active.clone_from(&active);
            (active, state.handler.clone())
        };

        info!(device_id = ?active.as_ref().map(DeviceId::as_str), "Active device changed");

        if let Some(handler) = handler {
            handler(ManagerEvent::ActiveDeviceChanged { device_id: active });
        }
        true
    }

    /// Destroys every transport and clears the registry.
    ///
    /// Also runs when the last handle is dropped.
    pub fn shutdown(&self) {
        self.shared.shutdown();
    }
}

// ============================================================================
// ConnectionManager - Routing
// ============================================================================

impl ConnectionManager {
    /// Sends to the active device using the default queuing option.
    ///
    /// Without an active device the message is dropped and `Ok` returned.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SocketNotOpen`] if the socket is closed and queuing
    /// is disabled.
    pub fn send_to_active(&self, data: impl Into<String>) -> Result<()> {
        self.send_to_active_with_options(data, self.default_send_options())
    }

    /// Sends to the active device.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SocketNotOpen`] if the socket is closed and
    /// `options.queue` is `false`.
    pub fn send_to_active_with_options(
        &self,
        data: impl Into<String>,
        options: SendOptions,
    ) -> Result<()> {
        let target = {
            let state = self.shared.state.lock();
            state
                .active
                .as_ref()
                .and_then(|id| state.devices.get(id))
                .map(|entry| Arc::clone(&entry.transport))
        };

        match target {
            Some(transport) => transport.send(data.into(), options),
            None => {
                warn!("No active device, message dropped");
                Ok(())
            }
        }
    }

    /// Sends to a specific device using the default queuing option.
    ///
    /// # Errors
    ///
    /// - [`Error::DeviceNotFound`] if no device has this id
    /// - [`Error::SocketNotOpen`] if the socket is closed and queuing is
    ///   disabled
    pub fn send_to_device(&self, device_id: &str, data: impl Into<String>) -> Result<()> {
        self.send_to_device_with_options(device_id, data, self.default_send_options())
    }

    /// Sends to a specific device.
    ///
    /// # Errors
    ///
    /// - [`Error::DeviceNotFound`] if no device has this id
    /// - [`Error::SocketNotOpen`] if the socket is closed and
    ///   `options.queue` is `false`
    pub fn send_to_device_with_options(
        &self,
        device_id: &str,
        data: impl Into<String>,
        options: SendOptions,
    ) -> Result<()> {
        let Some(transport) = self.transport(device_id) else {
            warn!(device_id, "Cannot send to unknown device");
            return Err(Error::device_not_found(device_id));
        };
        transport.send(data.into(), options)
    }

    fn default_send_options(&self) -> SendOptions {
        SendOptions {
            queue: self.shared.options.queue_messages,
        }
    }
}

// ============================================================================
// ConnectionManager - Lifecycle
// ============================================================================

impl ConnectionManager {
    /// Suspends the heartbeat on every transport.
    ///
    /// Call when the host app moves to the background. Devices added while
    /// paused do not connect until [`resume_all`](Self::resume_all).
    pub fn pause_all(&self) {
        let transports = {
            let mut state = self.shared.state.lock();
            state.paused = true;
            state.transports()
        };

        info!(count = transports.len(), "Pausing all transports");
        for transport in transports {
            transport.pause_heartbeat();
        }
    }

    /// Reconnects every transport quickly.
    ///
    /// Call when the host app returns to the foreground.
    pub fn resume_all(&self) {
        let transports = {
            let mut state = self.shared.state.lock();
            state.paused = false;
            state.transports()
        };

        info!(count = transports.len(), "Resuming all transports");
        for transport in transports {
            transport.immediate_reconnect();
        }
    }

    /// Sets the event handler.
    pub fn set_event_handler(&self, handler: ManagerEventHandler) {
        self.shared.state.lock().handler = Some(handler);
    }

    /// Clears the event handler.
    pub fn clear_event_handler(&self) {
        self.shared.state.lock().handler = None;
    }
}

// ============================================================================
// ConnectionManager - Queries
// ============================================================================

impl ConnectionManager {
    /// Returns a snapshot of one device's connection.
    #[must_use]
    pub fn connection(&self, device_id: &str) -> Option<DeviceConnection> {
        self.shared
            .state
            .lock()
            .devices
            .get(device_id)
            .map(|entry| entry.connection.clone())
    }

    /// Returns snapshots of every device, sorted by id.
    #[must_use]
    pub fn connections(&self) -> Vec<DeviceConnection> {
        let mut connections: Vec<_> = self
            .shared
            .state
            .lock()
            .devices
            .values()
            .map(|entry| entry.connection.clone())
            .collect();
        connections.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        connections
    }

    /// Returns the active device id.
    #[inline]
    #[must_use]
    pub fn active_device_id(&self) -> Option<DeviceId> {
        self.shared.state.lock().active.clone()
    }

    /// Returns a snapshot of the active device's connection.
    #[must_use]
    pub fn active_connection(&self) -> Option<DeviceConnection> {
        let state = self.shared.state.lock();
        state
            .active
            .as_ref()
            .and_then(|id| state.devices.get(id))
            .map(|entry| entry.connection.clone())
    }

    /// Returns the number of registered devices.
    #[inline]
    #[must_use]
    pub fn device_count(&self) -> usize {
        self.shared.state.lock().devices.len()
    }

    /// Returns `true` if a device with this id is registered.
    #[inline]
    #[must_use]
    pub fn contains(&self, device_id: &str) -> bool {
        self.shared.state.lock().devices.contains_key(device_id)
    }

    /// Returns `true` between [`pause_all`](Self::pause_all) and
    /// [`resume_all`](Self::resume_all).
    #[inline]
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.shared.state.lock().paused
    }

    /// Returns the transport serving a device.
    #[must_use]
    pub fn transport(&self, device_id: &str) -> Option<Arc<dyn Transport>> {
        self.shared
            .state
            .lock()
            .devices
            .get(device_id)
            .map(|entry| Arc::clone(&entry.transport))
    }
}

// ============================================================================
// Tests
// ============================================================================
