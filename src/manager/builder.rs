//! Builder pattern for manager configuration.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use device_link::{ConnectionManager, ReconnectPolicy, TransportOptions};
//!
//! let manager = ConnectionManager::builder()
//!     .transport_options(
//!         TransportOptions::new().with_reconnect(ReconnectPolicy::fixed(Duration::from_secs(2))),
//!     )
//!     .build()?;
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use crate::error::Result;
use crate::transport::{Connector, TransportOptions, TungsteniteConnector};

use super::connection::ManagerEventHandler;
use super::core::ConnectionManager;

// ============================================================================
// ManagerBuilder
// ============================================================================

/// Builder for configuring a [`ConnectionManager`].
///
/// Use [`ConnectionManager::builder()`] to create a new builder.
#[derive(Default, Clone)]
pub struct ManagerBuilder {
    /// Socket connector shared by every transport.
    connector: Option<Arc<dyn Connector>>,
    /// Options applied to every transport.
    options: TransportOptions,
    /// Initial event handler.
    handler: Option<ManagerEventHandler>,
}

impl std::fmt::Debug for ManagerBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagerBuilder")
            .field("custom_connector", &self.connector.is_some())
            .field("options", &self.options)
            .field("has_handler", &self.handler.is_some())
            .finish()
    }
}

impl ManagerBuilder {
    /// Creates a builder with default options and the tungstenite client.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the connector used to open sockets.
    #[inline]
    #[must_use]
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Sets the options applied to every transport.
    #[inline]
    #[must_use]
    pub fn transport_options(mut self, options: TransportOptions) -> Self {
        self.options = options;
        self
    }

    /// Sets the initial event handler.
    #[inline]
    #[must_use]
    pub fn event_handler(mut self, handler: ManagerEventHandler) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Builds the manager.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`](crate::Error::Config) if the transport
    /// options are invalid.
    pub fn build(self) -> Result<ConnectionManager> {
        self.options.validate()?;

        let connector = self
            .connector
            .unwrap_or_else(|| Arc::new(TungsteniteConnector::new()));

        Ok(ConnectionManager::from_parts(
            connector,
            self.options,
            self.handler,
        ))
    }
}

// ============================================================================
// Tests
// ============================================================================
