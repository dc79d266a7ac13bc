//! Multi-device connection manager.
//!
//! # Components
//!
//! | Type | Description |
//! |------|-------------|
//! | [`ConnectionManager`] | Device registry, active device and routing |
//! | [`ManagerBuilder`] | Fluent configuration builder |
//! | [`DeviceConnection`] | Per-device connection snapshot |
//! | [`ManagerEvent`] | Notifications for subscribers |
//!
//! # Host Integration
//!
//! | Host event | Call |
//! |------------|------|
//! | Device selected or discovered | [`ConnectionManager::add_device`] |
//! | Device forgotten | [`ConnectionManager::remove_device`] |
//! | App to background | [`ConnectionManager::pause_all`] |
//! | App to foreground | [`ConnectionManager::resume_all`] |

// ============================================================================
// Submodules
// ============================================================================

/// Fluent builder for manager configuration.
pub mod builder;

/// Connection snapshots and manager events.
pub mod connection;

/// Core manager implementation.
pub mod core;

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::ManagerBuilder;
pub use connection::{DeviceConnection, ManagerEvent, ManagerEventHandler};
pub use self::core::ConnectionManager;
