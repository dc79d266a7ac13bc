//! Connects to one device and logs every manager event.
//!
//! Demonstrates:
//! - Building a ConnectionManager with custom transport options
//! - Adding a device and making it active
//! - Observing state changes, messages and reconnects
//! - Pausing and resuming like an app moving to the background
//!
//! Usage:
//!   cargo run --example watch_device -- ws://10.0.0.5:7497
//!   cargo run --example watch_device -- ws://10.0.0.5:7497 --debug
//!   cargo run --example watch_device -- ws://10.0.0.5:7497 --fixed

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use device_link::{
    ConnectionManager, ManagerEvent, ReconnectPolicy, Result, TransportConfig, TransportOptions,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

// ============================================================================
// Constants
// ============================================================================

const DEVICE_ID: &str = "demo";

const DEFAULT_ADDRESS: &str = "ws://127.0.0.1:7497";

// ============================================================================
// Args
// ============================================================================

#[derive(Debug, Clone)]
struct Args {
    address: String,
    debug: bool,
    fixed: bool,
}

impl Args {
    fn parse() -> Self {
        let args: Vec<String> = std::env::args().skip(1).collect();
        Self {
            address: args
                .iter()
                .find(|a| !a.starts_with("--"))
                .cloned()
                .unwrap_or_else(|| DEFAULT_ADDRESS.to_owned()),
            debug: args.iter().any(|a| a == "--debug"),
            fixed: args.iter().any(|a| a == "--fixed"),
        }
    }
}

fn init_logging(debug: bool) {
    let filter = if debug {
        "device_link=debug,watch_device=debug"
    } else {
        "device_link=info,watch_device=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(false)
        .init();
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(args.debug);

    if let Err(e) = run(args).await {
        eprintln!("\n[ERROR] {e}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    let mut options = TransportOptions::new().with_ping_interval(Duration::from_secs(10));
    if args.fixed {
        options = options.with_reconnect(ReconnectPolicy::fixed(Duration::from_secs(2)));
    }

    let manager = ConnectionManager::builder()
        .transport_options(options)
        .event_handler(Arc::new(|event| match event {
            ManagerEvent::ConnectionChanged {
                device_id,
                connection,
            } => info!(
                device_id = %device_id,
                state = %connection.state,
                has_connected_before = connection.has_connected_before,
                "Connection changed"
            ),
            ManagerEvent::Message { device_id, message } => {
                info!(device_id = %device_id, %message, "Message");
            }
            ManagerEvent::ActiveDeviceChanged { device_id } => {
                info!(device_id = ?device_id, "Active device changed");
            }
        }))
        .build()?;

    manager.add_device(TransportConfig::websocket(DEVICE_ID, &args.address))?;
    manager.set_active_device(Some(DEVICE_ID));
    manager.send_to_active("{\"cmd\":\"hello\"}")?;

    info!(address = %args.address, "Watching device, press Ctrl+C to exit");

    let mut background = tokio::time::interval(Duration::from_secs(60));
    background.tick().await;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = background.tick() => {
                warn!("Simulating background/foreground cycle");
                manager.pause_all();
                tokio::time::sleep(Duration::from_secs(5)).await;
                manager.resume_all();
            }
        }
    }

    manager.shutdown();
    Ok(())
}
