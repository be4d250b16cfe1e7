//! # sysap
//!
//! A pure Rust gateway for the encrypted System Access Point protocol.
//!
//! ## Features
//!
//! - Authenticated key exchange and per-message box encryption
//! - SCRAM-SHA-256 login inside encrypted containers
//! - Encrypted pubsub streams with per-stream replay windows
//! - Device tree built from master data and merged with live updates
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use sysap::{Gateway, GatewayConfig, GatewayEvent, SettingsSource, Transport};
//!
//! # async fn example(
//! #     transport: Box<dyn Transport>,
//! #     settings: Arc<dyn SettingsSource>,
//! # ) -> Result<(), sysap::GatewayError> {
//! let config = GatewayConfig::from_env()?;
//! let gateway = Gateway::new(config, transport, settings);
//! let mut events = gateway.subscribe();
//!
//! gateway.connect().await?;
//!
//! while let Ok(event) = events.recv().await {
//!     if let GatewayEvent::Update(devices) = event {
//!         println!("{} devices changed", devices.devices.len());
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! The library is organized into layers:
//!
//! - **Facade**: [`Gateway`] - connect, query the snapshot, set datapoints
//! - **Session**: [`session::SessionMachine`] - handshake and message dispatch, no I/O
//! - **Protocol**: codec, crypto engine, XML stanzas and inner messages
//! - **Model**: device tree and its XML projections

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Public modules
/// Error types
pub mod error;
pub mod gateway;
pub mod model;
pub mod protocol;
pub mod session;
pub mod transport;
/// Core types
pub mod types;

/// Testing utilities
pub mod testing;

// Re-exports
pub use error::{GatewayError, Result};
pub use gateway::{Gateway, GatewayEvent};
pub use model::{DeviceTree, Snapshot};
pub use session::SessionState;
pub use transport::{SettingsSource, Transport, TransportEvent, TransportParams};
pub use types::{AccessPointSettings, GatewayConfig};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude for common imports
///
/// Convenient re-exports
pub mod prelude {
    pub use crate::{
        DeviceTree, Gateway, GatewayConfig, GatewayError, GatewayEvent, SessionState,
        SettingsSource, Snapshot, Transport,
    };
}
