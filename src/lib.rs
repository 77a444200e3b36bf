// Allow unusual byte groupings for UUIDs which have standard format
#![allow(clippy::unusual_byte_groupings)]

//! # hm10-bridge
//!
//! A cross-platform Bluetooth Low Energy central for HM-10 style serial
//! modules: find a device by its advertised name, connect, inspect its GATT
//! table, and exchange text with it over the `FFE1` characteristic.
//!
//! ## Features
//!
//! - **Discovery**: Time-bounded scans, deduplicated by address
//! - **Sessions**: Connect, list services, read, write, subscribe
//! - **Interactive Bridge**: Console lines out, notifications in
//! - **Pluggable Adapters**: A btleplug backend and an in-memory mock
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use hm10_bridge::{BleScanner, BtleplugCentral, Result, Session, HM10_CHARACTERISTIC_UUID};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let central = Arc::new(BtleplugCentral::new().await?);
//!     let scanner = BleScanner::new(central.clone());
//!
//!     let Some(device) = scanner
//!         .find_by_name("sallen_hm10", BleScanner::DEFAULT_TIMEOUT)
//!         .await?
//!     else {
//!         println!("not found");
//!         return Ok(());
//!     };
//!
//!     let session = Session::connect(
//!         central.as_ref(),
//!         &device.address,
//!         Session::DEFAULT_CONNECT_TIMEOUT,
//!     )
//!     .await?;
//!
//!     session
//!         .subscribe(&HM10_CHARACTERISTIC_UUID, |event| {
//!             println!("<< {}", hm10_bridge::render_payload(&event.payload));
//!         })
//!         .await?;
//!     session.write(&HM10_CHARACTERISTIC_UUID, b"AT").await?;
//!
//!     tokio::time::sleep(std::time::Duration::from_secs(1)).await;
//!     session.disconnect().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Platform Notes
//!
//! ### macOS
//! Requires Bluetooth permission. Devices are identified by a per-host
//! UUID rather than a MAC address.
//!
//! ### Linux
//! Requires BlueZ. User may need to be in the `bluetooth` group.
//!
//! ### Windows
//! Requires Windows 10 or later with Bluetooth LE support.
//!
//! ## Feature Flags
//!
//! - `serde`: Enable serialization/deserialization for data types

// Public modules
pub mod ble;
pub mod bridge;
pub mod config;
pub mod error;
pub mod utils;

// Re-exports for convenience
pub use bridge::{run, BridgeExit, InteractiveBridge};
pub use config::BridgeConfig;
pub use error::{Error, Result};
pub use utils::{format_services, render_payload, to_hex};

// Re-export commonly used types from submodules
pub use ble::{
    BleScanner, BtleplugCentral, Central, CharProperties, CharacteristicDescriptor,
    ConnectionState, DiscoveredDevice, Link, MockCall, MockCentral, NotificationEvent,
    ServiceDescriptor, Session, WriteKind, HM10_CHARACTERISTIC_UUID, HM10_SERVICE_UUID,
};
