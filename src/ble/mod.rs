//! BLE communication module.
//!
//! This module provides the Bluetooth Low Energy layer: the adapter
//! abstraction and its backends, discovery scans, and connected GATT
//! sessions.

pub mod adapter;
pub mod btleplug_backend;
pub mod gatt;
pub mod mock;
pub mod scanner;
pub mod session;
pub mod uuids;

pub use adapter::{Central, Link};
pub use btleplug_backend::{BtleplugCentral, BtleplugLink};
pub use gatt::{
    CharProperties, CharacteristicDescriptor, DiscoveredDevice, NotificationEvent,
    ServiceDescriptor, WriteKind,
};
pub use mock::{MockCall, MockCentral};
pub use scanner::{find_by_name, BleScanner, DeviceTable};
pub use session::{ConnectionState, NotificationHandler, Session};
pub use uuids::*;
