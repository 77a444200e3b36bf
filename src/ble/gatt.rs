//! GATT data model.
//!
//! Plain value types shared by the scanner, the session and the adapter
//! backends: discovered devices, the service table and notification events.

use bytes::Bytes;
use std::fmt;
use std::time::Instant;
use uuid::Uuid;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::ble::uuids;

/// A device seen while scanning.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DiscoveredDevice {
    /// Link-layer identifier (MAC address, or platform identifier where the
    /// OS hides the address).
    pub address: String,
    /// Advertised local name.
    pub name: Option<String>,
    /// Signal strength in dBm.
    pub rssi: Option<i16>,
}

impl DiscoveredDevice {
    /// Create a device record.
    pub fn new(address: impl Into<String>, name: Option<String>, rssi: Option<i16>) -> Self {
        Self {
            address: address.into(),
            name,
            rssi,
        }
    }

    /// Exact, case-sensitive name match. Unnamed devices never match.
    pub fn matches_name(&self, name: &str) -> bool {
        self.name.as_deref() == Some(name)
    }

    /// Name for display, `"Unknown"` if none was advertised.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("Unknown")
    }
}

/// Properties a characteristic advertises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CharProperties {
    /// Supports read.
    pub read: bool,
    /// Supports write with response.
    pub write: bool,
    /// Supports write without response.
    pub write_without_response: bool,
    /// Supports notifications.
    pub notify: bool,
    /// Supports indications.
    pub indicate: bool,
}

impl CharProperties {
    /// Names of the set properties, in a fixed order.
    pub fn names(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        if self.read {
            names.push("read");
        }
        if self.write_without_response {
            names.push("write-without-response");
        }
        if self.write {
            names.push("write");
        }
        if self.notify {
            names.push("notify");
        }
        if self.indicate {
            names.push("indicate");
        }
        names
    }

    /// Whether any kind of write is supported.
    pub fn can_write(&self) -> bool {
        self.write || self.write_without_response
    }

    /// Whether the value can be pushed to us.
    pub fn can_notify(&self) -> bool {
        self.notify || self.indicate
    }

    /// Preferred write kind: acknowledged writes when available.
    pub fn write_kind(&self) -> Option<WriteKind> {
        if self.write {
            Some(WriteKind::WithResponse)
        } else if self.write_without_response {
            Some(WriteKind::WithoutResponse)
        } else {
            None
        }
    }
}

impl fmt::Display for CharProperties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.names().join(", "))
    }
}

/// How a write is delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriteKind {
    /// Completes once the peripheral acknowledges the write.
    WithResponse,
    /// Completes once the write is queued to the transport.
    WithoutResponse,
}

/// A characteristic from the discovered service table.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CharacteristicDescriptor {
    /// Characteristic UUID.
    pub uuid: Uuid,
    /// UUID of the service containing this characteristic.
    pub service_uuid: Uuid,
    /// Advertised properties.
    pub properties: CharProperties,
    /// Descriptor UUIDs, in discovery order.
    pub descriptors: Vec<Uuid>,
}

impl CharacteristicDescriptor {
    /// Human-readable name, if the UUID is well known.
    pub fn description(&self) -> &'static str {
        uuids::describe(&self.uuid)
    }
}

/// A service from the discovered service table.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ServiceDescriptor {
    /// Service UUID.
    pub uuid: Uuid,
    /// Whether this is a primary service.
    pub primary: bool,
    /// Characteristics, in discovery order.
    pub characteristics: Vec<CharacteristicDescriptor>,
}

impl ServiceDescriptor {
    /// Human-readable name, if the UUID is well known.
    pub fn description(&self) -> &'static str {
        uuids::describe(&self.uuid)
    }

    /// Find a characteristic of this service.
    pub fn characteristic(&self, uuid: &Uuid) -> Option<&CharacteristicDescriptor> {
        self.characteristics.iter().find(|c| c.uuid == *uuid)
    }
}

/// Notification event from a characteristic.
#[derive(Debug, Clone)]
pub struct NotificationEvent {
    /// UUID of the characteristic that sent the notification.
    pub characteristic_uuid: Uuid,
    /// The notification payload.
    pub payload: Bytes,
    /// When the event reached us.
    pub received_at: Instant,
}

impl NotificationEvent {
    /// Create an event stamped with the current time.
    pub fn new(characteristic_uuid: Uuid, payload: impl Into<Bytes>) -> Self {
        Self {
            characteristic_uuid,
            payload: payload.into(),
            received_at: Instant::now(),
        }
    }
}
