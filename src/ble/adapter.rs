//! Adapter capability interface.
//!
//! The scanner and the session only talk to the host BLE stack through these
//! traits. [`BtleplugCentral`](crate::ble::BtleplugCentral) implements them on
//! top of the platform stack, [`MockCentral`](crate::ble::MockCentral) in
//! memory.

use async_trait::async_trait;
use futures::stream::BoxStream;
use uuid::Uuid;

use crate::ble::gatt::{DiscoveredDevice, NotificationEvent, ServiceDescriptor, WriteKind};
use crate::error::Result;

/// The host's BLE radio in the central role.
#[async_trait]
pub trait Central: Send + Sync {
    /// Start scanning for advertisements.
    async fn start_scan(&self) -> Result<()>;

    /// Stop scanning.
    async fn stop_scan(&self) -> Result<()>;

    /// Stream of advertisement reports, one item per advertisement received.
    ///
    /// The same address may be reported many times.
    async fn advertisements(&self) -> Result<BoxStream<'static, DiscoveredDevice>>;

    /// Establish a link-layer connection to `address`.
    async fn connect(&self, address: &str) -> Result<Box<dyn Link>>;
}

/// One established connection to a peripheral.
#[async_trait]
pub trait Link: Send + Sync {
    /// Address of the connected peripheral.
    fn address(&self) -> &str;

    /// Run GATT discovery and return the service table.
    async fn discover_services(&self) -> Result<Vec<ServiceDescriptor>>;

    /// Read a characteristic value.
    async fn read(&self, characteristic: Uuid) -> Result<Vec<u8>>;

    /// Write a characteristic value.
    async fn write(&self, characteristic: Uuid, data: &[u8], kind: WriteKind) -> Result<()>;

    /// Enable notifications (or indications) on a characteristic.
    async fn subscribe(&self, characteristic: Uuid) -> Result<()>;

    /// Disable notifications on a characteristic.
    async fn unsubscribe(&self, characteristic: Uuid) -> Result<()>;

    /// Stream of notifications from every subscribed characteristic, in
    /// transport order.
    async fn notifications(&self) -> Result<BoxStream<'static, NotificationEvent>>;

    /// Tear down the connection.
    async fn disconnect(&self) -> Result<()>;
}
