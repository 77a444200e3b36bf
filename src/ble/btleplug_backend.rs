//! Platform BLE backend built on `btleplug`.

use async_trait::async_trait;
use btleplug::api::{
    BDAddr, Central as _, CentralEvent, CharPropFlags, Characteristic, Manager as _,
    Peripheral as _, PeripheralProperties, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::stream::{BoxStream, StreamExt};
use tracing::{debug, info, trace};
use uuid::Uuid;

use crate::ble::adapter::{Central, Link};
use crate::ble::gatt::{
    CharProperties, CharacteristicDescriptor, DiscoveredDevice, NotificationEvent,
    ServiceDescriptor, WriteKind,
};
use crate::error::{Error, Result};

/// Central backed by the first Bluetooth adapter of the host.
#[derive(Clone)]
pub struct BtleplugCentral {
    /// The BLE adapter to use.
    adapter: Adapter,
}

impl BtleplugCentral {
    /// Open the first available Bluetooth adapter.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AdapterUnavailable`] if Bluetooth is not available.
    pub async fn new() -> Result<Self> {
        let manager = Manager::new()
            .await
            .map_err(|_e| Error::AdapterUnavailable)?;

        let adapters = manager.adapters().await.map_err(Error::Bluetooth)?;

        let adapter = adapters
            .into_iter()
            .next()
            .ok_or(Error::AdapterUnavailable)?;

        info!(
            "Using Bluetooth adapter: {:?}",
            adapter.adapter_info().await.ok()
        );

        Ok(Self::with_adapter(adapter))
    }

    /// Use a specific adapter.
    pub fn with_adapter(adapter: Adapter) -> Self {
        Self { adapter }
    }

    /// Get the underlying adapter.
    pub fn adapter(&self) -> &Adapter {
        &self.adapter
    }

    async fn find_peripheral(&self, address: &str) -> Result<Peripheral> {
        for peripheral in self.adapter.peripherals().await? {
            let properties = peripheral.properties().await?;
            if peripheral_address(&peripheral.id(), properties.as_ref()) == address {
                return Ok(peripheral);
            }
        }

        Err(Error::ConnectionFailed {
            reason: format!("No peripheral with address {} is known to the adapter", address),
        })
    }
}

#[async_trait]
impl Central for BtleplugCentral {
    async fn start_scan(&self) -> Result<()> {
        self.adapter.start_scan(ScanFilter::default()).await?;
        Ok(())
    }

    async fn stop_scan(&self) -> Result<()> {
        self.adapter.stop_scan().await?;
        Ok(())
    }

    async fn advertisements(&self) -> Result<BoxStream<'static, DiscoveredDevice>> {
        let events = self.adapter.events().await?;
        let adapter = self.adapter.clone();

        let stream = events.filter_map(move |event| {
            let adapter = adapter.clone();
            async move {
                match event {
                    CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
                        trace!("Advertisement from {:?}", id);
                        discovered_device(&adapter, &id).await
                    }
                    _ => None,
                }
            }
        });

        Ok(stream.boxed())
    }

    async fn connect(&self, address: &str) -> Result<Box<dyn Link>> {
        let peripheral = self.find_peripheral(address).await?;

        if peripheral.is_connected().await.unwrap_or(false) {
            info!("Peripheral {} already connected at BLE level", address);
        } else {
            peripheral.connect().await?;
        }

        Ok(Box::new(BtleplugLink {
            peripheral,
            address: address.to_string(),
        }))
    }
}

/// A connected `btleplug` peripheral.
pub struct BtleplugLink {
    peripheral: Peripheral,
    address: String,
}

impl BtleplugLink {
    fn characteristic(&self, uuid: Uuid) -> Result<Characteristic> {
        self.peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == uuid)
            .ok_or_else(|| Error::CharacteristicNotFound {
                uuid: uuid.to_string(),
            })
    }
}

#[async_trait]
impl Link for BtleplugLink {
    fn address(&self) -> &str {
        &self.address
    }

    async fn discover_services(&self) -> Result<Vec<ServiceDescriptor>> {
        self.peripheral.discover_services().await?;

        let services = self
            .peripheral
            .services()
            .into_iter()
            .map(|service| ServiceDescriptor {
                uuid: service.uuid,
                primary: service.primary,
                characteristics: service
                    .characteristics
                    .into_iter()
                    .map(|c| CharacteristicDescriptor {
                        uuid: c.uuid,
                        service_uuid: c.service_uuid,
                        properties: char_properties(c.properties),
                        descriptors: c.descriptors.into_iter().map(|d| d.uuid).collect(),
                    })
                    .collect(),
            })
            .collect::<Vec<_>>();

        debug!("Discovered {} services on {}", services.len(), self.address);

        Ok(services)
    }

    async fn read(&self, characteristic: Uuid) -> Result<Vec<u8>> {
        let characteristic = self.characteristic(characteristic)?;
        Ok(self.peripheral.read(&characteristic).await?)
    }

    async fn write(&self, characteristic: Uuid, data: &[u8], kind: WriteKind) -> Result<()> {
        let characteristic = self.characteristic(characteristic)?;

        let write_type = match kind {
            WriteKind::WithResponse => WriteType::WithResponse,
            WriteKind::WithoutResponse => WriteType::WithoutResponse,
        };

        self.peripheral
            .write(&characteristic, data, write_type)
            .await?;
        Ok(())
    }

    async fn subscribe(&self, characteristic: Uuid) -> Result<()> {
        let characteristic = self.characteristic(characteristic)?;
        self.peripheral.subscribe(&characteristic).await?;
        Ok(())
    }

    async fn unsubscribe(&self, characteristic: Uuid) -> Result<()> {
        let characteristic = self.characteristic(characteristic)?;
        self.peripheral.unsubscribe(&characteristic).await?;
        Ok(())
    }

    async fn notifications(&self) -> Result<BoxStream<'static, NotificationEvent>> {
        let notifications = self.peripheral.notifications().await?;

        Ok(notifications
            .map(|n| NotificationEvent::new(n.uuid, n.value))
            .boxed())
    }

    async fn disconnect(&self) -> Result<()> {
        self.peripheral.disconnect().await?;
        Ok(())
    }
}

/// Address shown for a peripheral.
///
/// Some platforms (macOS) hide the MAC address and report all zeroes; the
/// platform identifier stands in for it there.
fn peripheral_address(id: &PeripheralId, properties: Option<&PeripheralProperties>) -> String {
    match properties.map(|p| p.address) {
        Some(address) if !is_zero_address(address) => address.to_string(),
        _ => id.to_string(),
    }
}

async fn discovered_device(adapter: &Adapter, id: &PeripheralId) -> Option<DiscoveredDevice> {
    let peripheral = match adapter.peripheral(id).await {
        Ok(p) => p,
        Err(e) => {
            trace!("Failed to get peripheral: {}", e);
            return None;
        }
    };

    let properties = match peripheral.properties().await {
        Ok(Some(p)) => p,
        _ => return None,
    };

    Some(DiscoveredDevice {
        address: peripheral_address(id, Some(&properties)),
        name: properties.local_name,
        rssi: properties.rssi,
    })
}

fn char_properties(flags: CharPropFlags) -> CharProperties {
    CharProperties {
        read: flags.contains(CharPropFlags::READ),
        write: flags.contains(CharPropFlags::WRITE),
        write_without_response: flags.contains(CharPropFlags::WRITE_WITHOUT_RESPONSE),
        notify: flags.contains(CharPropFlags::NOTIFY),
        indicate: flags.contains(CharPropFlags::INDICATE),
    }
}

fn is_zero_address(address: BDAddr) -> bool {
    address.into_inner() == [0u8; 6]
}
