//! BLE scanning functionality.
//!
//! Runs time-bounded discovery scans and looks devices up by advertised name.

use futures::stream::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::ble::adapter::Central;
use crate::ble::gatt::DiscoveredDevice;
use crate::error::{Error, Result};

/// Devices seen during one scan, deduplicated by address.
///
/// First-seen order is kept; a later report for the same address replaces
/// its name and RSSI.
#[derive(Debug, Default)]
pub struct DeviceTable {
    devices: Vec<DiscoveredDevice>,
    index: HashMap<String, usize>,
}

impl DeviceTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an advertisement report. Reports without an address are ignored.
    pub fn record(&mut self, device: DiscoveredDevice) {
        if device.address.is_empty() {
            trace!("Ignoring advertisement without address");
            return;
        }

        match self.index.get(&device.address) {
            Some(&i) => {
                let entry = &mut self.devices[i];
                entry.name = device.name;
                entry.rssi = device.rssi;
            }
            None => {
                debug!(
                    "Device discovered: {} ({})",
                    device.address,
                    device.display_name()
                );
                self.index.insert(device.address.clone(), self.devices.len());
                self.devices.push(device);
            }
        }
    }

    /// Number of distinct devices.
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// Whether no device has been seen.
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Consume the table, returning devices in first-seen order.
    pub fn into_devices(self) -> Vec<DiscoveredDevice> {
        self.devices
    }
}

/// Find the first device whose advertised name equals `name` exactly.
pub fn find_by_name<'a>(devices: &'a [DiscoveredDevice], name: &str) -> Option<&'a DiscoveredDevice> {
    devices.iter().find(|d| d.matches_name(name))
}

/// Stops the scan when dropped unless disarmed.
///
/// Covers the discover future being cancelled mid-scan, where no async
/// cleanup can run in place.
struct ScanGuard {
    central: Arc<dyn Central>,
    armed: bool,
}

impl ScanGuard {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for ScanGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        let central = self.central.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = central.stop_scan().await {
                        warn!("Failed to stop abandoned scan: {}", e);
                    }
                });
            }
            Err(_) => warn!("Scan abandoned outside a runtime; it was not stopped"),
        }
    }
}

/// BLE scanner for discovering nearby peripherals.
pub struct BleScanner {
    /// The adapter to scan with.
    central: Arc<dyn Central>,
}

impl BleScanner {
    /// Default scan duration.
    pub const DEFAULT_TIMEOUT: Duration = crate::config::DEFAULT_SCAN_TIMEOUT;

    /// Create a scanner on top of an adapter.
    pub fn new(central: Arc<dyn Central>) -> Self {
        Self { central }
    }

    /// Get the underlying adapter.
    pub fn central(&self) -> &Arc<dyn Central> {
        &self.central
    }

    /// Scan for `timeout` and return every distinct device seen.
    ///
    /// Scanning is stopped before this returns, including on error. An empty
    /// result is not an error, and neither is a failure to stop the scan once
    /// results have been collected.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParameter`] for a zero timeout, or the adapter's
    /// error if scanning cannot be started.
    pub async fn discover(&self, timeout: Duration) -> Result<Vec<DiscoveredDevice>> {
        if timeout.is_zero() {
            return Err(Error::InvalidParameter {
                name: "timeout".to_string(),
                value: format!("{:?}", timeout),
            });
        }

        info!("Starting BLE scan for {:?}", timeout);

        let mut advertisements = self.central.advertisements().await?;
        self.central.start_scan().await?;

        let mut guard = ScanGuard {
            central: self.central.clone(),
            armed: true,
        };

        let deadline = Instant::now() + timeout;
        let mut table = DeviceTable::new();

        loop {
            match tokio::time::timeout_at(deadline, advertisements.next()).await {
                Ok(Some(device)) => table.record(device),
                Ok(None) => {
                    debug!("Advertisement stream ended before the scan timeout");
                    break;
                }
                Err(_) => break,
            }
        }

        guard.disarm();
        info!("Stopping BLE scan, {} device(s) seen", table.len());
        if let Err(e) = self.central.stop_scan().await {
            warn!("Failed to stop scan: {}", e);
        }

        Ok(table.into_devices())
    }

    /// Scan for `timeout` and return the device advertising exactly `name`.
    pub async fn find_by_name(
        &self,
        name: &str,
        timeout: Duration,
    ) -> Result<Option<DiscoveredDevice>> {
        let devices = self.discover(timeout).await?;
        Ok(find_by_name(&devices, name).cloned())
    }
}
