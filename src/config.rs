//! Runtime configuration and defaults.
//!
//! Target device, UUIDs and timing parameters live here so the binary and
//! the tests agree on them.

use std::time::Duration;
use uuid::Uuid;

use crate::ble::uuids::{HM10_CHARACTERISTIC_UUID, HM10_SERVICE_UUID};
use crate::error::{Error, Result};

/// Advertised name of the module we look for.
pub const DEFAULT_DEVICE_NAME: &str = "sallen_hm10";

/// Duration of a discovery scan.
pub const DEFAULT_SCAN_TIMEOUT: Duration = Duration::from_secs(10);

/// Bound on connecting plus service discovery.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(20);

/// Notifications buffered between the session and the interactive loop.
pub const NOTIFICATION_CHANNEL_CAPACITY: usize = 256;

/// Input line that ends interactive mode (compared case-insensitively).
pub const EXIT_COMMAND: &str = "exit";

/// Marker printed before each input read.
pub const PROMPT: &str = ">> ";

/// Settings for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    /// Advertised name to connect to.
    pub device_name: String,
    /// How long to scan.
    pub scan_timeout: Duration,
    /// Bound on connect plus discovery.
    pub connect_timeout: Duration,
    /// Service expected to carry the serial characteristic.
    pub service_uuid: Uuid,
    /// Characteristic used for notifications and writes.
    pub characteristic_uuid: Uuid,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            device_name: DEFAULT_DEVICE_NAME.to_string(),
            scan_timeout: DEFAULT_SCAN_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            service_uuid: HM10_SERVICE_UUID,
            characteristic_uuid: HM10_CHARACTERISTIC_UUID,
        }
    }
}

impl BridgeConfig {
    /// Check the settings.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParameter`] for an empty device name or a zero
    /// timeout.
    pub fn validate(&self) -> Result<()> {
        if self.device_name.is_empty() {
            return Err(Error::InvalidParameter {
                name: "device_name".to_string(),
                value: String::new(),
            });
        }
        if self.scan_timeout.is_zero() {
            return Err(Error::InvalidParameter {
                name: "scan_timeout".to_string(),
                value: format!("{:?}", self.scan_timeout),
            });
        }
        if self.connect_timeout.is_zero() {
            return Err(Error::InvalidParameter {
                name: "connect_timeout".to_string(),
                value: format!("{:?}", self.connect_timeout),
            });
        }
        Ok(())
    }
}

/// Whether an input line is the exit command.
pub fn is_exit_command(line: &str) -> bool {
    line.trim().eq_ignore_ascii_case(EXIT_COMMAND)
}
