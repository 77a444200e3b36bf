//! Error types for the hm10-bridge crate.

use thiserror::Error;

/// The main error type for this crate.
#[derive(Error, Debug)]
pub enum Error {
    /// Bluetooth-related error from the underlying BLE library.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// Bluetooth is not available or is disabled on this system.
    #[error("Bluetooth not available or disabled")]
    AdapterUnavailable,

    /// No device advertising the requested name was seen during the scan.
    #[error("Device not found: {name}")]
    DeviceNotFound {
        /// The advertised name that was searched for.
        name: String,
    },

    /// Failed to establish a connection or to discover its services.
    #[error("Connection failed: {reason}")]
    ConnectionFailed {
        /// Description of why the connection failed.
        reason: String,
    },

    /// The operation is only valid while the session is connected.
    #[error("Cannot {operation} while {state}")]
    InvalidState {
        /// The operation that was attempted.
        operation: &'static str,
        /// The session state at the time of the call.
        state: String,
    },

    /// Characteristic not found in the discovered service table.
    #[error("Characteristic not found: {uuid}")]
    CharacteristicNotFound {
        /// The UUID of the characteristic that was not found.
        uuid: String,
    },

    /// A write to a characteristic failed or is not permitted.
    #[error("Write to {uuid} failed: {reason}")]
    Write {
        /// The UUID of the target characteristic.
        uuid: String,
        /// Description of the failure.
        reason: String,
    },

    /// Enabling notifications on a characteristic failed or is not permitted.
    #[error("Subscribe to {uuid} failed: {reason}")]
    Subscribe {
        /// The UUID of the target characteristic.
        uuid: String,
        /// Description of the failure.
        reason: String,
    },

    /// Transport failure reported by a non-btleplug backend.
    #[error("Transport error: {reason}")]
    Transport {
        /// Description of the failure.
        reason: String,
    },

    /// An invalid parameter was provided.
    #[error("Invalid parameter: {name} = {value}")]
    InvalidParameter {
        /// The name of the parameter.
        name: String,
        /// The invalid value that was provided.
        value: String,
    },

    /// Reading input or writing output failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this error should abort the whole run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::AdapterUnavailable | Self::ConnectionFailed { .. })
    }
}

/// A specialized Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;
