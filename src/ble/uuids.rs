//! BLE Service and Characteristic UUIDs.
//!
//! Contains the HM-10 UUID constants and a lookup table of human-readable
//! names for well-known Bluetooth SIG attributes.

use uuid::Uuid;

// HM-10 serial module
/// HM-10 serial service UUID.
pub const HM10_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000_ffe0_0000_1000_8000_00805f9b34fb);
/// HM-10 serial characteristic UUID (Read, Write Without Response, Notify).
pub const HM10_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x0000_ffe1_0000_1000_8000_00805f9b34fb);

// Generic Access / Generic Attribute (Standard BLE)
/// Generic Access service UUID.
pub const GENERIC_ACCESS_SERVICE_UUID: Uuid =
    Uuid::from_u128(0x0000_1800_0000_1000_8000_00805f9b34fb);
/// Generic Attribute service UUID.
pub const GENERIC_ATTRIBUTE_SERVICE_UUID: Uuid =
    Uuid::from_u128(0x0000_1801_0000_1000_8000_00805f9b34fb);
/// Device Information service UUID.
pub const DEVICE_INFO_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000_180a_0000_1000_8000_00805f9b34fb);

/// Client Characteristic Configuration descriptor UUID.
pub const CLIENT_CHARACTERISTIC_CONFIG_UUID: Uuid =
    Uuid::from_u128(0x0000_2902_0000_1000_8000_00805f9b34fb);

/// Suffix shared by every 16-bit UUID expanded onto the Bluetooth base UUID.
const BLUETOOTH_BASE_UUID: u128 = 0x0000_0000_0000_1000_8000_00805f9b34fb;

/// Expand a 16-bit assigned number onto the Bluetooth base UUID.
pub const fn uuid_from_u16(short: u16) -> Uuid {
    Uuid::from_u128(BLUETOOTH_BASE_UUID | ((short as u128) << 96))
}

/// Return the 16-bit assigned number if `uuid` sits on the Bluetooth base UUID.
pub fn short_uuid(uuid: &Uuid) -> Option<u16> {
    let value = uuid.as_u128();
    let mask = !(0xffff_ffff_u128 << 96);
    if value & mask == BLUETOOTH_BASE_UUID && value >> 112 == 0 {
        Some((value >> 96) as u16)
    } else {
        None
    }
}

/// Human-readable name of a well-known service, characteristic or descriptor.
///
/// Returns `"Unknown"` for anything outside the table.
pub fn describe(uuid: &Uuid) -> &'static str {
    let Some(short) = short_uuid(uuid) else {
        return "Unknown";
    };

    match short {
        // Services
        0x1800 => "Generic Access Profile",
        0x1801 => "Generic Attribute Profile",
        0x180a => "Device Information",
        0x180f => "Battery Service",
        0xffe0 => "HM-10 Serial Service",
        // Characteristics
        0x2a00 => "Device Name",
        0x2a01 => "Appearance",
        0x2a02 => "Peripheral Privacy Flag",
        0x2a03 => "Reconnection Address",
        0x2a04 => "Peripheral Preferred Connection Parameters",
        0x2a05 => "Service Changed",
        0x2a19 => "Battery Level",
        0x2a23 => "System ID",
        0x2a24 => "Model Number String",
        0x2a25 => "Serial Number String",
        0x2a26 => "Firmware Revision String",
        0x2a27 => "Hardware Revision String",
        0x2a28 => "Software Revision String",
        0x2a29 => "Manufacturer Name String",
        0x2a2a => "IEEE 11073-20601 Regulatory Cert. Data List",
        0x2a50 => "PnP ID",
        0xffe1 => "HM-10 Serial Data",
        // Descriptors
        0x2900 => "Characteristic Extended Properties",
        0x2901 => "Characteristic User Description",
        0x2902 => "Client Characteristic Configuration",
        0x2903 => "Server Characteristic Configuration",
        0x2904 => "Characteristic Presentation Format",
        _ => "Unknown",
    }
}

/// Check if a service UUID is the HM-10 serial service.
pub fn is_hm10_service(uuid: &Uuid) -> bool {
    *uuid == HM10_SERVICE_UUID
}
