//! Utility functions for the hm10-bridge crate.

use std::fmt::Write as _;

use crate::ble::gatt::ServiceDescriptor;

/// Render a payload as text.
///
/// Valid UTF-8 is kept as is; every byte that is not part of a valid
/// sequence is rendered as `\xNN`. Never fails.
///
/// # Example
///
/// ```
/// use hm10_bridge::render_payload;
///
/// assert_eq!(render_payload(b"hi"), "hi");
/// assert_eq!(render_payload(&[0x68, 0xff, 0x69]), "h\\xffi");
/// ```
pub fn render_payload(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len());
    let mut rest = data;

    while !rest.is_empty() {
        match std::str::from_utf8(rest) {
            Ok(text) => {
                out.push_str(text);
                break;
            }
            Err(e) => {
                let (valid, after) = rest.split_at(e.valid_up_to());
                // `valid` was just checked by from_utf8.
                out.push_str(std::str::from_utf8(valid).unwrap_or_default());

                let bad = e.error_len().unwrap_or(after.len());
                for byte in &after[..bad] {
                    let _ = write!(out, "\\x{:02x}", byte);
                }
                rest = &after[bad..];
            }
        }
    }

    out
}

/// Lowercase hexadecimal encoding of a payload.
///
/// # Example
///
/// ```
/// use hm10_bridge::to_hex;
///
/// assert_eq!(to_hex(&[0x68, 0x69]), "6869");
/// ```
#[inline]
pub fn to_hex(data: &[u8]) -> String {
    hex::encode(data)
}

/// Multi-line report of a service table: services, their characteristics
/// with properties, and descriptors.
pub fn format_services(services: &[ServiceDescriptor]) -> String {
    let mut out = String::new();

    for service in services {
        let _ = writeln!(out, "\nService: {}", service.uuid);
        let _ = writeln!(out, "  Description: {}", service.description());

        for characteristic in &service.characteristics {
            let _ = writeln!(out, "  Characteristic: {}", characteristic.uuid);
            let _ = writeln!(out, "    Description: {}", characteristic.description());
            let _ = writeln!(out, "    Properties: {}", characteristic.properties);

            for descriptor in &characteristic.descriptors {
                let _ = writeln!(out, "      Descriptor: {}", descriptor);
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::gatt::{CharProperties, CharacteristicDescriptor};
    use crate::ble::uuids::{
        CLIENT_CHARACTERISTIC_CONFIG_UUID, HM10_CHARACTERISTIC_UUID, HM10_SERVICE_UUID,
    };
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn test_render_valid_utf8() {
        assert_eq!(render_payload(&[0x68, 0x69]), "hi");
        assert_eq!(render_payload("héllo".as_bytes()), "héllo");
        assert_eq!(render_payload(&[]), "");
    }

    #[test]
    fn test_render_invalid_bytes_as_hex() {
        assert_eq!(render_payload(&[0xff]), "\\xff");
        assert_eq!(render_payload(&[0x41, 0xc3]), "A\\xc3");
        assert_eq!(render_payload(&[0x41, 0x80, 0x80, 0x42]), "A\\x80\\x80B");
    }

    #[test]
    fn test_to_hex() {
        assert_eq!(to_hex(&[0x68, 0x69]), "6869");
        assert_eq!(to_hex(&[0x00, 0xab]), "00ab");
        assert_eq!(to_hex(&[]), "");
    }

    #[test]
    fn test_format_services() {
        let services = vec![ServiceDescriptor {
            uuid: HM10_SERVICE_UUID,
            primary: true,
            characteristics: vec![CharacteristicDescriptor {
                uuid: HM10_CHARACTERISTIC_UUID,
                service_uuid: HM10_SERVICE_UUID,
                properties: CharProperties {
                    read: true,
                    write_without_response: true,
                    notify: true,
                    ..Default::default()
                },
                descriptors: vec![CLIENT_CHARACTERISTIC_CONFIG_UUID],
            }],
        }];

        let expected = "\nService: 0000ffe0-0000-1000-8000-00805f9b34fb\n\
            \x20 Description: HM-10 Serial Service\n\
            \x20 Characteristic: 0000ffe1-0000-1000-8000-00805f9b34fb\n\
            \x20   Description: HM-10 Serial Data\n\
            \x20   Properties: read, write-without-response, notify\n\
            \x20     Descriptor: 00002902-0000-1000-8000-00805f9b34fb\n";
        assert_eq!(format_services(&services), expected);
    }

    proptest! {
        #[test]
        fn prop_valid_text_renders_unchanged(text in ".*") {
            prop_assert_eq!(render_payload(text.as_bytes()), text);
        }

        #[test]
        fn prop_render_never_panics(data in proptest::collection::vec(any::<u8>(), 0..64)) {
            let rendered = render_payload(&data);
            if std::str::from_utf8(&data).is_err() {
                prop_assert!(rendered.contains("\\x"));
            }
        }
    }
}
