//! Plain-text rendering of scan results.
//!
//! Used for the `info` field of every response and by the console binary.

use std::fmt::Write as _;

use crate::ble::filter::MarkerFilter;
use crate::ble::gatt::CharacteristicValue;
use crate::session::{DeviceSummary, Outcome, ScanResponse};
use crate::utils::to_hex;

/// Render the report block for one device.
///
/// ```text
/// Device Address: AA:BB:CC:DD:EE:FF
/// Manufacturer Data: 50414c4d4b49
/// Connected to AA:BB:CC:DD:EE:FF
///   Service: 0000180a-0000-1000-8000-00805f9b34fb
///     Characteristic: 00002a29-0000-1000-8000-00805f9b34fb, Properties: [read]
///       Value: Acme
/// ```
pub fn render_info(device: &DeviceSummary, filter: &MarkerFilter) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Device Address: {}", device.address);

    // Prefer the entry that carried the marker.
    let marker_hex = to_hex(filter.marker().as_bytes());
    let entry = device
        .manufacturer_data
        .iter()
        .find(|e| contains_hex_bytes(&e.hex, &marker_hex))
        .or_else(|| device.manufacturer_data.first());
    if let Some(entry) = entry {
        let _ = writeln!(out, "Manufacturer Data: {}", entry.hex);
    }

    let Some(gatt) = &device.gatt else {
        return out;
    };

    if !gatt.connected {
        if let Some(error) = &gatt.error {
            let _ = writeln!(out, "Connection failed: {}", error);
        }
        return out;
    }

    let _ = writeln!(out, "Connected to {}", device.address);
    if let Some(error) = &gatt.error {
        let _ = writeln!(out, "  Service discovery failed: {}", error);
    }

    for service in &gatt.services {
        let _ = writeln!(out, "  Service: {}", service.uuid);
        for c in &service.characteristics {
            let _ = writeln!(
                out,
                "    Characteristic: {}, Properties: [{}]",
                c.uuid,
                c.properties.join(", ")
            );
            match (&c.value, &c.error) {
                (Some(CharacteristicValue::Text(text)), _) => {
                    let _ = writeln!(out, "      Value: {}", text);
                }
                (Some(CharacteristicValue::Hex(hex)), _) => {
                    let _ = writeln!(out, "      Value (hex): {}", hex);
                }
                (None, Some(error)) => {
                    let _ = writeln!(out, "      Could not read characteristic {}: {}", c.uuid, error);
                }
                (None, None) => {}
            }
        }
    }

    out
}

/// Whether `needle` occurs in `haystack` at a byte boundary. Both are hex.
fn contains_hex_bytes(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() || needle.len() > haystack.len() {
        return false;
    }
    (0..=haystack.len() - needle.len())
        .step_by(2)
        .any(|i| haystack[i..].starts_with(needle))
}

/// Render a full response for standard output.
pub fn render_console(response: &ScanResponse) -> String {
    let mut out = String::new();

    match response.outcome {
        Outcome::NoMatch => {
            let _ = writeln!(
                out,
                "No BLE package with '{}' found ({} devices seen).",
                response.marker, response.devices_seen
            );
            return out;
        }
        Outcome::Discovered => {
            for device in &response.devices {
                let _ = writeln!(
                    out,
                    "Device: {} ({}){}",
                    device.name.as_deref().unwrap_or("Unknown"),
                    device.address,
                    if device.marker_match { " *" } else { "" }
                );
                for entry in &device.manufacturer_data {
                    let _ = writeln!(
                        out,
                        "  Manufacturer {:#06x}: {}",
                        entry.company_id, entry.hex
                    );
                }
            }
        }
        _ => {}
    }

    let _ = writeln!(out, "Status: {}", response.status);
    if !response.info.is_empty() {
        out.push_str(&response.info);
        if !response.info.ends_with('\n') {
            out.push('\n');
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::gatt::{CharacteristicResult, ServiceResult};
    use crate::session::{ConnectionReport, ManufacturerEntry};
    use pretty_assertions::assert_eq;
    use uuid::Uuid;

    const SVC: Uuid = Uuid::from_u128(0x0000_180a_0000_1000_8000_00805f9b34fb);
    const NAME: Uuid = Uuid::from_u128(0x0000_2a29_0000_1000_8000_00805f9b34fb);
    const SERIAL: Uuid = Uuid::from_u128(0x0000_2a25_0000_1000_8000_00805f9b34fb);

    fn device(gatt: Option<ConnectionReport>) -> DeviceSummary {
        let mut device = DeviceSummary::from_address("AA:BB:CC:DD:EE:FF");
        device.manufacturer_data = vec![
            ManufacturerEntry {
                company_id: 0x004C,
                hex: "0215".to_string(),
                text: None,
            },
            ManufacturerEntry {
                company_id: 0xFFFF,
                hex: "50414c4d4b49".to_string(),
                text: Some("PALMKI".to_string()),
            },
        ];
        device.gatt = gatt;
        device
    }

    #[test]
    fn test_render_info_connected() {
        let gatt = ConnectionReport {
            connected: true,
            error: None,
            services: vec![ServiceResult {
                uuid: SVC,
                characteristics: vec![
                    CharacteristicResult {
                        uuid: NAME,
                        properties: vec!["read".into()],
                        readable: true,
                        value: Some(CharacteristicValue::Text("Acme".into())),
                        error: None,
                    },
                    CharacteristicResult {
                        uuid: SERIAL,
                        properties: vec!["read".into(), "notify".into()],
                        readable: true,
                        value: None,
                        error: Some("timed out".into()),
                    },
                ],
            }],
        };

        let info = render_info(&device(Some(gatt)), &MarkerFilter::new("PALMKI"));
        let expected = "\
Device Address: AA:BB:CC:DD:EE:FF
Manufacturer Data: 50414c4d4b49
Connected to AA:BB:CC:DD:EE:FF
  Service: 0000180a-0000-1000-8000-00805f9b34fb
    Characteristic: 00002a29-0000-1000-8000-00805f9b34fb, Properties: [read]
      Value: Acme
    Characteristic: 00002a25-0000-1000-8000-00805f9b34fb, Properties: [read, notify]
      Could not read characteristic 00002a25-0000-1000-8000-00805f9b34fb: timed out
";
        assert_eq!(info, expected);
    }

    #[test]
    fn test_render_info_not_connected() {
        let gatt = ConnectionReport {
            connected: false,
            error: Some("Device not found: AA:BB:CC:DD:EE:FF".into()),
            services: Vec::new(),
        };
        let info = render_info(&device(Some(gatt)), &MarkerFilter::new("PALMKI"));
        assert!(info.ends_with("Connection failed: Device not found: AA:BB:CC:DD:EE:FF\n"));
        assert!(!info.contains("Connected to"));
    }

    #[test]
    fn test_render_info_ignores_marker_across_byte_boundary() {
        let mut d = device(None);
        // 05 04 14 c4 d4 b4 90 spells the marker's hex one nibble off.
        d.manufacturer_data = vec![
            ManufacturerEntry {
                company_id: 0x0001,
                hex: "050414c4d4b490".to_string(),
                text: None,
            },
            ManufacturerEntry {
                company_id: 0xFFFF,
                hex: "0050414c4d4b49".to_string(),
                text: None,
            },
        ];

        let info = render_info(&d, &MarkerFilter::new("PALMKI"));
        assert!(info.contains("Manufacturer Data: 0050414c4d4b49\n"));
    }

    #[test]
    fn test_contains_hex_bytes() {
        assert!(contains_hex_bytes("0050414c", "5041"));
        assert!(!contains_hex_bytes("0504140c", "5041"));
        assert!(!contains_hex_bytes("50", "5041"));
        assert!(!contains_hex_bytes("5041", ""));
    }

    #[test]
    fn test_render_console_no_match() {
        let mut response = ScanResponse::timeout("PALMKI");
        response.outcome = Outcome::NoMatch;
        response.devices_seen = 3;
        assert_eq!(
            render_console(&response),
            "No BLE package with 'PALMKI' found (3 devices seen).\n"
        );
    }

    #[test]
    fn test_render_console_discovered() {
        let mut response = ScanResponse::timeout("PALMKI");
        response.outcome = Outcome::Discovered;
        response.status = "Found 1 devices".into();
        response.info.clear();
        let mut d = device(None);
        d.marker_match = true;
        response.devices = vec![d];

        let out = render_console(&response);
        assert!(out.starts_with("Device: Unknown (AA:BB:CC:DD:EE:FF) *\n"));
        assert!(out.contains("  Manufacturer 0xffff: 50414c4d4b49\n"));
        assert!(out.ends_with("Status: Found 1 devices\n"));
    }
}
