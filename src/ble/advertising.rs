//! Advertisement snapshots.
//!
//! Captures what a peripheral advertised during one discovery window.

use btleplug::api::{BDAddr, PeripheralProperties};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::utils::to_hex;

/// One advertising device as seen during a discovery window.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Advertisement {
    /// Link-layer address, or the platform identifier where the OS hides
    /// the address (macOS).
    pub address: String,
    /// Advertised local name.
    pub name: Option<String>,
    /// Signal strength in dBm.
    pub rssi: Option<i16>,
    /// Advertised TX power level.
    pub tx_power: Option<i16>,
    /// Advertised service UUIDs.
    pub service_uuids: Vec<Uuid>,
    /// Service data keyed by service UUID.
    pub service_data: BTreeMap<Uuid, Vec<u8>>,
    /// Manufacturer-specific data keyed by company identifier.
    pub manufacturer_data: BTreeMap<u16, Vec<u8>>,
}

impl Advertisement {
    /// Create an advertisement with just an address.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Self::default()
        }
    }

    /// Build from peripheral properties reported by the adapter.
    ///
    /// `platform_id` is used as the address when the adapter reports an
    /// all-zero address.
    pub fn from_properties(platform_id: &str, properties: &PeripheralProperties) -> Self {
        let address = if properties.address == BDAddr::default() {
            platform_id.to_string()
        } else {
            properties.address.to_string()
        };

        let mut service_uuids = properties.services.clone();
        service_uuids.sort();

        Self {
            address,
            name: properties.local_name.clone(),
            rssi: properties.rssi,
            tx_power: properties.tx_power_level,
            service_uuids,
            service_data: properties
                .service_data
                .iter()
                .map(|(k, v)| (*k, v.clone()))
                .collect(),
            manufacturer_data: properties
                .manufacturer_data
                .iter()
                .map(|(k, v)| (*k, v.clone()))
                .collect(),
        }
    }

    /// Set the local name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the RSSI.
    pub fn with_rssi(mut self, rssi: i16) -> Self {
        self.rssi = Some(rssi);
        self
    }

    /// Add a manufacturer data entry.
    pub fn with_manufacturer_data(mut self, company_id: u16, data: impl Into<Vec<u8>>) -> Self {
        self.manufacturer_data.insert(company_id, data.into());
        self
    }

    /// Add a service data entry.
    pub fn with_service_data(mut self, service: Uuid, data: impl Into<Vec<u8>>) -> Self {
        self.service_data.insert(service, data.into());
        self
    }

    /// Manufacturer data for a company as UTF-8 text, if it decodes cleanly.
    pub fn manufacturer_text(&self, company_id: u16) -> Option<String> {
        self.manufacturer_data
            .get(&company_id)
            .and_then(|data| String::from_utf8(data.clone()).ok())
    }

    /// Manufacturer data for a company as lowercase hex.
    pub fn manufacturer_hex(&self, company_id: u16) -> Option<String> {
        self.manufacturer_data.get(&company_id).map(|d| to_hex(d))
    }

    /// Whether the device advertised any manufacturer data.
    pub fn has_manufacturer_data(&self) -> bool {
        !self.manufacturer_data.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manufacturer_text() {
        let adv = Advertisement::new("AA:BB:CC:DD:EE:FF")
            .with_manufacturer_data(0xFFFF, b"PALMKI-01".to_vec())
            .with_manufacturer_data(0x004C, vec![0xff, 0x00, 0x80]);

        assert_eq!(adv.manufacturer_text(0xFFFF).as_deref(), Some("PALMKI-01"));
        // Not valid UTF-8: no text, hex still available.
        assert_eq!(adv.manufacturer_text(0x004C), None);
        assert_eq!(adv.manufacturer_hex(0x004C).as_deref(), Some("ff0080"));
        assert_eq!(adv.manufacturer_hex(0x1234), None);
    }

    #[test]
    fn test_builder() {
        let adv = Advertisement::new("11:22:33:44:55:66")
            .with_name("Sensor")
            .with_rssi(-60);
        assert_eq!(adv.name.as_deref(), Some("Sensor"));
        assert_eq!(adv.rssi, Some(-60));
        assert!(!adv.has_manufacturer_data());
    }

    #[test]
    fn test_from_properties_uses_platform_id_for_hidden_address() {
        let mut properties = PeripheralProperties::default();
        properties.local_name = Some("Tag".to_string());
        properties.rssi = Some(-42);
        properties
            .manufacturer_data
            .insert(0x0059, b"PALMKI".to_vec());

        let adv = Advertisement::from_properties("5f1c-platform-id", &properties);
        assert_eq!(adv.address, "5f1c-platform-id");
        assert_eq!(adv.name.as_deref(), Some("Tag"));
        assert_eq!(adv.rssi, Some(-42));
        assert_eq!(adv.manufacturer_data.get(&0x0059), Some(&b"PALMKI".to_vec()));
    }
}
