//! GATT enumeration and characteristic reads.
//!
//! [`GattPeripheral`] is the seam between the scan session and the BLE
//! library. [`read_characteristics`] walks the service tree and reads every
//! readable characteristic, capturing failures per characteristic.

use async_trait::async_trait;
use btleplug::api::{CharPropFlags, Characteristic, Peripheral as _};
use btleplug::platform::Peripheral;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::config::ReadMode;
use crate::error::{Error, Result};
use crate::utils::to_hex;

/// A characteristic as reported by service discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicInfo {
    /// Characteristic UUID.
    pub uuid: Uuid,
    /// UUID of the owning service.
    pub service_uuid: Uuid,
    /// Declared properties.
    pub properties: CharPropFlags,
}

impl CharacteristicInfo {
    /// Create a characteristic description.
    pub fn new(service_uuid: Uuid, uuid: Uuid, properties: CharPropFlags) -> Self {
        Self {
            uuid,
            service_uuid,
            properties,
        }
    }

    /// Whether the characteristic declares the read property.
    pub fn is_readable(&self) -> bool {
        self.properties.contains(CharPropFlags::READ)
    }
}

impl From<&Characteristic> for CharacteristicInfo {
    fn from(c: &Characteristic) -> Self {
        Self::new(c.service_uuid, c.uuid, c.properties)
    }
}

/// A service and its characteristics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInfo {
    /// Service UUID.
    pub uuid: Uuid,
    /// Characteristics in discovery order.
    pub characteristics: Vec<CharacteristicInfo>,
}

/// Lowercase property names, e.g. `["read", "notify"]`.
pub fn property_names(flags: CharPropFlags) -> Vec<String> {
    const NAMES: [(CharPropFlags, &str); 8] = [
        (CharPropFlags::BROADCAST, "broadcast"),
        (CharPropFlags::READ, "read"),
        (CharPropFlags::WRITE_WITHOUT_RESPONSE, "write-without-response"),
        (CharPropFlags::WRITE, "write"),
        (CharPropFlags::NOTIFY, "notify"),
        (CharPropFlags::INDICATE, "indicate"),
        (
            CharPropFlags::AUTHENTICATED_SIGNED_WRITES,
            "authenticated-signed-writes",
        ),
        (CharPropFlags::EXTENDED_PROPERTIES, "extended-properties"),
    ];

    NAMES
        .iter()
        .filter(|(flag, _)| flags.contains(*flag))
        .map(|(_, name)| name.to_string())
        .collect()
}

/// A characteristic value, as text when it is valid UTF-8.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CharacteristicValue {
    /// The bytes decoded as UTF-8.
    Text(String),
    /// Lowercase hex of bytes that are not valid UTF-8.
    Hex(String),
}

impl CharacteristicValue {
    /// Decode raw bytes.
    pub fn from_bytes(data: Vec<u8>) -> Self {
        match String::from_utf8(data) {
            Ok(text) => Self::Text(text),
            Err(e) => Self::Hex(to_hex(e.as_bytes())),
        }
    }
}

/// Outcome for one characteristic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CharacteristicResult {
    /// Characteristic UUID.
    pub uuid: Uuid,
    /// Declared property names.
    pub properties: Vec<String>,
    /// Whether the characteristic declares the read property.
    pub readable: bool,
    /// Value read, if a read was attempted and succeeded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<CharacteristicValue>,
    /// Error message, if a read was attempted and failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CharacteristicResult {
    fn unread(info: &CharacteristicInfo) -> Self {
        Self {
            uuid: info.uuid,
            properties: property_names(info.properties),
            readable: info.is_readable(),
            value: None,
            error: None,
        }
    }
}

/// Outcome for one service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceResult {
    /// Service UUID.
    pub uuid: Uuid,
    /// Characteristic outcomes in discovery order.
    pub characteristics: Vec<CharacteristicResult>,
}

/// A connectable GATT server.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GattPeripheral: Send + Sync {
    /// Address used to reach the device.
    fn address(&self) -> String;

    /// Open a connection. `None` uses the library's own timeout.
    async fn connect(&self, timeout: Option<Duration>) -> Result<()>;

    /// Discover and return the service tree.
    async fn discover_services(&self) -> Result<Vec<ServiceInfo>>;

    /// Read one characteristic.
    async fn read(&self, characteristic: &CharacteristicInfo) -> Result<Vec<u8>>;

    /// Close the connection.
    async fn disconnect(&self) -> Result<()>;
}

/// Enumerate the service tree and read characteristics according to `mode`.
///
/// Only characteristics with the read property are read. A failed read is
/// recorded in that characteristic's `error` and enumeration continues.
/// Fails only when service discovery itself fails.
pub async fn read_characteristics(
    device: &dyn GattPeripheral,
    mode: ReadMode,
) -> Result<Vec<ServiceResult>> {
    let services = device.discover_services().await?;
    debug!(
        "Discovered {} services on {}",
        services.len(),
        device.address()
    );

    let mut results = Vec::with_capacity(services.len());
    let mut found_target = false;

    for service in &services {
        let mut characteristics = Vec::new();

        for info in &service.characteristics {
            if let ReadMode::Single {
                service: s,
                characteristic: c,
            } = mode
            {
                if info.service_uuid != s || info.uuid != c {
                    continue;
                }
                found_target = true;
            }

            let mut result = CharacteristicResult::unread(info);
            if result.readable {
                match device.read(info).await {
                    Ok(data) => {
                        trace!("Read {} bytes from characteristic {}", data.len(), info.uuid);
                        result.value = Some(CharacteristicValue::from_bytes(data));
                    }
                    Err(e) => {
                        warn!("Could not read characteristic {}: {}", info.uuid, e);
                        result.error = Some(e.to_string());
                    }
                }
            }
            characteristics.push(result);
        }

        if !characteristics.is_empty() || matches!(mode, ReadMode::AllReadable) {
            results.push(ServiceResult {
                uuid: service.uuid,
                characteristics,
            });
        }
    }

    if let ReadMode::Single {
        service,
        characteristic,
    } = mode
    {
        if !found_target {
            warn!("Target characteristic {} not present", characteristic);
            results.push(ServiceResult {
                uuid: service,
                characteristics: vec![CharacteristicResult {
                    uuid: characteristic,
                    properties: Vec::new(),
                    readable: false,
                    value: None,
                    error: Some(
                        Error::CharacteristicNotFound {
                            uuid: characteristic.to_string(),
                        }
                        .to_string(),
                    ),
                }],
            });
        }
    }

    Ok(results)
}

/// [`GattPeripheral`] backed by a btleplug peripheral.
pub struct BlePeripheral {
    peripheral: Peripheral,
    address: String,
}

impl BlePeripheral {
    /// Wrap a peripheral reachable at `address`.
    pub fn new(peripheral: Peripheral, address: impl Into<String>) -> Self {
        Self {
            peripheral,
            address: address.into(),
        }
    }
}

#[async_trait]
impl GattPeripheral for BlePeripheral {
    fn address(&self) -> String {
        self.address.clone()
    }

    async fn connect(&self, timeout: Option<Duration>) -> Result<()> {
        let connected = match self.peripheral.is_connected().await {
            Ok(connected) => connected,
            Err(e) => {
                debug!("Could not query connection state of {}: {}", self.address, e);
                false
            }
        };
        if connected {
            debug!("Peripheral {} already connected", self.address);
            return Ok(());
        }

        info!("Connecting to {}", self.address);

        match timeout {
            Some(limit) => tokio::time::timeout(limit, self.peripheral.connect())
                .await
                .map_err(|_| Error::ConnectTimeout {
                    seconds: limit.as_secs_f64(),
                })??,
            None => self.peripheral.connect().await?,
        }

        if !self.peripheral.is_connected().await? {
            return Err(Error::ConnectionFailed {
                reason: format!("Failed to connect to {}", self.address),
            });
        }

        info!("Connected to {}", self.address);
        Ok(())
    }

    async fn discover_services(&self) -> Result<Vec<ServiceInfo>> {
        self.peripheral.discover_services().await?;

        Ok(self
            .peripheral
            .services()
            .iter()
            .map(|service| ServiceInfo {
                uuid: service.uuid,
                characteristics: service
                    .characteristics
                    .iter()
                    .map(CharacteristicInfo::from)
                    .collect(),
            })
            .collect())
    }

    async fn read(&self, characteristic: &CharacteristicInfo) -> Result<Vec<u8>> {
        let target = self
            .peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == characteristic.uuid && c.service_uuid == characteristic.service_uuid)
            .ok_or_else(|| Error::CharacteristicNotFound {
                uuid: characteristic.uuid.to_string(),
            })?;

        Ok(self.peripheral.read(&target).await?)
    }

    async fn disconnect(&self) -> Result<()> {
        self.peripheral.disconnect().await?;
        debug!("Disconnected from {}", self.address);
        Ok(())
    }
}
