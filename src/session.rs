//! Scan sessions.
//!
//! One session runs the discovery window, picks the device carrying the
//! marker, reads its GATT tree and folds everything into a
//! [`ScanResponse`]. Device-level failures become part of the response;
//! nothing here returns an error to the caller.

use async_trait::async_trait;
use chrono::{DateTime, Local};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::ble::advertising::Advertisement;
use crate::ble::filter::MarkerFilter;
use crate::ble::gatt::{read_characteristics, GattPeripheral, ServiceResult};
use crate::config::ScanConfig;
use crate::error::{Error, Result};
use crate::report::render_info;
use crate::utils::to_hex;

/// Where advertisements and connectable devices come from.
#[async_trait]
pub trait DeviceSource: Send + Sync {
    /// Collect advertisements for one window, optionally ending at the
    /// first advertisement `early_stop` accepts.
    async fn discover(
        &self,
        window: Duration,
        early_stop: Option<&MarkerFilter>,
    ) -> Result<Vec<Advertisement>>;

    /// Look up a device by address for a GATT session.
    async fn open(&self, address: &str) -> Result<Box<dyn GattPeripheral>>;
}

/// How a scan request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// The target was connected and its characteristics were read.
    Finished,
    /// No advertisement carried the marker.
    NoMatch,
    /// Devices were listed without connecting.
    Discovered,
    /// The target could not be connected.
    ConnectFailed,
    /// Connected, but the GATT exchange failed.
    CommunicationError,
    /// The adapter failed during discovery.
    BluetoothError,
    /// The request ran past its time limit.
    Timeout,
    /// The request failed for a reason unrelated to the device.
    InternalError,
}

/// One manufacturer data entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManufacturerEntry {
    /// Company identifier.
    pub company_id: u16,
    /// Payload as lowercase hex.
    pub hex: String,
    /// Payload as text, when it is valid UTF-8.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

/// Result of a GATT session with one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionReport {
    /// Whether the connection was established.
    pub connected: bool,
    /// Connection or discovery error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Services read from the device.
    pub services: Vec<ServiceResult>,
}

impl ConnectionReport {
    fn failed(error: &Error) -> Self {
        Self {
            connected: false,
            error: Some(error.to_string()),
            services: Vec::new(),
        }
    }
}

/// Everything known about one device in a response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceSummary {
    /// Address used to reach the device.
    pub address: String,
    /// Advertised name.
    pub name: Option<String>,
    /// Signal strength in dBm.
    pub rssi: Option<i16>,
    /// Advertised TX power.
    pub tx_power: Option<i16>,
    /// Advertised service UUIDs.
    pub service_uuids: Vec<Uuid>,
    /// Manufacturer data entries, ordered by company id.
    pub manufacturer_data: Vec<ManufacturerEntry>,
    /// Service data as lowercase hex, keyed by service UUID.
    pub service_data: BTreeMap<Uuid, String>,
    /// Whether the manufacturer data contains the marker.
    pub marker_match: bool,
    /// GATT session result, present when a connection was attempted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gatt: Option<ConnectionReport>,
}

impl DeviceSummary {
    /// Summarize an advertisement.
    pub fn from_advertisement(adv: &Advertisement, filter: &MarkerFilter) -> Self {
        Self {
            address: adv.address.clone(),
            name: adv.name.clone(),
            rssi: adv.rssi,
            tx_power: adv.tx_power,
            service_uuids: adv.service_uuids.clone(),
            manufacturer_data: adv
                .manufacturer_data
                .iter()
                .map(|(company_id, data)| ManufacturerEntry {
                    company_id: *company_id,
                    hex: to_hex(data),
                    text: String::from_utf8(data.clone()).ok(),
                })
                .collect(),
            service_data: adv
                .service_data
                .iter()
                .map(|(uuid, data)| (*uuid, to_hex(data)))
                .collect(),
            marker_match: filter.is_match(adv),
            gatt: None,
        }
    }

    /// Summary for a device known only by address.
    pub fn from_address(address: &str) -> Self {
        Self {
            address: address.to_string(),
            name: None,
            rssi: None,
            tx_power: None,
            service_uuids: Vec::new(),
            manufacturer_data: Vec::new(),
            service_data: BTreeMap::new(),
            marker_match: false,
            gatt: None,
        }
    }
}

/// Body of every scan endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanResponse {
    /// Machine-readable outcome.
    pub outcome: Outcome,
    /// Human-readable status line.
    pub status: String,
    /// Multi-line report of the target device.
    pub info: String,
    /// Marker the scan looked for.
    pub marker: String,
    /// When the response was produced.
    pub timestamp: DateTime<Local>,
    /// Number of devices heard during the window.
    pub devices_seen: usize,
    /// Reported devices.
    pub devices: Vec<DeviceSummary>,
}

impl ScanResponse {
    fn new(outcome: Outcome, status: impl Into<String>, marker: &str) -> Self {
        Self {
            outcome,
            status: status.into(),
            info: String::new(),
            marker: marker.to_string(),
            timestamp: Local::now(),
            devices_seen: 0,
            devices: Vec::new(),
        }
    }

    /// Response for a request that exceeded its time limit.
    pub fn timeout(marker: &str) -> Self {
        let mut response = Self::new(Outcome::Timeout, "Timeout", marker);
        response.info = "BLE operation timed out.".to_string();
        response
    }

    /// Response for a failure outside the BLE pipeline.
    pub fn internal_error(marker: &str, message: impl Into<String>) -> Self {
        let mut response = Self::new(Outcome::InternalError, "Internal error", marker);
        response.info = message.into();
        response
    }
}

/// Runs the discovery and GATT retrieval pipeline.
#[derive(Clone)]
pub struct ScanSession {
    source: Arc<dyn DeviceSource>,
    config: ScanConfig,
    filter: MarkerFilter,
}

impl ScanSession {
    /// Create a session over a device source.
    pub fn new(source: Arc<dyn DeviceSource>, config: ScanConfig) -> Self {
        let filter = MarkerFilter::new(&config.marker);
        Self {
            source,
            config,
            filter,
        }
    }

    /// Get the configuration.
    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// Discover, select the marked device, connect and read it.
    pub async fn run(&self) -> ScanResponse {
        info!("Scanning for BLE devices carrying '{}'", self.config.marker);

        let early_stop = self.config.stop_on_first_match.then_some(&self.filter);
        let advertisements = match self
            .source
            .discover(self.config.scan_window, early_stop)
            .await
        {
            Ok(ads) => ads,
            Err(e) => return self.bluetooth_error(e),
        };

        for adv in advertisements.iter().filter(|a| a.has_manufacturer_data()) {
            debug!(
                "Device: {:?} ({}) manufacturer data {:?}",
                adv.name, adv.address, adv.manufacturer_data
            );
        }

        let Some(target) = self
            .filter
            .select_target(&advertisements, self.config.selection)
        else {
            info!("No BLE package found");
            let mut response = ScanResponse::new(
                Outcome::NoMatch,
                "No BLE package found",
                &self.config.marker,
            );
            response.devices_seen = advertisements.len();
            return response;
        };

        info!("Marker found on {}", target.address);
        let summary = DeviceSummary::from_advertisement(target, &self.filter);
        let mut response = self.retrieve(summary).await;
        response.devices_seen = advertisements.len();
        response
    }

    /// Discover every device in the window without connecting.
    pub async fn discover_all(&self) -> ScanResponse {
        info!("Scanning for all BLE devices");

        let advertisements = match self.source.discover(self.config.scan_window, None).await {
            Ok(ads) => ads,
            Err(e) => return self.bluetooth_error(e),
        };

        let devices: Vec<_> = advertisements
            .iter()
            .map(|adv| DeviceSummary::from_advertisement(adv, &self.filter))
            .collect();

        let mut response = ScanResponse::new(
            Outcome::Discovered,
            format!("Found {} devices", devices.len()),
            &self.config.marker,
        );
        response.devices_seen = devices.len();
        response.devices = devices;
        response
    }

    /// Connect to a caller-chosen address and read it.
    pub async fn read_device(&self, address: &str) -> ScanResponse {
        self.retrieve(DeviceSummary::from_address(address)).await
    }

    /// GATT retrieval for one device; the outcome reflects how far it got.
    async fn retrieve(&self, mut summary: DeviceSummary) -> ScanResponse {
        let address = summary.address.clone();

        let (outcome, status, report) = match self.gatt_session(&address).await {
            Ok(report) => {
                let (outcome, status) = match &report.error {
                    None => (Outcome::Finished, "Finished".to_string()),
                    Some(e) => (
                        Outcome::CommunicationError,
                        format!("Error during connection or communication: {}", e),
                    ),
                };
                (outcome, status, report)
            }
            Err(e) => (
                Outcome::ConnectFailed,
                connect_status(&address, &e),
                ConnectionReport::failed(&e),
            ),
        };

        summary.gatt = Some(report);

        let mut response = ScanResponse::new(outcome, status, &self.config.marker);
        response.info = render_info(&summary, &self.filter);
        response.devices = vec![summary];
        info!("GATT session with {} finished: {:?}", address, outcome);
        response
    }

    /// Open, connect, enumerate and read. At most one connection is held.
    ///
    /// Fails only when the device could not be opened or connected.
    async fn gatt_session(&self, address: &str) -> Result<ConnectionReport> {
        let device: Arc<dyn GattPeripheral> = match self.source.open(address).await {
            Ok(device) => Arc::from(device),
            Err(e) => {
                warn!("Could not open {}: {}", address, e);
                return Err(e);
            }
        };

        info!("Creating GATT session with {}", address);
        let connection = ConnectionGuard::new(device.clone());
        if let Err(e) = device.connect(self.config.connect_timeout).await {
            warn!("Failed to connect to {}: {}", address, e);
            connection.release();
            return Err(e);
        }

        let result = read_characteristics(device.as_ref(), self.config.read_mode).await;
        connection.disconnect().await;

        Ok(match result {
            Ok(services) => ConnectionReport {
                connected: true,
                error: None,
                services,
            },
            Err(e) => ConnectionReport {
                connected: true,
                error: Some(e.to_string()),
                services: Vec::new(),
            },
        })
    }

    fn bluetooth_error(&self, error: Error) -> ScanResponse {
        warn!("Bluetooth error during discovery: {}", error);
        let mut response =
            ScanResponse::new(Outcome::BluetoothError, "Bluetooth error", &self.config.marker);
        response.info = error.to_string();
        response
    }
}

/// Status line for a device that could not be opened or connected.
fn connect_status(address: &str, error: &Error) -> String {
    match error {
        Error::ConnectionFailed { .. } => format!("Failed to connect to {}", address),
        other => format!("Error during connection or communication: {}", other),
    }
}

/// Disconnects a device when the session ends, including when the task
/// running the session is cancelled mid-exchange.
struct ConnectionGuard {
    device: Arc<dyn GattPeripheral>,
    armed: bool,
}

impl ConnectionGuard {
    fn new(device: Arc<dyn GattPeripheral>) -> Self {
        Self {
            device,
            armed: true,
        }
    }

    /// Forget the device without disconnecting it.
    fn release(mut self) {
        self.armed = false;
    }

    async fn disconnect(mut self) {
        disconnect(self.device.clone()).await;
        self.armed = false;
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let device = self.device.clone();
        warn!("GATT session with {} interrupted, disconnecting", device.address());
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(disconnect(device));
            }
            Err(_) => warn!("No runtime left to disconnect {}", device.address()),
        }
    }
}

async fn disconnect(device: Arc<dyn GattPeripheral>) {
    if let Err(e) = device.disconnect().await {
        warn!("Failed to disconnect from {}: {}", device.address(), e);
    }
}
