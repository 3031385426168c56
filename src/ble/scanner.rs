//! BLE scanning functionality.
//!
//! Provides the scanner that collects advertisements over a bounded
//! discovery window and reopens devices by address.

use async_trait::async_trait;
use btleplug::api::{Central, CentralEvent, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::pin_mut;
use futures::stream::{Stream, StreamExt};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::ble::advertising::Advertisement;
use crate::ble::filter::MarkerFilter;
use crate::ble::gatt::{BlePeripheral, GattPeripheral};
use crate::error::{Error, Result};
use crate::session::DeviceSource;

/// Advertisements collected during one window, in first-seen order.
#[derive(Debug, Default)]
struct Collected {
    order: Vec<String>,
    by_address: HashMap<String, Advertisement>,
}

impl Collected {
    /// Insert or refresh an advertisement. Returns the merged entry.
    fn upsert(&mut self, adv: Advertisement) -> &Advertisement {
        let address = adv.address.clone();
        match self.by_address.get_mut(&address) {
            Some(existing) => {
                // Later packets can omit fields an earlier one carried.
                existing.manufacturer_data.extend(adv.manufacturer_data);
                existing.service_data.extend(adv.service_data);
                if adv.name.is_some() {
                    existing.name = adv.name;
                }
                if adv.rssi.is_some() {
                    existing.rssi = adv.rssi;
                }
                if adv.tx_power.is_some() {
                    existing.tx_power = adv.tx_power;
                }
                for uuid in adv.service_uuids {
                    if !existing.service_uuids.contains(&uuid) {
                        existing.service_uuids.push(uuid);
                    }
                }
            }
            None => {
                self.order.push(address.clone());
                self.by_address.insert(address.clone(), adv);
            }
        }
        &self.by_address[&address]
    }

    fn into_vec(mut self) -> Vec<Advertisement> {
        self.order
            .iter()
            .filter_map(|a| self.by_address.remove(a))
            .collect()
    }
}

/// Collect advertisements from `stream` until `window` elapses or the
/// stream ends. With `early_stop`, collection also ends at the first
/// merged advertisement the filter accepts.
pub(crate) async fn collect_window<S>(
    stream: S,
    window: Duration,
    early_stop: Option<&MarkerFilter>,
) -> Vec<Advertisement>
where
    S: Stream<Item = Advertisement>,
{
    pin_mut!(stream);
    let deadline = Instant::now() + window;
    let mut collected = Collected::default();

    loop {
        let adv = match tokio::time::timeout_at(deadline, stream.next()).await {
            Ok(Some(adv)) => adv,
            Ok(None) => {
                debug!("Adapter event stream ended");
                break;
            }
            Err(_) => break,
        };

        let merged = collected.upsert(adv);
        if let Some(filter) = early_stop {
            if filter.is_match(merged) {
                info!("Marker found on {}, ending scan early", merged.address);
                break;
            }
        }
    }

    collected.into_vec()
}

/// Stops an active scan. Dropping it without [`ScanGuard::stop`], e.g. when
/// the scanning task is cancelled, stops the scan in the background.
struct ScanGuard {
    adapter: Option<Adapter>,
}

impl ScanGuard {
    fn new(adapter: Adapter) -> Self {
        Self {
            adapter: Some(adapter),
        }
    }

    async fn stop(mut self) {
        if let Some(adapter) = self.adapter.take() {
            stop_scan(adapter).await;
        }
    }
}

impl Drop for ScanGuard {
    fn drop(&mut self) {
        let Some(adapter) = self.adapter.take() else {
            return;
        };
        debug!("Scan interrupted, stopping in the background");
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(stop_scan(adapter));
            }
            Err(_) => warn!("No runtime left to stop the scan"),
        }
    }
}

async fn stop_scan(adapter: Adapter) {
    if let Err(e) = adapter.stop_scan().await {
        warn!("Failed to stop scan: {}", e);
    }
}

/// BLE scanner bound to one adapter.
pub struct BleScanner {
    /// The BLE adapter to use for scanning.
    adapter: Adapter,
    /// Peripherals seen in the last window, by address.
    peripherals: Arc<RwLock<HashMap<String, Peripheral>>>,
}

impl BleScanner {
    /// Create a new BLE scanner on the first adapter.
    ///
    /// # Errors
    ///
    /// Returns an error if Bluetooth is not available.
    pub async fn new() -> Result<Self> {
        let manager = Manager::new()
            .await
            .map_err(|_e| Error::BluetoothUnavailable)?;

        let adapters = manager.adapters().await.map_err(Error::Bluetooth)?;

        let adapter = adapters
            .into_iter()
            .next()
            .ok_or(Error::BluetoothUnavailable)?;

        info!(
            "Using Bluetooth adapter: {:?}",
            adapter.adapter_info().await.ok()
        );

        Ok(Self::with_adapter(adapter))
    }

    /// Create a new BLE scanner with a specific adapter.
    pub fn with_adapter(adapter: Adapter) -> Self {
        Self {
            adapter,
            peripherals: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Poll for an adapter until one is available or `total` elapses.
    ///
    /// Covers hosts where Bluetooth is switched off at startup.
    pub async fn wait_until_available(total: Duration, step: Duration) -> Result<Self> {
        let deadline = Instant::now() + total;
        loop {
            match Self::new().await {
                Ok(scanner) => return Ok(scanner),
                Err(e) if Instant::now() + step > deadline => {
                    warn!("Bluetooth still unavailable: {}", e);
                    return Err(Error::BluetoothUnavailable);
                }
                Err(e) => {
                    debug!("Bluetooth not ready ({}), retrying in {:?}", e, step);
                    tokio::time::sleep(step).await;
                }
            }
        }
    }

    /// Get the underlying adapter.
    pub fn adapter(&self) -> &Adapter {
        &self.adapter
    }

    /// Listen for advertisements for `window`.
    ///
    /// With `early_stop`, listening ends at the first advertisement the
    /// filter accepts. Each call starts from an empty collection.
    pub async fn scan(
        &self,
        window: Duration,
        early_stop: Option<&MarkerFilter>,
    ) -> Result<Vec<Advertisement>> {
        let events = self.adapter.events().await?;

        info!("Starting BLE scan for {:?}", window);
        self.adapter.start_scan(ScanFilter::default()).await?;
        let scanning = ScanGuard::new(self.adapter.clone());
        self.peripherals.write().clear();

        let stream = events.filter_map(move |event| async move {
            let Some(id) = Self::advertising_peripheral(event) else {
                return None;
            };
            self.process_peripheral(&id).await
        });
        let advertisements = collect_window(stream, window, early_stop).await;

        scanning.stop().await;
        info!("Scan finished, {} devices seen", advertisements.len());
        Ok(advertisements)
    }

    /// Find a peripheral by address or platform identifier.
    ///
    /// Looks in the last window first, then in everything the adapter knows.
    pub async fn find_peripheral(&self, address: &str) -> Result<Peripheral> {
        if let Some(p) = self.peripherals.read().get(address).cloned() {
            return Ok(p);
        }

        for p in self.adapter.peripherals().await? {
            if p.address().to_string().eq_ignore_ascii_case(address)
                || p.id().to_string() == address
            {
                return Ok(p);
            }
        }

        Err(Error::DeviceNotFound {
            address: address.to_string(),
        })
    }

    /// Map a central event to the peripheral whose advertisement changed.
    fn advertising_peripheral(event: CentralEvent) -> Option<PeripheralId> {
        match event {
            CentralEvent::DeviceDiscovered(id) => {
                trace!("Device discovered: {:?}", id);
                Some(id)
            }
            CentralEvent::DeviceUpdated(id) => {
                trace!("Device updated: {:?}", id);
                Some(id)
            }
            CentralEvent::ManufacturerDataAdvertisement { id, .. } => {
                trace!("Manufacturer data advertisement: {:?}", id);
                Some(id)
            }
            CentralEvent::ServiceDataAdvertisement { id, .. } => Some(id),
            CentralEvent::ServicesAdvertisement { id, .. } => Some(id),
            CentralEvent::DeviceConnected(id) => {
                debug!("Device connected: {:?}", id);
                None
            }
            CentralEvent::DeviceDisconnected(id) => {
                debug!("Device disconnected: {:?}", id);
                None
            }
            CentralEvent::StateUpdate(state) => {
                debug!("Adapter state: {:?}", state);
                None
            }
        }
    }

    /// Snapshot a peripheral's current properties.
    async fn process_peripheral(&self, id: &PeripheralId) -> Option<Advertisement> {
        let peripheral = match self.adapter.peripheral(id).await {
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

        let adv = Advertisement::from_properties(&id.to_string(), &properties);
        self.peripherals
            .write()
            .insert(adv.address.clone(), peripheral);

        Some(adv)
    }
}

#[async_trait]
impl DeviceSource for BleScanner {
    async fn discover(
        &self,
        window: Duration,
        early_stop: Option<&MarkerFilter>,
    ) -> Result<Vec<Advertisement>> {
        self.scan(window, early_stop).await
    }

    async fn open(&self, address: &str) -> Result<Box<dyn GattPeripheral>> {
        let peripheral = self.find_peripheral(address).await?;
        Ok(Box::new(BlePeripheral::new(peripheral, address)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn marked(address: &str) -> Advertisement {
        Advertisement::new(address).with_manufacturer_data(0xFFFF, b"PALMKI".to_vec())
    }

    fn addresses(ads: &[Advertisement]) -> Vec<&str> {
        ads.iter().map(|a| a.address.as_str()).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_stops_at_first_match() {
        let filter = MarkerFilter::new("PALMKI");
        let ads = stream::iter(vec![Advertisement::new("A"), marked("B"), marked("C")])
            .chain(stream::pending());
        let start = Instant::now();

        let collected = collect_window(ads, Duration::from_secs(5), Some(&filter)).await;

        assert_eq!(addresses(&collected), vec!["A", "B"]);
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_without_early_stop_runs_to_deadline() {
        let ads = stream::iter(vec![Advertisement::new("A"), marked("B"), marked("C")])
            .chain(stream::pending());
        let start = Instant::now();

        let collected = collect_window(ads, Duration::from_secs(5), None).await;

        assert_eq!(addresses(&collected), vec!["A", "B", "C"]);
        assert!(start.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_drops_late_advertisements() {
        let filter = MarkerFilter::new("PALMKI");
        let late = stream::once(async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            marked("LATE")
        });
        let ads = stream::iter(vec![Advertisement::new("A")]).chain(late);

        let collected = collect_window(ads, Duration::from_secs(5), Some(&filter)).await;

        assert_eq!(addresses(&collected), vec!["A"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_merges_repeat_advertisements_before_matching() {
        let filter = MarkerFilter::new("PALMKI");
        let ads = stream::iter(vec![
            Advertisement::new("A").with_name("Tag"),
            Advertisement::new("B"),
            marked("A"),
            marked("B"),
        ]);

        let collected = collect_window(ads, Duration::from_secs(5), Some(&filter)).await;

        assert_eq!(addresses(&collected), vec!["A", "B"]);
        assert_eq!(collected[0].name.as_deref(), Some("Tag"));
        assert!(filter.is_match(&collected[0]));
        assert!(!filter.is_match(&collected[1]));
    }

    #[test]
    fn test_collected_keeps_first_seen_order() {
        let mut collected = Collected::default();
        collected.upsert(Advertisement::new("B"));
        collected.upsert(Advertisement::new("A"));
        collected.upsert(Advertisement::new("B").with_rssi(-40));

        let ads = collected.into_vec();
        assert_eq!(ads.len(), 2);
        assert_eq!(ads[0].address, "B");
        assert_eq!(ads[0].rssi, Some(-40));
        assert_eq!(ads[1].address, "A");
    }

    #[test]
    fn test_collected_merges_manufacturer_data() {
        let mut collected = Collected::default();
        collected.upsert(
            Advertisement::new("A")
                .with_name("Tag")
                .with_manufacturer_data(1, b"x".to_vec()),
        );
        let merged = collected.upsert(Advertisement::new("A").with_manufacturer_data(2, b"PALMKI".to_vec()));

        assert_eq!(merged.name.as_deref(), Some("Tag"));
        assert_eq!(merged.manufacturer_data.len(), 2);
        assert!(MarkerFilter::new("PALMKI").is_match(merged));
    }
}
