//! Scan and server configuration.
//!
//! Plain structs with defaults taken from the deployed scanner scripts.
//! Nothing is read from files or the environment.

use std::net::SocketAddr;
use std::time::Duration;
use uuid::Uuid;

/// Marker looked for in manufacturer data.
pub const DEFAULT_MARKER: &str = "PALMKI";

/// Length of one discovery window.
pub const DEFAULT_SCAN_WINDOW: Duration = Duration::from_secs(5);

/// Connect timeout used by the single-characteristic variant.
pub const HARDENED_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Port the HTTP endpoint listens on.
pub const DEFAULT_PORT: u16 = 5001;

/// Service holding the PALMKI payload characteristic.
pub const PALMKI_SERVICE_UUID: Uuid = Uuid::from_u128(0xe2a2b8e0_0b6c_4b6d_8868_c2b53f6c8d7b);

/// Characteristic carrying the PALMKI payload.
pub const PALMKI_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0xc3b3c9f0_1c7d_4e7e_8a8b_9e0f1d0a2b3c);

/// How to pick one device when several advertise the marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SelectionPolicy {
    /// The first matching advertisement seen in the window.
    #[default]
    First,
    /// The match with the strongest RSSI; devices without RSSI sort last.
    StrongestRssi,
}

/// Which characteristics to read once connected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadMode {
    /// Read every characteristic that has the read property.
    #[default]
    AllReadable,
    /// Read only one known characteristic. Avoids OS pairing prompts
    /// triggered by protected characteristics.
    Single {
        /// Owning service.
        service: Uuid,
        /// Characteristic to read.
        characteristic: Uuid,
    },
}

impl ReadMode {
    /// Single-read mode for the PALMKI payload characteristic.
    pub fn palmki() -> Self {
        Self::Single {
            service: PALMKI_SERVICE_UUID,
            characteristic: PALMKI_CHARACTERISTIC_UUID,
        }
    }
}

/// Settings for one scan session.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanConfig {
    /// Marker searched for in manufacturer data.
    pub marker: String,
    /// Length of the discovery window.
    pub scan_window: Duration,
    /// Connect timeout. `None` leaves the BLE library default in place.
    pub connect_timeout: Option<Duration>,
    /// Target selection when several devices match.
    pub selection: SelectionPolicy,
    /// Stop listening as soon as a matching advertisement arrives.
    pub stop_on_first_match: bool,
    /// Characteristics to read.
    pub read_mode: ReadMode,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            marker: DEFAULT_MARKER.to_string(),
            scan_window: DEFAULT_SCAN_WINDOW,
            connect_timeout: None,
            selection: SelectionPolicy::First,
            stop_on_first_match: true,
            read_mode: ReadMode::AllReadable,
        }
    }
}

impl ScanConfig {
    /// Configuration of the hardened endpoint: full window, strongest
    /// signal wins, bounded connect, single characteristic read.
    pub fn hardened() -> Self {
        Self {
            connect_timeout: Some(HARDENED_CONNECT_TIMEOUT),
            selection: SelectionPolicy::StrongestRssi,
            stop_on_first_match: false,
            read_mode: ReadMode::palmki(),
            ..Self::default()
        }
    }

    /// Set the marker.
    pub fn with_marker(mut self, marker: impl Into<String>) -> Self {
        self.marker = marker.into();
        self
    }

    /// Set the discovery window.
    pub fn with_scan_window(mut self, window: Duration) -> Self {
        self.scan_window = window;
        self
    }

    /// Set the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the selection policy.
    pub fn with_selection(mut self, selection: SelectionPolicy) -> Self {
        self.selection = selection;
        self
    }

    /// Set early stop on first match.
    pub fn with_stop_on_first_match(mut self, stop: bool) -> Self {
        self.stop_on_first_match = stop;
        self
    }

    /// Set the read mode.
    pub fn with_read_mode(mut self, mode: ReadMode) -> Self {
        self.read_mode = mode;
        self
    }
}

/// Settings for the HTTP endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    /// Listen address.
    pub bind_addr: SocketAddr,
    /// Upper bound on one request's BLE work.
    pub request_timeout: Duration,
    /// How long to wait for the adapter at startup.
    pub adapter_wait: Duration,
    /// Poll interval while waiting for the adapter.
    pub adapter_poll: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            request_timeout: Duration::from_secs(60),
            adapter_wait: Duration::from_secs(30),
            adapter_poll: Duration::from_secs(2),
        }
    }
}

impl ServerConfig {
    /// Set the listen address.
    pub fn with_bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set the per-request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_config_defaults() {
        let config = ScanConfig::default();
        assert_eq!(config.marker, "PALMKI");
        assert_eq!(config.scan_window, Duration::from_secs(5));
        assert_eq!(config.connect_timeout, None);
        assert_eq!(config.selection, SelectionPolicy::First);
        assert!(config.stop_on_first_match);
        assert_eq!(config.read_mode, ReadMode::AllReadable);
    }

    #[test]
    fn test_hardened_config() {
        let config = ScanConfig::hardened();
        assert_eq!(config.connect_timeout, Some(Duration::from_secs(10)));
        assert_eq!(config.selection, SelectionPolicy::StrongestRssi);
        assert!(!config.stop_on_first_match);
        assert_eq!(config.read_mode, ReadMode::palmki());
    }

    #[test]
    fn test_palmki_uuids() {
        assert_eq!(
            PALMKI_SERVICE_UUID.to_string(),
            "e2a2b8e0-0b6c-4b6d-8868-c2b53f6c8d7b"
        );
        assert_eq!(
            PALMKI_CHARACTERISTIC_UUID.to_string(),
            "c3b3c9f0-1c7d-4e7e-8a8b-9e0f1d0a2b3c"
        );
    }

    #[test]
    fn test_server_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr.port(), 5001);
        assert_eq!(config.request_timeout, Duration::from_secs(60));
    }
}
