//! BLE communication module.
//!
//! Discovery of advertising devices, marker filtering and GATT reads.

pub mod advertising;
pub mod filter;
pub mod gatt;
pub mod scanner;

pub use advertising::Advertisement;
pub use filter::{MarkerFilter, MarkerMatch};
pub use gatt::{
    read_characteristics, BlePeripheral, CharacteristicInfo, CharacteristicResult,
    CharacteristicValue, GattPeripheral, ServiceInfo, ServiceResult,
};
pub use scanner::BleScanner;
