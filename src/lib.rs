// UUID literals follow the 8-4-4-4-12 grouping
#![allow(clippy::unusual_byte_groupings)]

//! # palmki-ble
//!
//! Finds Bluetooth Low Energy devices whose manufacturer data carries a
//! marker string (`PALMKI` by default), connects to one, reads its GATT
//! characteristics and reports the result as JSON or text.
//!
//! ## Features
//!
//! - **Marker discovery**: Listen for a bounded window and match manufacturer data
//! - **GATT retrieval**: Enumerate services and read every readable characteristic
//! - **Partial results**: Read failures are reported per characteristic
//! - **HTTP endpoint**: `GET /scan`, `GET /devices`, `GET /devices/:address/gatt`
//! - **QR codes**: Encode an `{"ID": ..., "Hash": ...}` payload as a PNG
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use palmki_ble::{BleScanner, ScanConfig, ScanSession, Result};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let scanner = BleScanner::new().await?;
//!     let session = ScanSession::new(Arc::new(scanner), ScanConfig::default());
//!
//!     let response = session.run().await;
//!     println!("{}", response.status);
//!     print!("{}", response.info);
//!     Ok(())
//! }
//! ```
//!
//! ## Platform Notes
//!
//! ### macOS
//! Requires Bluetooth permission. Device addresses are reported as
//! platform identifiers rather than MAC addresses.
//!
//! ### Linux
//! Requires BlueZ. User may need to be in the `bluetooth` group.
//!
//! ### Windows
//! Requires Windows 10 or later with Bluetooth LE support.

// Public modules
pub mod ble;
pub mod config;
pub mod error;
pub mod logging;
pub mod qr;
pub mod report;
pub mod server;
pub mod session;
pub mod utils;

// Re-exports for convenience
pub use ble::{Advertisement, BleScanner, GattPeripheral, MarkerFilter};
pub use config::{ReadMode, ScanConfig, SelectionPolicy, ServerConfig};
pub use error::{Error, Result};
pub use qr::QrPayload;
pub use session::{DeviceSource, DeviceSummary, Outcome, ScanResponse, ScanSession};
pub use utils::to_hex;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_exports() {
        // Verify that key types are exported
        let _ = std::any::TypeId::of::<BleScanner>();
        let _ = std::any::TypeId::of::<ScanSession>();
        let _ = std::any::TypeId::of::<ScanResponse>();
        let _ = std::any::TypeId::of::<Error>();
        let _ = std::any::TypeId::of::<QrPayload>();
    }
}
