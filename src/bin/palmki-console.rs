//! Scan once and print the result.
//!
//! Run with: cargo run --bin palmki-console [-- --all]
//!
//! Without flags, connects to the first device carrying the marker and
//! prints its characteristics. `--all` lists every device in the window.

use palmki_ble::report::render_console;
use palmki_ble::{logging, BleScanner, Result, ScanConfig, ScanSession};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();

    let list_all = std::env::args().skip(1).any(|arg| arg == "--all");
    let config = ScanConfig::default();

    println!("Scanning for BLE devices...");

    let scanner = BleScanner::new().await?;
    let session = ScanSession::new(Arc::new(scanner), config);

    let response = if list_all {
        session.discover_all().await
    } else {
        session.run().await
    };

    print!("{}", render_console(&response));
    Ok(())
}
