//! HTTP endpoint for PALMKI scans.
//!
//! Run with: cargo run --bin palmki-server [-- --hardened]
//!
//! `--hardened` picks the strongest match, bounds the connect and reads
//! only the PALMKI payload characteristic.

use palmki_ble::server::{self, AppState};
use palmki_ble::{logging, BleScanner, Result, ScanConfig, ScanSession, ServerConfig};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();

    let hardened = std::env::args().skip(1).any(|arg| arg == "--hardened");
    let server_config = ServerConfig::default();
    let scan_config = if hardened {
        ScanConfig::hardened()
    } else {
        ScanConfig::default()
    };

    let scanner =
        BleScanner::wait_until_available(server_config.adapter_wait, server_config.adapter_poll)
            .await?;
    let session = ScanSession::new(Arc::new(scanner), scan_config);

    server::serve(
        AppState::new(session, server_config.request_timeout),
        &server_config,
    )
    .await
}
