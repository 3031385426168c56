//! Write a QR code for a device identity.
//!
//! Run with: cargo run --bin palmki-qr -- <ID> <HASH>

use palmki_ble::qr::DEFAULT_QR_FILE;
use palmki_ble::{logging, QrPayload, Result};

fn main() -> Result<()> {
    logging::init();

    let args: Vec<String> = std::env::args().collect();
    let (id, hash) = match args.as_slice() {
        [_, id, hash] => (id, hash),
        _ => {
            let program = args.first().map(String::as_str).unwrap_or("palmki-qr");
            eprintln!("Usage: {} <ID> <HASH>", program);
            std::process::exit(1);
        }
    };

    let payload = QrPayload::new(id.as_str(), hash.as_str());
    payload.save_png(DEFAULT_QR_FILE)?;

    println!("{}", payload.to_json()?);
    println!("QR code saved as {}", DEFAULT_QR_FILE);
    Ok(())
}
