//! Error types for the palmki-ble crate.

use thiserror::Error;

/// The main error type for this crate.
#[derive(Error, Debug)]
pub enum Error {
    /// Bluetooth-related error from the underlying BLE library.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// Bluetooth is not available or is disabled on this system.
    #[error("Bluetooth not available or disabled")]
    BluetoothUnavailable,

    /// No peripheral with the given address is known to the adapter.
    #[error("Device not found: {address}")]
    DeviceNotFound {
        /// The address that was searched for.
        address: String,
    },

    /// Failed to establish a connection to the device.
    #[error("Connection failed: {reason}")]
    ConnectionFailed {
        /// Description of why the connection failed.
        reason: String,
    },

    /// Connecting did not complete within the configured timeout.
    #[error("Connection timed out after {seconds:.1}s")]
    ConnectTimeout {
        /// The timeout that elapsed, in seconds.
        seconds: f64,
    },

    /// Characteristic not found on the device.
    #[error("Characteristic not found: {uuid}")]
    CharacteristicNotFound {
        /// The UUID of the characteristic that was not found.
        uuid: String,
    },

    /// JSON encoding failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// QR code could not be built from the payload.
    #[error("QR code error: {0}")]
    QrCode(#[from] qrcode::types::QrError),

    /// The rendered QR image could not be written.
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// I/O error, e.g. while binding the HTTP listener.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A specialized Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::DeviceNotFound {
            address: "AA:BB:CC:DD:EE:FF".to_string(),
        };
        assert_eq!(err.to_string(), "Device not found: AA:BB:CC:DD:EE:FF");

        let err = Error::ConnectTimeout { seconds: 10.0 };
        assert_eq!(err.to_string(), "Connection timed out after 10.0s");
    }
}
