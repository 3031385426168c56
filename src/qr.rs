//! QR code for a device identity payload.
//!
//! The payload is a small JSON object `{"ID": ..., "Hash": ...}` rendered
//! as a PNG.

use image::Luma;
use qrcode::QrCode;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

use crate::error::Result;

/// File name written by the QR binary.
pub const DEFAULT_QR_FILE: &str = "qrcode.png";

/// Identifier and hash encoded into the QR code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QrPayload {
    /// Device identifier.
    #[serde(rename = "ID")]
    pub id: String,
    /// Hash bound to the identifier.
    #[serde(rename = "Hash")]
    pub hash: String,
}

impl QrPayload {
    /// Create a payload.
    pub fn new(id: impl Into<String>, hash: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            hash: hash.into(),
        }
    }

    /// The exact string encoded in the code, e.g. `{"ID": "7", "Hash": "ab"}`.
    ///
    /// Uses `": "` and `", "` separators so existing readers that compare
    /// the raw text keep matching.
    pub fn to_json(&self) -> Result<String> {
        Ok(format!(
            "{{\"ID\": {}, \"Hash\": {}}}",
            serde_json::to_string(&self.id)?,
            serde_json::to_string(&self.hash)?
        ))
    }

    /// Build the QR code. Same payload, same modules.
    pub fn to_qr_code(&self) -> Result<QrCode> {
        Ok(QrCode::new(self.to_json()?.as_bytes())?)
    }

    /// Render the code as a grayscale PNG at `path`.
    pub fn save_png(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let image = self.to_qr_code()?.render::<Luma<u8>>().build();
        image.save(path)?;
        info!("QR code written to {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_payload_json() {
        let payload = QrPayload::new("PALMKI-0001", "9f86d081884c7d65");
        assert_eq!(
            payload.to_json().unwrap(),
            r#"{"ID": "PALMKI-0001", "Hash": "9f86d081884c7d65"}"#
        );
    }

    #[test]
    fn test_payload_json_escapes_and_parses_back() {
        let payload = QrPayload::new("a\"b", "c\\d");
        let json = payload.to_json().unwrap();
        let parsed: QrPayload = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, payload);
    }

    #[test]
    fn test_qr_code_is_deterministic() {
        let payload = QrPayload::new("42", "deadbeef");
        let first = payload.to_qr_code().unwrap();
        let second = payload.to_qr_code().unwrap();

        assert_eq!(first.width(), second.width());
        assert_eq!(first.to_colors(), second.to_colors());

        let other = QrPayload::new("43", "deadbeef").to_qr_code().unwrap();
        assert_ne!(first.to_colors(), other.to_colors());
    }

    #[test]
    fn test_save_png() {
        let path = std::env::temp_dir().join(format!("palmki-qr-{}.png", std::process::id()));
        QrPayload::new("42", "deadbeef").save_png(&path).unwrap();

        let image = image::open(&path).unwrap().to_luma8();
        assert!(image.width() > 21);
        assert_eq!(image.width(), image.height());

        std::fs::remove_file(&path).unwrap();
    }
}
