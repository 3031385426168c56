//! Utility functions for the palmki-ble crate.

use std::fmt::Write as _;

/// Encode bytes as a lowercase hex string.
///
/// # Example
///
/// ```
/// use palmki_ble::to_hex;
///
/// assert_eq!(to_hex(b"PALMKI"), "50414c4d4b49");
/// ```
pub fn to_hex(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() * 2);
    for byte in data {
        let _ = write!(out, "{:02x}", byte);
    }
    out
}

/// Check whether `needle` occurs in `haystack` as a contiguous byte run.
///
/// An empty needle never matches.
pub fn contains_bytes(haystack: &[u8], needle: &[u8]) -> bool {
    if needle.is_empty() || needle.len() > haystack.len() {
        return false;
    }
    haystack.windows(needle.len()).any(|w| w == needle)
}
