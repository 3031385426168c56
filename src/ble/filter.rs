//! Marker filter over advertisements.
//!
//! A device is a target when one of its manufacturer data payloads contains
//! the marker bytes. Payloads that are not valid text are still searched.

use crate::ble::advertising::Advertisement;
use crate::config::SelectionPolicy;
use crate::utils::{contains_bytes, to_hex};

/// A manufacturer data entry that contained the marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerMatch {
    /// Company identifier of the matching entry.
    pub company_id: u16,
    /// The entry's payload as lowercase hex.
    pub hex: String,
}

/// Matches advertisements whose manufacturer data contains a marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerFilter {
    marker: Vec<u8>,
}

impl MarkerFilter {
    /// Create a filter for the given marker text.
    pub fn new(marker: &str) -> Self {
        Self {
            marker: marker.as_bytes().to_vec(),
        }
    }

    /// The marker as text.
    pub fn marker(&self) -> String {
        String::from_utf8_lossy(&self.marker).into_owned()
    }

    /// Return the first manufacturer entry (by company id) that contains the marker.
    pub fn matches(&self, adv: &Advertisement) -> Option<MarkerMatch> {
        adv.manufacturer_data
            .iter()
            .find(|(_, data)| contains_bytes(data, &self.marker))
            .map(|(company_id, data)| MarkerMatch {
                company_id: *company_id,
                hex: to_hex(data),
            })
    }

    /// Check whether an advertisement carries the marker.
    pub fn is_match(&self, adv: &Advertisement) -> bool {
        self.matches(adv).is_some()
    }

    /// Pick one target among `advertisements`, which must be in discovery order.
    pub fn select_target<'a>(
        &self,
        advertisements: &'a [Advertisement],
        policy: SelectionPolicy,
    ) -> Option<&'a Advertisement> {
        let mut candidates = advertisements.iter().filter(|adv| self.is_match(adv));

        match policy {
            SelectionPolicy::First => candidates.next(),
            // Earliest match wins ties.
            SelectionPolicy::StrongestRssi => candidates.fold(None, |best, adv| match best {
                Some(b) if rssi_key(b) >= rssi_key(adv) => Some(b),
                _ => Some(adv),
            }),
        }
    }
}

fn rssi_key(adv: &Advertisement) -> i32 {
    adv.rssi.map(i32::from).unwrap_or(-999)
}
