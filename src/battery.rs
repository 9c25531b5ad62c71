//! Battery telemetry reported by display devices.
//!
//! Devices append their state to image requests, e.g.
//! `GET /2?batteryLevel=55&isCharging=Yes`. State is kept per page for the
//! lifetime of the process.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use serde::Serialize;

/// Battery state of the device showing one page.
///
/// Serializes to the webhook payload: `{"batteryLevel":55,"isCharging":true}`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatteryState {
    /// Percentage 0-100, `None` until first reported
    pub battery_level: Option<u8>,
    pub is_charging: bool,
}

/// Raw telemetry query parameters, unvalidated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatteryReport {
    pub battery_level: Option<String>,
    pub is_charging: Option<String>,
}

impl BatteryReport {
    /// Extract `batteryLevel` and `isCharging` from a query string.
    pub fn from_query_string(query: &str) -> Self {
        let mut report = Self::default();
        for (key, value) in form_urlencoded::parse(query.as_bytes()) {
            match key.as_ref() {
                "batteryLevel" => report.battery_level = Some(value.into_owned()),
                "isCharging" => report.is_charging = Some(value.into_owned()),
                _ => {}
            }
        }
        report
    }
}

/// Parse a battery level; anything but an integer in 0..=100 is rejected.
pub fn parse_level(raw: &str) -> Option<u8> {
    if !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    raw.parse::<u8>().ok().filter(|level| *level <= 100)
}

/// Interpret a charging marker: `Yes`/`1` or `No`/`0`, anything else is `None`.
pub fn parse_charging(raw: &str) -> Option<bool> {
    match raw {
        "Yes" | "1" => Some(true),
        "No" | "0" => Some(false),
        _ => None,
    }
}

/// Per-page battery state, keyed by page index.
#[derive(Debug, Default)]
pub struct BatteryTracker {
    pages: Mutex<HashMap<usize, BatteryState>>,
}

impl BatteryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state for a page, if it was ever touched.
    pub fn get(&self, page_index: usize) -> Option<BatteryState> {
        self.pages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&page_index)
            .copied()
    }

    /// Apply a report to the page's state and return the result.
    ///
    /// Nothing changes unless the level is a valid percentage; the charging
    /// marker is only considered alongside a valid level. Changes are logged,
    /// repeated reports of the same state are not.
    pub fn record(&self, page_index: usize, report: &BatteryReport) -> BatteryState {
        let mut pages = self.pages.lock().unwrap_or_else(PoisonError::into_inner);
        let state = pages.entry(page_index).or_default();
        let page_number = page_index + 1;

        let Some(level) = report.battery_level.as_deref().and_then(parse_level) else {
            return *state;
        };

        if state.battery_level != Some(level) {
            state.battery_level = Some(level);
            tracing::info!("New battery level: {} for page {}", level, page_number);
        }

        match report.is_charging.as_deref().and_then(parse_charging) {
            Some(true) if !state.is_charging => {
                state.is_charging = true;
                tracing::info!("Battery started charging for page {}", page_number);
            }
            Some(false) if state.is_charging => {
                state.is_charging = false;
                tracing::info!("Battery stopped charging for page {}", page_number);
            }
            _ => {}
        }

        *state
    }
}
