/// Utility functions for unit conversion and formatting
use time::{format_description, OffsetDateTime};

/// Metres per second to miles per hour.
pub const MPS_TO_MPH: f64 = 2.2369;

const BATTERY_EMPTY_VOLTS: f64 = 1.8;

/// Format a timestamp for human-readable logging
///
/// Converts an OffsetDateTime to DD.MM.YYYY - HH:MM:SS format
/// Falls back to default string representation if formatting fails.
pub fn format_datetime(dt: &OffsetDateTime) -> String {
    match format_description::parse("[day].[month].[year] - [hour]:[minute]:[second]") {
        Ok(format) => dt.format(&format).unwrap_or_else(|_| dt.to_string()),
        Err(_) => dt.to_string(),
    }
}

/// Format epoch seconds as reported by the hub; out-of-range values are printed raw.
pub fn format_epoch(timestamp: i64) -> String {
    OffsetDateTime::from_unix_timestamp(timestamp)
        .map(|dt| format_datetime(&dt))
        .unwrap_or_else(|_| timestamp.to_string())
}

/// Convert a wind reading in m/s to mph. A missing reading counts as calm.
pub fn mps_to_mph(value: Option<f64>) -> f64 {
    match value {
        Some(mps) => mps * MPS_TO_MPH,
        None => 0.0,
    }
}

/// Battery percentage from cell voltage: 2.80 V = 100 %, 1.80 V = 0 %.
pub fn battery_level_percent(voltage: f64) -> u8 {
    ((voltage - BATTERY_EMPTY_VOLTS) * 100.0).round().clamp(0.0, 100.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wind_conversion() {
        assert!((mps_to_mph(Some(1.1)) - 2.46059).abs() < 1e-9);
        assert!((mps_to_mph(Some(1.6)) - 3.57904).abs() < 1e-9);
        assert_eq!(mps_to_mph(Some(0.0)), 0.0);
        assert_eq!(mps_to_mph(None), 0.0);
    }

    #[test]
    fn battery_levels() {
        assert_eq!(battery_level_percent(2.8), 100);
        assert_eq!(battery_level_percent(2.41), 61);
        assert_eq!(battery_level_percent(1.8), 0);
        assert_eq!(battery_level_percent(1.2), 0);
        assert_eq!(battery_level_percent(3.1), 100);
    }

    #[test]
    fn formats_epoch_seconds() {
        assert_eq!(format_epoch(1582149600), "19.02.2020 - 22:00:00");
        assert_eq!(format_epoch(i64::MAX), i64::MAX.to_string());
    }
}
