use serde_json::Value;

use crate::utils::battery_level_percent;

/// Packet discriminant carried in the `type` field of every hub broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PacketType {
    Air,
    Station,
    Sky,
    Other(String),
}

impl PacketType {
    pub fn from_wire(kind: &str) -> Self {
        match kind {
            "obs_air" => PacketType::Air,
            "obs_st" => PacketType::Station,
            "obs_sky" => PacketType::Sky,
            other => PacketType::Other(other.to_string()),
        }
    }
}

/// One decoded datagram. `raw` keeps the full JSON value for diagnostics.
#[derive(Debug, Clone)]
pub struct HubPacket {
    pub kind: PacketType,
    pub raw: Value,
}

/// First row of an `obs_st` packet, wind already converted to mph.
#[derive(Debug, Clone, PartialEq)]
pub struct StationObservation {
    pub timestamp: i64,
    pub wind_lull: f64,
    pub wind_speed: f64,
    pub wind_gust: f64,
    pub wind_direction: Option<f64>,
    pub pressure: Option<f64>,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub illumination: Option<f64>,
    pub uv_index: Option<f64>,
    pub solar_radiation: Option<f64>,
    pub rain: f64,
    pub strikes: Option<u64>,
    pub lightning_distance: Option<f64>,
    pub battery_voltage: Option<f64>,
    pub reporting_interval: Option<u64>,
}

impl StationObservation {
    pub fn battery_level(&self) -> Option<u8> {
        self.battery_voltage.map(battery_level_percent)
    }
}
