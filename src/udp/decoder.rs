/// Decoding of hub broadcast datagrams into typed packets
use serde::Deserialize;
use serde_json::Value;
use std::fmt;

use crate::models::{HubPacket, PacketType, StationObservation};
use crate::utils::mps_to_mph;

/// An `obs_st` row must reach the reporting interval at index 17.
pub const STATION_ROW_LEN: usize = 18;

// obs_st wire positions. 5 and 13 are never read.
const IDX_TIMESTAMP: usize = 0;
const IDX_WIND_LULL: usize = 1;
const IDX_WIND_SPEED: usize = 2;
const IDX_WIND_GUST: usize = 3;
const IDX_WIND_DIRECTION: usize = 4;
const IDX_PRESSURE: usize = 6;
const IDX_TEMPERATURE: usize = 7;
const IDX_HUMIDITY: usize = 8;
const IDX_ILLUMINATION: usize = 9;
const IDX_UV_INDEX: usize = 10;
const IDX_SOLAR_RADIATION: usize = 11;
const IDX_RAIN: usize = 12;
const IDX_STRIKES: usize = 14;
const IDX_LIGHTNING_DISTANCE: usize = 15;
const IDX_BATTERY: usize = 16;
const IDX_REPORTING_INTERVAL: usize = 17;

#[derive(Debug)]
pub enum DecodeError {
    Utf8(std::str::Utf8Error),
    Json(serde_json::Error),
    MissingType,
    MissingObservations,
    RowTooShort { len: usize },
    InvalidField {
        index: usize,
        name: &'static str,
        reason: String,
    },
}

impl DecodeError {
    /// True for payloads that are not JSON at all, as opposed to JSON of the wrong shape.
    pub fn is_syntax(&self) -> bool {
        matches!(self, DecodeError::Utf8(_) | DecodeError::Json(_))
    }
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::Utf8(e) => write!(f, "payload is not valid UTF-8: {}", e),
            DecodeError::Json(e) => write!(f, "payload is not valid JSON: {}", e),
            DecodeError::MissingType => write!(f, "packet has no 'type' field"),
            DecodeError::MissingObservations => {
                write!(f, "packet has no 'obs' rows")
            }
            DecodeError::RowTooShort { len } => write!(
                f,
                "obs_st row has {} entries, expected at least {}",
                len, STATION_ROW_LEN
            ),
            DecodeError::InvalidField {
                index,
                name,
                reason,
            } => write!(f, "obs_st field {} ({}): {}", index, name, reason),
        }
    }
}

impl std::error::Error for DecodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DecodeError::Utf8(e) => Some(e),
            DecodeError::Json(e) => Some(e),
            _ => None,
        }
    }
}

// Rows after the first are never read, so their shape is not checked.
#[derive(Deserialize)]
struct ObservationRows {
    obs: Vec<Value>,
}

/// Decode one datagram payload: UTF-8, then JSON, then the `type` discriminant.
///
/// Only an absent `type` key is an error. A `type` that is not a string can
/// never match a known packet, so it decodes as [`PacketType::Other`].
pub fn decode_packet(payload: &[u8]) -> Result<HubPacket, DecodeError> {
    let text = std::str::from_utf8(payload).map_err(DecodeError::Utf8)?;
    let raw: Value = serde_json::from_str(text).map_err(DecodeError::Json)?;

    let kind = match raw.get("type") {
        None => return Err(DecodeError::MissingType),
        Some(Value::String(kind)) => PacketType::from_wire(kind),
        Some(other) => PacketType::Other(other.to_string()),
    };

    Ok(HubPacket { kind, raw })
}

/// Extract the first observation row of an `obs_st` packet.
pub fn parse_station_packet(raw: &Value) -> Result<StationObservation, DecodeError> {
    let rows = ObservationRows::deserialize(raw).map_err(|_| DecodeError::MissingObservations)?;
    let row = rows
        .obs
        .first()
        .and_then(Value::as_array)
        .ok_or(DecodeError::MissingObservations)?;
    parse_station_row(row)
}

/// Map a positional `obs_st` row onto a [`StationObservation`].
pub fn parse_station_row(row: &[Value]) -> Result<StationObservation, DecodeError> {
    if row.len() < STATION_ROW_LEN {
        return Err(DecodeError::RowTooShort { len: row.len() });
    }

    Ok(StationObservation {
        timestamp: epoch(row, IDX_TIMESTAMP, "timestamp")?,
        wind_lull: mps_to_mph(optional_number(row, IDX_WIND_LULL, "wind lull")?),
        wind_speed: mps_to_mph(optional_number(row, IDX_WIND_SPEED, "wind speed")?),
        wind_gust: mps_to_mph(optional_number(row, IDX_WIND_GUST, "wind gust")?),
        wind_direction: optional_number(row, IDX_WIND_DIRECTION, "wind direction")?,
        pressure: optional_number(row, IDX_PRESSURE, "pressure")?,
        temperature: optional_number(row, IDX_TEMPERATURE, "temperature")?,
        humidity: optional_number(row, IDX_HUMIDITY, "humidity")?,
        illumination: optional_number(row, IDX_ILLUMINATION, "illumination")?,
        uv_index: optional_number(row, IDX_UV_INDEX, "uv index")?,
        solar_radiation: optional_number(row, IDX_SOLAR_RADIATION, "solar radiation")?,
        rain: coerce_float(row, IDX_RAIN, "rain")?,
        strikes: optional_count(row, IDX_STRIKES, "lightning strikes")?,
        lightning_distance: optional_number(row, IDX_LIGHTNING_DISTANCE, "lightning distance")?,
        battery_voltage: optional_number(row, IDX_BATTERY, "battery")?,
        reporting_interval: optional_count(row, IDX_REPORTING_INTERVAL, "reporting interval")?,
    })
}

fn invalid(index: usize, name: &'static str, reason: impl Into<String>) -> DecodeError {
    DecodeError::InvalidField {
        index,
        name,
        reason: reason.into(),
    }
}

fn epoch(row: &[Value], index: usize, name: &'static str) -> Result<i64, DecodeError> {
    row[index]
        .as_i64()
        .ok_or_else(|| invalid(index, name, format!("expected epoch seconds, got {}", row[index])))
}

fn optional_number(
    row: &[Value],
    index: usize,
    name: &'static str,
) -> Result<Option<f64>, DecodeError> {
    match &row[index] {
        Value::Null => Ok(None),
        Value::Number(n) => n
            .as_f64()
            .map(Some)
            .ok_or_else(|| invalid(index, name, "number out of range")),
        other => Err(invalid(index, name, format!("expected number, got {}", other))),
    }
}

fn optional_count(
    row: &[Value],
    index: usize,
    name: &'static str,
) -> Result<Option<u64>, DecodeError> {
    match &row[index] {
        Value::Null => Ok(None),
        Value::Number(n) => n.as_u64().map(Some).ok_or_else(|| {
            invalid(index, name, format!("expected non-negative integer, got {}", n))
        }),
        other => Err(invalid(index, name, format!("expected integer, got {}", other))),
    }
}

// Accepts numbers and numeric strings; anything else is rejected.
fn coerce_float(row: &[Value], index: usize, name: &'static str) -> Result<f64, DecodeError> {
    match &row[index] {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| invalid(index, name, "number out of range")),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| invalid(index, name, format!("could not convert '{}' to float", s))),
        other => Err(invalid(index, name, format!("expected number, got {}", other))),
    }
}
