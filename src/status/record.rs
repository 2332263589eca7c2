//! Status records, raw location fixes, and the remote wire format.
//!
//! On the wire an entity's history is an object keyed by stringified index
//! (`"0"` is the most recent status), each value shaped as
//! `{ "lat": f64, "lng": f64, "time": i64, "power": f64 }`.

#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::errors::{Result, TtError};

/// One raw location reading delivered by the host.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocationFix {
    pub lat: f64,
    pub lng: f64,
    /// Epoch milliseconds.
    pub time: i64,
}

impl LocationFix {
    #[must_use]
    pub const fn new(lat: f64, lng: f64, time: i64) -> Self {
        Self { lat, lng, time }
    }

    /// Reject fixes that cannot describe a point on Earth.
    pub fn validate(&self) -> Result<()> {
        if !self.lat.is_finite() || !(-90.0..=90.0).contains(&self.lat) {
            return Err(TtError::InvalidFix {
                details: format!("latitude {} outside [-90, 90]", self.lat),
            });
        }
        if !self.lng.is_finite() || !(-180.0..=180.0).contains(&self.lng) {
            return Err(TtError::InvalidFix {
                details: format!("longitude {} outside [-180, 180]", self.lng),
            });
        }
        if self.time < 0 {
            return Err(TtError::InvalidFix {
                details: format!("negative timestamp {}", self.time),
            });
        }
        Ok(())
    }
}

/// One compacted history entry. Immutable once built; replaced wholesale.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StatusRecord {
    #[serde(rename = "lat")]
    latitude: f64,
    #[serde(rename = "lng")]
    longitude: f64,
    #[serde(rename = "time")]
    timestamp: i64,
    #[serde(rename = "power")]
    power_level: f64,
}

impl StatusRecord {
    /// Build a record; `power_level` is clamped into `[0, 100]`.
    #[must_use]
    pub fn new(latitude: f64, longitude: f64, timestamp: i64, power_level: f64) -> Self {
        let power_level = if power_level.is_finite() {
            power_level.clamp(0.0, 100.0)
        } else {
            0.0
        };
        Self {
            latitude,
            longitude,
            timestamp,
            power_level,
        }
    }

    /// Candidate record for a fix at the given battery level.
    #[must_use]
    pub fn from_fix(fix: &LocationFix, power_level: f64) -> Self {
        Self::new(fix.lat, fix.lng, fix.time, power_level)
    }

    #[must_use]
    pub const fn latitude(&self) -> f64 {
        self.latitude
    }

    #[must_use]
    pub const fn longitude(&self) -> f64 {
        self.longitude
    }

    #[must_use]
    pub const fn timestamp(&self) -> i64 {
        self.timestamp
    }

    #[must_use]
    pub const fn power_level(&self) -> f64 {
        self.power_level
    }

    /// `(latitude, longitude)` in degrees.
    #[must_use]
    pub const fn position(&self) -> (f64, f64) {
        (self.latitude, self.longitude)
    }

    #[allow(clippy::cast_possible_truncation)]
    fn from_wire(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        let lat = obj.get("lat")?.as_f64()?;
        let lng = obj.get("lng")?.as_f64()?;
        let time = obj.get("time").and_then(|t| {
            t.as_i64()
                .or_else(|| t.as_f64().filter(|f| f.is_finite()).map(|f| f as i64))
        })?;
        let power = obj.get("power")?.as_f64()?;
        if !lat.is_finite() || !lng.is_finite() {
            return None;
        }
        Some(Self::new(lat, lng, time, power))
    }
}

impl fmt::Display for StatusRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "lat={:.6} lng={:.6} time={} power={:.1}",
            self.latitude, self.longitude, self.timestamp, self.power_level
        )
    }
}

/// Encode a history as the wire object keyed by stringified index.
pub fn encode_history(history: &[StatusRecord]) -> Result<Value> {
    let mut map = Map::with_capacity(history.len());
    for (index, record) in history.iter().enumerate() {
        map.insert(index.to_string(), serde_json::to_value(record)?);
    }
    Ok(Value::Object(map))
}

/// Decode a remote snapshot into an ordered history.
///
/// Accepts the keyed-object form or a plain array. Malformed keys and
/// records are skipped, the rest ordered by index with gaps closed.
/// Anything else (null, scalars) decodes to an empty history.
#[must_use]
pub fn decode_snapshot(value: &Value) -> Vec<StatusRecord> {
    match value {
        Value::Object(map) => {
            let indexed: BTreeMap<usize, StatusRecord> = map
                .iter()
                .filter_map(|(key, raw)| {
                    let index = key.trim().parse::<usize>().ok()?;
                    StatusRecord::from_wire(raw).map(|record| (index, record))
                })
                .collect();
            indexed.into_values().collect()
        }
        Value::Array(items) => items.iter().filter_map(StatusRecord::from_wire).collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn fix_validation_rejects_out_of_range() {
        assert!(LocationFix::new(10.0, 20.0, 0).validate().is_ok());
        assert!(LocationFix::new(91.0, 20.0, 0).validate().is_err());
        assert!(LocationFix::new(10.0, -181.0, 0).validate().is_err());
        assert!(LocationFix::new(f64::NAN, 20.0, 0).validate().is_err());
        let err = LocationFix::new(10.0, 20.0, -5).validate().unwrap_err();
        assert_eq!(err.code(), "TT-2001");
    }

    #[test]
    fn power_level_is_clamped() {
        assert_eq!(StatusRecord::new(0.0, 0.0, 0, 140.0).power_level(), 100.0);
        assert_eq!(StatusRecord::new(0.0, 0.0, 0, -3.0).power_level(), 0.0);
        assert_eq!(StatusRecord::new(0.0, 0.0, 0, f64::NAN).power_level(), 0.0);
    }

    #[test]
    fn record_serializes_with_wire_field_names() {
        let record = StatusRecord::new(10.0, 20.0, 1_700_000_000_000, 87.5);
        let value = serde_json::to_value(record).unwrap();
        assert_eq!(
            value,
            json!({"lat": 10.0, "lng": 20.0, "time": 1_700_000_000_000_i64, "power": 87.5})
        );
    }

    #[test]
    fn encode_keys_by_stringified_index() {
        let history = vec![
            StatusRecord::new(1.0, 1.0, 2, 50.0),
            StatusRecord::new(0.0, 0.0, 1, 60.0),
        ];
        let value = encode_history(&history).unwrap();
        assert_eq!(value["0"]["lat"], 1.0);
        assert_eq!(value["1"]["time"], 1);
    }

    #[test]
    fn decode_orders_by_numeric_index_and_closes_gaps() {
        let value = json!({
            "10": {"lat": 3.0, "lng": 3.0, "time": 3, "power": 30.0},
            "2": {"lat": 2.0, "lng": 2.0, "time": 2, "power": 20.0},
            "0": {"lat": 1.0, "lng": 1.0, "time": 1, "power": 10.0},
        });
        let history = decode_snapshot(&value);
        let lats: Vec<f64> = history.iter().map(StatusRecord::latitude).collect();
        assert_eq!(lats, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn decode_skips_malformed_entries() {
        let value = json!({
            "0": {"lat": 1.0, "lng": 1.0, "time": 1, "power": 10.0},
            "x": {"lat": 2.0, "lng": 2.0, "time": 2, "power": 20.0},
            "1": {"lat": "north", "lng": 2.0, "time": 2, "power": 20.0},
            "2": {"lng": 2.0, "time": 2, "power": 20.0},
            "3": 17,
        });
        assert_eq!(decode_snapshot(&value).len(), 1);
    }

    #[test]
    fn decode_accepts_array_form_and_ignores_scalars() {
        let value = json!([
            {"lat": 1.0, "lng": 1.0, "time": 1, "power": 10.0},
            {"lat": 2.0, "lng": 2.0, "time": 2.0, "power": 20.0},
        ]);
        assert_eq!(decode_snapshot(&value).len(), 2);
        assert!(decode_snapshot(&Value::Null).is_empty());
        assert!(decode_snapshot(&json!("garbage")).is_empty());
    }
}
