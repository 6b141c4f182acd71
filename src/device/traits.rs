// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/glowbarn-rs

//! GPS fix type and the ingestion boundary

use async_trait::async_trait;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::analysis::GeoPoint;
use crate::error::PayloadError;

/// One GPS observation from the field device.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Fix {
    pub lat: f64,
    pub lon: f64,
    /// km/h
    pub speed: f64,
    /// Unix seconds
    pub timestamp: i64,
}

impl Fix {
    pub fn new(lat: f64, lon: f64, speed: f64, timestamp: i64) -> Self {
        Self { lat, lon, speed, timestamp }
    }

    pub fn point(&self) -> GeoPoint {
        GeoPoint::new(self.lat, self.lon)
    }

    /// Speed with NaN and negative values clamped to zero.
    pub fn sanitized_speed(&self) -> f64 {
        sanitize_speed(self.speed)
    }

    /// Normalize a raw device payload into a canonical fix.
    ///
    /// Accepts `lat`/`lon` or `latitude`/`longitude`, numbers or numeric
    /// strings. A missing timestamp is replaced by `now`.
    pub fn from_payload(bytes: &[u8], now: i64) -> Result<Self, PayloadError> {
        let value: Value = serde_json::from_slice(bytes)?;
        let obj = value.as_object().ok_or(PayloadError::NotAnObject)?;
        Self::from_object(obj, now)
    }

    pub fn from_object(obj: &Map<String, Value>, now: i64) -> Result<Self, PayloadError> {
        let lat = field(obj, &["lat", "latitude"]).ok_or(PayloadError::MissingCoordinate("lat"))?;
        let lon = field(obj, &["lon", "longitude", "lng"]).ok_or(PayloadError::MissingCoordinate("lon"))?;

        if !(-90.0..=90.0).contains(&lat) {
            return Err(PayloadError::OutOfRange { field: "lat", value: lat });
        }
        if !(-180.0..=180.0).contains(&lon) {
            return Err(PayloadError::OutOfRange { field: "lon", value: lon });
        }

        let speed = field(obj, &["speed"]).map(sanitize_speed).unwrap_or(0.0);
        let timestamp = field(obj, &["timestamp"])
            .filter(|t| *t > 0.0)
            .map(|t| t as i64)
            .unwrap_or(now);

        Ok(Self { lat, lon, speed, timestamp })
    }
}

/// NaN and negative speeds become zero.
pub fn sanitize_speed(speed: f64) -> f64 {
    if speed.is_nan() || speed < 0.0 {
        0.0
    } else {
        speed
    }
}

fn field(obj: &Map<String, Value>, names: &[&str]) -> Option<f64> {
    names.iter().find_map(|name| match obj.get(*name)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    })
    .filter(|v| v.is_finite())
}

/// A source of fixes: the MQTT transport or the demo simulator.
#[async_trait]
pub trait FixSource: Send {
    /// Human-readable source name for logs.
    fn name(&self) -> &str;

    /// Wait for the next fix. `Ok(None)` means the source is exhausted.
    async fn next_fix(&mut self) -> Result<Option<Fix>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_short_names() {
        let fix = Fix::from_payload(br#"{"lat": -7.005, "lon": 110.438, "speed": 12.5, "timestamp": 1700000000}"#, 0).unwrap();
        assert_eq!(fix, Fix::new(-7.005, 110.438, 12.5, 1_700_000_000));
    }

    #[test]
    fn test_payload_long_names_and_strings() {
        let fix = Fix::from_payload(br#"{"latitude": "1.5", "longitude": "2.5", "speed": "3"}"#, 42).unwrap();
        assert_eq!(fix.lat, 1.5);
        assert_eq!(fix.lon, 2.5);
        assert_eq!(fix.speed, 3.0);
        assert_eq!(fix.timestamp, 42);
    }

    #[test]
    fn test_payload_bad_speed_is_zero() {
        let fix = Fix::from_payload(br#"{"lat": 1, "lon": 2, "speed": "fast"}"#, 0).unwrap();
        assert_eq!(fix.speed, 0.0);

        let fix = Fix::from_payload(br#"{"lat": 1, "lon": 2, "speed": -4.0}"#, 0).unwrap();
        assert_eq!(fix.speed, 0.0);
    }

    #[test]
    fn test_payload_rejects_missing_or_invalid_coordinates() {
        assert!(matches!(
            Fix::from_payload(br#"{"lon": 2}"#, 0),
            Err(PayloadError::MissingCoordinate("lat"))
        ));
        assert!(matches!(
            Fix::from_payload(br#"{"lat": 95, "lon": 2}"#, 0),
            Err(PayloadError::OutOfRange { field: "lat", .. })
        ));
        assert!(matches!(Fix::from_payload(b"[1,2]", 0), Err(PayloadError::NotAnObject)));
        assert!(matches!(Fix::from_payload(b"not json", 0), Err(PayloadError::Json(_))));
    }

    #[test]
    fn test_sanitize_speed() {
        assert_eq!(sanitize_speed(f64::NAN), 0.0);
        assert_eq!(sanitize_speed(-1.0), 0.0);
        assert_eq!(sanitize_speed(5.0), 5.0);
    }
}
