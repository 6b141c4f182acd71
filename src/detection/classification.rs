// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/glowbarn-rs

//! Speed-band activity classification

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::device::sanitize_speed;

/// Transportation mode, ordered by speed band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityLabel {
    Stationary,
    Walking,
    Cycling,
    Motor,
    Car,
    Bus,
}

/// Lower bound (km/h, inclusive), label and confidence for each band,
/// ascending. The only place band boundaries are defined.
const BANDS: [(f64, ActivityLabel, f64); 6] = [
    (0.0, ActivityLabel::Stationary, 0.90),
    (2.0, ActivityLabel::Walking, 0.85),
    (6.0, ActivityLabel::Cycling, 0.80),
    (15.0, ActivityLabel::Motor, 0.85),
    (40.0, ActivityLabel::Car, 0.90),
    (80.0, ActivityLabel::Bus, 0.75),
];

fn band(speed_kmh: f64) -> (ActivityLabel, f64) {
    let speed = sanitize_speed(speed_kmh);
    BANDS
        .iter()
        .rev()
        .find(|(lower, _, _)| speed >= *lower)
        .map(|&(_, label, confidence)| (label, confidence))
        .unwrap_or((ActivityLabel::Stationary, BANDS[0].2))
}

impl ActivityLabel {
    pub const ALL: [ActivityLabel; 6] = [
        ActivityLabel::Stationary,
        ActivityLabel::Walking,
        ActivityLabel::Cycling,
        ActivityLabel::Motor,
        ActivityLabel::Car,
        ActivityLabel::Bus,
    ];

    pub fn from_speed(speed_kmh: f64) -> Self {
        band(speed_kmh).0
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityLabel::Stationary => "stationary",
            ActivityLabel::Walking => "walking",
            ActivityLabel::Cycling => "cycling",
            ActivityLabel::Motor => "motor",
            ActivityLabel::Car => "car",
            ActivityLabel::Bus => "bus",
        }
    }
}

impl fmt::Display for ActivityLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown activity label: {0}")]
pub struct UnknownActivity(pub String);

impl FromStr for ActivityLabel {
    type Err = UnknownActivity;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        ActivityLabel::ALL
            .iter()
            .copied()
            .find(|label| label.as_str() == lower)
            .ok_or_else(|| UnknownActivity(s.to_string()))
    }
}

/// Description of the classifier for introspection.
#[derive(Debug, Clone, Serialize)]
pub struct ClassifierInfo {
    pub algorithm: &'static str,
    pub labels: Vec<&'static str>,
    pub features: Vec<&'static str>,
    /// Lower band boundaries in km/h, one per label
    pub boundaries_kmh: Vec<f64>,
}

/// Stateless speed-threshold classifier.
#[derive(Debug, Clone, Copy, Default)]
pub struct ActivityClassifier;

impl ActivityClassifier {
    pub fn new() -> Self {
        Self
    }

    pub fn classify(&self, speed_kmh: f64) -> ActivityLabel {
        band(speed_kmh).0
    }

    pub fn confidence(&self, speed_kmh: f64) -> f64 {
        band(speed_kmh).1
    }

    pub fn classify_with_confidence(&self, speed_kmh: f64) -> (ActivityLabel, f64) {
        band(speed_kmh)
    }

    pub fn model_info(&self) -> ClassifierInfo {
        ClassifierInfo {
            algorithm: "speed_bands",
            labels: BANDS.iter().map(|(_, label, _)| label.as_str()).collect(),
            features: vec!["speed"],
            boundaries_kmh: BANDS.iter().map(|(lower, _, _)| *lower).collect(),
        }
    }
}
