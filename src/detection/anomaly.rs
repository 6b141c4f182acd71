// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/glowbarn-rs

//! Off-route detection
//!
//! The detector keeps a model of "normal" places: a bounded trail of recent
//! fixes plus frequently visited low-speed locations mined from the store. A
//! fix is flagged when it is further from every normal place than an
//! activity- and speed-adjusted distance threshold.
//!
//! The detector performs no I/O. The caller checks [`AnomalyDetector::wants_clusters`]
//! and feeds mined locations through [`AnomalyDetector::load_clusters`].

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use tracing::debug;

use super::ActivityLabel;
use crate::analysis::{haversine_meters, GeoPoint};
use crate::config::AnomalyConfig;
use crate::device::{sanitize_speed, Fix};
use crate::error::FallbackReason;

/// Activity vocabulary used for thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityContext {
    Stationary,
    Walking,
    Running,
    Cycling,
    Driving,
    Unknown,
}

impl ActivityContext {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityContext::Stationary => "stationary",
            ActivityContext::Walking => "walking",
            ActivityContext::Running => "running",
            ActivityContext::Cycling => "cycling",
            ActivityContext::Driving => "driving",
            ActivityContext::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ActivityContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Default for ActivityContext {
    fn default() -> Self {
        ActivityContext::Unknown
    }
}

impl From<ActivityLabel> for ActivityContext {
    fn from(label: ActivityLabel) -> Self {
        match label {
            ActivityLabel::Stationary => ActivityContext::Stationary,
            ActivityLabel::Walking => ActivityContext::Walking,
            ActivityLabel::Cycling => ActivityContext::Cycling,
            ActivityLabel::Motor | ActivityLabel::Car | ActivityLabel::Bus => ActivityContext::Driving,
        }
    }
}

/// Radius of a frequent location: 100 m per visit, between 500 m and 2 km.
pub fn cluster_radius(frequency: u32) -> f64 {
    (frequency as f64 * 100.0).clamp(500.0, 2000.0)
}

/// Key for a location bucket: coordinates rounded to four decimals.
pub fn location_key(lat: f64, lon: f64) -> String {
    format!("{:.4},{:.4}", lat, lon)
}

/// A place visited often at low speed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrequentLocation {
    pub key: String,
    pub lat: f64,
    pub lon: f64,
    pub frequency: u32,
    pub radius_meters: f64,
}

impl FrequentLocation {
    pub fn new(key: String, lat: f64, lon: f64, frequency: u32) -> Self {
        Self {
            key,
            lat,
            lon,
            frequency,
            radius_meters: cluster_radius(frequency),
        }
    }

    pub fn center(&self) -> GeoPoint {
        GeoPoint::new(self.lat, self.lon)
    }

    pub fn contains(&self, point: &GeoPoint) -> bool {
        self.center().distance_to(point) <= self.radius_meters
    }
}

/// Parameters for mining frequent locations from history.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClusterQuery {
    /// Only fixes slower than this (km/h) are counted
    pub max_speed: f64,
    pub min_count: usize,
    pub limit: usize,
}

/// Full result of one detector call.
#[derive(Debug, Clone, Serialize)]
pub struct AnomalyAssessment {
    pub is_anomaly: bool,
    pub confidence: f64,
    /// Distance to the nearest normal place, when any is known
    pub min_distance_m: Option<f64>,
    pub threshold_m: f64,
    pub near_frequent_location: bool,
    pub skipped: bool,
    pub reason: String,
    #[serde(skip)]
    pub fallback: Option<FallbackReason>,
}

impl AnomalyAssessment {
    fn insufficient(reason: FallbackReason, threshold_m: f64) -> Self {
        Self {
            is_anomaly: false,
            confidence: 0.5,
            min_distance_m: None,
            threshold_m,
            near_frequent_location: false,
            skipped: false,
            reason: "Insufficient training data".to_string(),
            fallback: Some(reason),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DetectorInfo {
    pub initialized: bool,
    pub trail_len: usize,
    pub cluster_count: usize,
    pub clusters_loaded: bool,
    pub calls_since_mining: u64,
    pub min_training_points: usize,
}

pub struct AnomalyDetector {
    config: AnomalyConfig,
    trail: VecDeque<GeoPoint>,
    last_trail_timestamp: Option<i64>,
    clusters: Vec<FrequentLocation>,
    clusters_loaded: bool,
    calls_since_mining: u64,
    mined_at: Option<i64>,
}

impl AnomalyDetector {
    pub fn new(config: AnomalyConfig) -> Self {
        let capacity = config.max_trail;
        Self {
            config,
            trail: VecDeque::with_capacity(capacity),
            last_trail_timestamp: None,
            clusters: Vec::new(),
            clusters_loaded: false,
            calls_since_mining: 0,
            mined_at: None,
        }
    }

    pub fn cluster_query(&self) -> ClusterQuery {
        ClusterQuery {
            max_speed: self.config.cluster_max_speed,
            min_count: self.config.cluster_min_count,
            limit: self.config.cluster_limit,
        }
    }

    /// Whether the caller should mine frequent locations before the next
    /// call: on first use with enough history, then whenever the refresh
    /// policy says so.
    pub fn wants_clusters(&self, history_len: usize, now: i64) -> bool {
        if history_len < self.config.min_training_points {
            return false;
        }
        if !self.clusters_loaded {
            return true;
        }

        let by_calls = self.config.cluster_refresh_calls > 0
            && self.calls_since_mining >= self.config.cluster_refresh_calls;
        let by_time = self.config.cluster_refresh_secs > 0
            && self
                .mined_at
                .map_or(true, |t| now - t >= self.config.cluster_refresh_secs as i64);
        by_calls || by_time
    }

    /// Replace the frequent-location set. Locations arrive ordered by
    /// frequency; duplicate keys keep the first entry.
    pub fn load_clusters(&mut self, clusters: Vec<FrequentLocation>, now: i64) {
        let mut seen = std::collections::HashSet::new();
        self.clusters = clusters
            .into_iter()
            .filter(|c| c.center().is_finite() && seen.insert(c.key.clone()))
            .collect();
        self.clusters_loaded = true;
        self.calls_since_mining = 0;
        self.mined_at = Some(now);
        debug!("Loaded {} frequent locations", self.clusters.len());
    }

    pub fn clusters(&self) -> &[FrequentLocation] {
        &self.clusters
    }

    pub fn trail_len(&self) -> usize {
        self.trail.len()
    }

    /// `true` when `current` is off-route. Insufficient history and any
    /// numerical problem yield `false`.
    pub fn detect(&mut self, current: &Fix, history: &[Fix], activity: ActivityContext) -> bool {
        self.assess(current, history, activity).is_anomaly
    }

    /// Like [`try_detect`](Self::try_detect), with failures folded into a
    /// "normal" assessment at confidence 0.5.
    pub fn assess(&mut self, current: &Fix, history: &[Fix], activity: ActivityContext) -> AnomalyAssessment {
        match self.try_detect(current, history, activity) {
            Ok(assessment) => assessment,
            Err(reason) => {
                debug!("Anomaly detection skipped: {}", reason);
                AnomalyAssessment::insufficient(reason, self.base_threshold(activity))
            }
        }
    }

    pub fn try_detect(
        &mut self,
        current: &Fix,
        history: &[Fix],
        activity: ActivityContext,
    ) -> Result<AnomalyAssessment, FallbackReason> {
        if history.len() < self.config.min_training_points {
            return Err(FallbackReason::InsufficientData {
                have: history.len(),
                need: self.config.min_training_points,
            });
        }
        let point = current.point();
        if !point.is_finite() {
            return Err(FallbackReason::NonFinite("fix coordinates"));
        }

        self.update_trail(history);
        if self.clusters_loaded {
            self.calls_since_mining += 1;
        }

        let speed = sanitize_speed(current.speed);
        let near = self.clusters.iter().any(|c| c.contains(&point));
        let threshold = self.adjusted_threshold(activity, speed, near);

        let min_distance = self
            .trail
            .iter()
            .copied()
            .chain(self.clusters.iter().map(FrequentLocation::center))
            .map(|p| haversine_meters(point.lat, point.lon, p.lat, p.lon))
            .fold(None, |acc: Option<f64>, d| Some(acc.map_or(d, |m| m.min(d))));

        let min_distance = match min_distance {
            Some(d) => d,
            None => {
                return Ok(AnomalyAssessment::insufficient(
                    FallbackReason::InsufficientData {
                        have: 0,
                        need: 1,
                    },
                    threshold,
                ))
            }
        };

        let stationary_slow = activity == ActivityContext::Stationary && speed < 2.0;
        let skip_reason = if activity == ActivityContext::Stationary && speed < 1.0 {
            Some("stationary")
        } else if speed < 5.0 && near {
            Some("slow near frequent location")
        } else {
            None
        };

        let (is_anomaly, reason) = if let Some(why) = skip_reason {
            (false, format!("skipped: {}", why))
        } else if min_distance <= threshold {
            (false, "within threshold".to_string())
        } else {
            let required = if stationary_slow { 2.0 * threshold } else { threshold };
            if min_distance > required {
                (true, "beyond threshold".to_string())
            } else {
                (false, "rejected by secondary validation".to_string())
            }
        };

        let confidence = assessment_confidence(min_distance / threshold, is_anomaly, stationary_slow, near);

        Ok(AnomalyAssessment {
            is_anomaly,
            confidence,
            min_distance_m: Some(min_distance),
            threshold_m: threshold,
            near_frequent_location: near,
            skipped: skip_reason.is_some(),
            reason,
            fallback: None,
        })
    }

    fn base_threshold(&self, activity: ActivityContext) -> f64 {
        let t = &self.config.thresholds;
        match activity {
            ActivityContext::Stationary => t.stationary,
            ActivityContext::Walking => t.walking,
            ActivityContext::Running => t.running,
            ActivityContext::Cycling => t.cycling,
            ActivityContext::Driving => t.driving,
            ActivityContext::Unknown => t.unknown,
        }
    }

    fn adjusted_threshold(&self, activity: ActivityContext, speed: f64, near_cluster: bool) -> f64 {
        let base = self.base_threshold(activity);
        if near_cluster {
            base * self.config.near_cluster_multiplier
        } else if speed < self.config.low_speed_kmh {
            base.max(self.config.low_speed_floor_m)
        } else if speed > self.config.high_speed_kmh {
            base * self.config.high_speed_multiplier
        } else {
            base
        }
    }

    /// Seed the trail from the tail of history on first use, afterwards
    /// append only fixes newer than the last one seen.
    fn update_trail(&mut self, history: &[Fix]) {
        let fresh: &[Fix] = match self.last_trail_timestamp {
            None => &history[history.len().saturating_sub(self.config.initial_trail)..],
            Some(last) => {
                let start = history.iter().position(|f| f.timestamp > last).unwrap_or(history.len());
                &history[start..]
            }
        };

        for fix in fresh {
            let p = fix.point();
            if p.is_finite() {
                self.trail.push_back(p);
            }
            self.last_trail_timestamp = Some(self.last_trail_timestamp.map_or(fix.timestamp, |t| t.max(fix.timestamp)));
        }
        while self.trail.len() > self.config.max_trail {
            self.trail.pop_front();
        }
    }

    pub fn model_info(&self) -> DetectorInfo {
        DetectorInfo {
            initialized: self.last_trail_timestamp.is_some(),
            trail_len: self.trail.len(),
            cluster_count: self.clusters.len(),
            clusters_loaded: self.clusters_loaded,
            calls_since_mining: self.calls_since_mining,
            min_training_points: self.config.min_training_points,
        }
    }
}

/// Map `distance / threshold` to a confidence in the verdict.
fn assessment_confidence(normalized: f64, is_anomaly: bool, stationary_slow: bool, near_cluster: bool) -> f64 {
    let mut confidence = if normalized <= 0.5 {
        0.95
    } else if normalized <= 1.0 {
        0.85 - 0.35 * normalized
    } else {
        (0.6 + 0.35 * (normalized - 1.0).min(1.0)).min(0.95)
    };

    if stationary_slow {
        confidence = if is_anomaly { confidence.max(0.8) } else { confidence.max(0.9) };
    }
    if near_cluster && !is_anomaly {
        confidence = confidence.max(0.92);
    }
    confidence.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector() -> AnomalyDetector {
        AnomalyDetector::new(AnomalyConfig::default())
    }

    /// `n` fixes scattered within a few metres of `(lat, lon)`.
    fn history_around(lat: f64, lon: f64, n: usize) -> Vec<Fix> {
        (0..n)
            .map(|i| {
                let wobble = (i % 5) as f64 * 0.00005;
                Fix::new(lat + wobble, lon - wobble, 0.5, 1_000 + i as i64 * 10)
            })
            .collect()
    }

    #[test]
    fn test_short_history_is_never_anomalous() {
        let mut d = detector();
        let history = history_around(0.0, 0.0, 19);
        let far = Fix::new(45.0, 90.0, 60.0, 5_000);
        assert!(!d.detect(&far, &history, ActivityContext::Driving));
        let a = d.assess(&far, &history, ActivityContext::Driving);
        assert_eq!(a.confidence, 0.5);
        assert!(matches!(a.fallback, Some(FallbackReason::InsufficientData { have: 19, need: 20 })));
    }

    #[test]
    fn test_far_fix_while_driving_is_anomalous() {
        let mut d = detector();
        let history = history_around(0.0, 0.0, 30);
        let far = Fix::new(10.0, 10.0, 60.0, 5_000);
        let a = d.assess(&far, &history, ActivityContext::Driving);
        assert!(a.is_anomaly);
        assert_eq!(a.threshold_m, 5000.0);
        assert!(a.min_distance_m.unwrap() > 1_500_000.0);
        assert!((a.confidence - 0.95).abs() < 1e-9);
    }

    #[test]
    fn test_stationary_nearby_is_normal() {
        let mut d = detector();
        let history = history_around(1.0, 1.0, 20);
        let near = Fix::new(1.0003, 1.0003, 0.5, 5_000);
        let a = d.assess(&near, &history, ActivityContext::Stationary);
        assert!(!a.is_anomaly);
        assert!(a.skipped);
        assert!(a.confidence >= 0.9);
    }

    #[test]
    fn test_threshold_adjustments() {
        let d = detector();
        assert_eq!(d.adjusted_threshold(ActivityContext::Walking, 4.0, false), 800.0);
        assert_eq!(d.adjusted_threshold(ActivityContext::Walking, 1.0, false), 1500.0);
        assert_eq!(d.adjusted_threshold(ActivityContext::Stationary, 1.0, false), 2000.0);
        assert_eq!(d.adjusted_threshold(ActivityContext::Driving, 60.0, false), 5000.0);
        assert_eq!(d.adjusted_threshold(ActivityContext::Driving, 60.0, true), 3750.0);
        assert_eq!(d.adjusted_threshold(ActivityContext::Unknown, 10.0, false), 1000.0);
    }

    #[test]
    fn test_secondary_validation_for_slow_stationary() {
        let mut d = detector();
        let history = history_around(0.0, 0.0, 25);
        // About 3.3 km north: beyond the 2 km threshold but inside 2x.
        let fix = Fix::new(0.03, 0.0, 1.5, 5_000);
        let a = d.assess(&fix, &history, ActivityContext::Stationary);
        assert!(!a.is_anomaly);
        assert_eq!(a.reason, "rejected by secondary validation");

        let fix = Fix::new(0.05, 0.0, 1.5, 5_010);
        assert!(d.detect(&fix, &history, ActivityContext::Stationary));
    }

    #[test]
    fn test_frequent_location_extends_normal_area() {
        let mut d = detector();
        let history = history_around(0.0, 0.0, 25);
        d.load_clusters(vec![FrequentLocation::new(location_key(0.5, 0.5), 0.5, 0.5, 12)], 0);

        // Slow and inside the cluster radius: skipped.
        let fix = Fix::new(0.501, 0.5, 3.0, 5_000);
        let a = d.assess(&fix, &history, ActivityContext::Walking);
        assert!(a.near_frequent_location);
        assert!(a.skipped);
        assert!(!a.is_anomaly);
        assert!(a.confidence >= 0.92);

        // Fast near the cluster center is still normal since the center counts.
        let fix = Fix::new(0.505, 0.5, 30.0, 5_010);
        assert!(!d.detect(&fix, &history, ActivityContext::Driving));
    }

    #[test]
    fn test_cluster_radius_is_clamped() {
        assert_eq!(cluster_radius(1), 500.0);
        assert_eq!(cluster_radius(12), 1200.0);
        assert_eq!(cluster_radius(50), 2000.0);
        assert_eq!(location_key(1.23456, -0.000049), "1.2346,-0.0000");
    }

    #[test]
    fn test_trail_is_capped_and_incremental() {
        let mut d = detector();
        let history = history_around(0.0, 0.0, 150);
        let fix = Fix::new(0.0, 0.0, 10.0, 9_000);
        d.detect(&fix, &history, ActivityContext::Walking);
        assert_eq!(d.trail_len(), 100);

        // The same window again adds nothing.
        d.detect(&fix, &history, ActivityContext::Walking);
        assert_eq!(d.trail_len(), 100);

        let more: Vec<Fix> = (0..150)
            .map(|i| Fix::new(0.0, 0.0, 1.0, 20_000 + i))
            .collect();
        d.detect(&fix, &more, ActivityContext::Walking);
        assert_eq!(d.trail_len(), 200);
    }

    #[test]
    fn test_cluster_refresh_policy() {
        let mut d = detector();
        assert!(!d.wants_clusters(10, 0));
        assert!(d.wants_clusters(20, 0));
        d.load_clusters(Vec::new(), 0);
        assert!(!d.wants_clusters(20, 1_000_000));

        let mut config = AnomalyConfig::default();
        config.cluster_refresh_calls = 2;
        config.cluster_refresh_secs = 60;
        let mut d = AnomalyDetector::new(config);
        d.load_clusters(Vec::new(), 100);
        assert!(!d.wants_clusters(30, 120));
        assert!(d.wants_clusters(30, 160));

        let history = history_around(0.0, 0.0, 30);
        let fix = Fix::new(0.0, 0.0, 10.0, 9_000);
        d.detect(&fix, &history, ActivityContext::Walking);
        assert!(!d.wants_clusters(30, 120));
        d.detect(&fix, &history, ActivityContext::Walking);
        assert!(d.wants_clusters(30, 120));
    }

    #[test]
    fn test_activity_context_from_label() {
        assert_eq!(ActivityContext::from(ActivityLabel::Stationary), ActivityContext::Stationary);
        assert_eq!(ActivityContext::from(ActivityLabel::Cycling), ActivityContext::Cycling);
        assert_eq!(ActivityContext::from(ActivityLabel::Motor), ActivityContext::Driving);
        assert_eq!(ActivityContext::from(ActivityLabel::Bus), ActivityContext::Driving);
    }

    #[test]
    fn test_confidence_curve() {
        assert_eq!(assessment_confidence(0.2, false, false, false), 0.95);
        assert!((assessment_confidence(1.0, false, false, false) - 0.5).abs() < 1e-12);
        assert!((assessment_confidence(1.5, true, false, false) - 0.775).abs() < 1e-12);
        assert!((assessment_confidence(10.0, true, false, false) - 0.95).abs() < 1e-9);
        assert_eq!(assessment_confidence(0.9, false, true, false), 0.9);
    }
}
