// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/glowbarn-rs

//! Simulated GPS device for demo/testing

use async_trait::async_trait;
use anyhow::Result;
use rand::prelude::*;
use rand_distr::StandardNormal;
use std::time::Duration;

use super::{Fix, FixSource};

/// Metres per degree of latitude, close enough for a simulator.
const METERS_PER_DEGREE: f64 = 111_320.0;

/// Movement phase the simulated device is in.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Phase {
    Parked,
    Walking,
    Driving,
}

impl Phase {
    fn speed_kmh(&self) -> f64 {
        match self {
            Phase::Parked => 0.3,
            Phase::Walking => 4.5,
            Phase::Driving => 45.0,
        }
    }
}

/// Produces a plausible trail: parked, walk, drive, walk, park, repeat.
/// Occasionally teleports far off-route to exercise the anomaly detector.
pub struct DeviceSimulator {
    id: String,
    rng: StdRng,
    interval: Duration,

    lat: f64,
    lon: f64,
    heading: f64,
    timestamp: i64,
    phase: Phase,
    phase_remaining: u32,

    /// GPS noise standard deviation, degrees
    noise_deg: f64,
    detour_probability: f64,
    remaining: Option<usize>,
}

impl DeviceSimulator {
    pub fn new(id: &str, start_lat: f64, start_lon: f64, start_timestamp: i64) -> Self {
        Self::with_rng(id, start_lat, start_lon, start_timestamp, StdRng::from_entropy())
    }

    pub fn with_seed(id: &str, start_lat: f64, start_lon: f64, start_timestamp: i64, seed: u64) -> Self {
        Self::with_rng(id, start_lat, start_lon, start_timestamp, StdRng::seed_from_u64(seed))
    }

    fn with_rng(id: &str, lat: f64, lon: f64, timestamp: i64, rng: StdRng) -> Self {
        Self {
            id: id.to_string(),
            rng,
            interval: Duration::from_secs(1),
            lat,
            lon,
            heading: 0.0,
            timestamp,
            phase: Phase::Parked,
            phase_remaining: 30,
            noise_deg: 3.0 / METERS_PER_DEGREE,
            detour_probability: 0.005,
            remaining: None,
        }
    }

    /// Wall-clock pause between fixes. Zero disables pacing.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Stop after `count` fixes.
    pub fn with_limit(mut self, count: usize) -> Self {
        self.remaining = Some(count);
        self
    }

    pub fn with_detour_probability(mut self, p: f64) -> Self {
        self.detour_probability = p.clamp(0.0, 1.0);
        self
    }

    /// Generate the next fix without waiting.
    pub fn generate(&mut self) -> Fix {
        if self.phase_remaining == 0 {
            self.advance_phase();
        }
        self.phase_remaining -= 1;

        let step_secs = self.interval.as_secs().max(1) as i64;
        self.timestamp += step_secs;

        let jitter = self.rng.gen_range(0.8..1.2);
        let speed = self.phase.speed_kmh() * jitter;
        let meters = speed / 3.6 * step_secs as f64;

        if self.phase != Phase::Parked {
            self.heading += self.rng.gen_range(-0.15..0.15);
            let dlat = meters * self.heading.cos() / METERS_PER_DEGREE;
            let dlon = meters * self.heading.sin() / (METERS_PER_DEGREE * self.lat.to_radians().cos().max(0.01));
            self.lat += dlat;
            self.lon += dlon;
        }

        let (nlat, nlon): (f64, f64) = (self.rng.sample(StandardNormal), self.rng.sample(StandardNormal));
        let mut lat = self.lat + nlat * self.noise_deg;
        let mut lon = self.lon + nlon * self.noise_deg;

        if self.rng.gen_bool(self.detour_probability) {
            // Off-route excursion of a few tens of kilometres, not persisted into the trail.
            lat += self.rng.gen_range(0.2..0.5) * if self.rng.gen_bool(0.5) { 1.0 } else { -1.0 };
            lon += self.rng.gen_range(0.2..0.5) * if self.rng.gen_bool(0.5) { 1.0 } else { -1.0 };
        }

        Fix::new(lat, lon, speed, self.timestamp)
    }

    fn advance_phase(&mut self) {
        let (next, duration) = match self.phase {
            Phase::Parked => (Phase::Walking, self.rng.gen_range(20..60)),
            Phase::Walking if self.rng.gen_bool(0.5) => (Phase::Driving, self.rng.gen_range(60..180)),
            Phase::Walking => (Phase::Parked, self.rng.gen_range(30..90)),
            Phase::Driving => (Phase::Walking, self.rng.gen_range(20..60)),
        };
        self.phase = next;
        self.phase_remaining = duration;
        self.heading = self.rng.gen_range(0.0..std::f64::consts::TAU);
    }
}

#[async_trait]
impl FixSource for DeviceSimulator {
    fn name(&self) -> &str {
        &self.id
    }

    async fn next_fix(&mut self) -> Result<Option<Fix>> {
        if let Some(remaining) = self.remaining.as_mut() {
            if *remaining == 0 {
                return Ok(None);
            }
            *remaining -= 1;
        }

        if !self.interval.is_zero() {
            tokio::time::sleep(self.interval).await;
        }

        Ok(Some(self.generate()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generates_monotonic_timestamps() {
        let mut sim = DeviceSimulator::with_seed("sim", -7.005, 110.438, 1_000, 7).with_detour_probability(0.0);
        let mut last = 1_000;
        for _ in 0..200 {
            let fix = sim.generate();
            assert!(fix.timestamp > last);
            assert!(fix.speed >= 0.0);
            last = fix.timestamp;
        }
    }

    #[test]
    fn test_stays_near_start_without_detours() {
        let mut sim = DeviceSimulator::with_seed("sim", 1.0, 1.0, 0, 11).with_detour_probability(0.0);
        for _ in 0..300 {
            let fix = sim.generate();
            assert!((fix.lat - 1.0).abs() < 0.2);
            assert!((fix.lon - 1.0).abs() < 0.2);
        }
    }

    #[tokio::test]
    async fn test_limit_exhausts_source() {
        let mut sim = DeviceSimulator::with_seed("sim", 0.0, 0.0, 0, 3)
            .with_interval(Duration::ZERO)
            .with_limit(3);
        let mut count = 0;
        while let Some(_) = sim.next_fix().await.unwrap() {
            count += 1;
        }
        assert_eq!(count, 3);
    }
}
