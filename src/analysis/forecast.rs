// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/glowbarn-rs

//! Next-location forecaster
//!
//! Fits a VAR over the trailing (lat, lon) window and predicts the next fix.
//! Every path that cannot run the model degrades to a cheaper estimate:
//! damped linear extrapolation, jitter around the last fix, or a fixed
//! default coordinate.

use nalgebra::DMatrix;
use rand::prelude::*;
use rand_distr::StandardNormal;
use serde::Serialize;
use tracing::debug;

use super::geo::{planar_bearing, GeoPoint};
use super::stationarity::adf_test;
use super::statistics::{diff, variance};
use super::var::{select_order, VarModel};
use crate::config::ForecastConfig;
use crate::device::Fix;
use crate::error::FallbackReason;

/// Which series the VAR was fitted on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Representation {
    Levels,
    Differences,
}

/// How a prediction was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ForecastMethod {
    Var,
    VarDifferenced,
    DampedExtrapolation,
    NoMovement,
    LastFixJitter,
    DefaultLocation,
}

impl ForecastMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ForecastMethod::Var => "var",
            ForecastMethod::VarDifferenced => "var_differenced",
            ForecastMethod::DampedExtrapolation => "damped_extrapolation",
            ForecastMethod::NoMovement => "no_movement",
            ForecastMethod::LastFixJitter => "last_fix_jitter",
            ForecastMethod::DefaultLocation => "default_location",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub point: GeoPoint,
    pub method: ForecastMethod,
    /// Set whenever the VAR path was not used.
    pub fallback: Option<FallbackReason>,
}

/// Identifies the training window a model was fitted on.
#[derive(Debug, Clone, Copy, PartialEq)]
struct WindowSnapshot {
    len: usize,
    first_timestamp: i64,
    last_timestamp: i64,
    representation: Representation,
}

#[derive(Debug, Clone)]
struct ForecastModel {
    representation: Representation,
    model: VarModel,
    snapshot: WindowSnapshot,
}

/// Summary of the fitted state, for introspection endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct ForecastModelInfo {
    pub trained: bool,
    pub lag_order: Option<usize>,
    pub representation: Option<Representation>,
    pub nobs: Option<usize>,
    pub aic: Option<f64>,
    pub bic: Option<f64>,
}

pub struct LocationForecaster {
    config: ForecastConfig,
    rng: StdRng,
    fitted: Option<ForecastModel>,
}

impl LocationForecaster {
    pub fn new(config: ForecastConfig) -> Self {
        Self {
            config,
            rng: StdRng::from_entropy(),
            fitted: None,
        }
    }

    /// Deterministic jitter, for tests.
    pub fn with_seed(config: ForecastConfig, seed: u64) -> Self {
        Self {
            config,
            rng: StdRng::seed_from_u64(seed),
            fitted: None,
        }
    }

    /// Predict the location `steps` ahead of the last fix in `history`
    /// (chronological, most recent last). Only the first forecast step is
    /// returned. Never fails.
    pub fn predict_next(&mut self, history: &[Fix], steps: usize) -> Prediction {
        let n = history.len();
        let steps = steps.max(1);

        if n < self.config.min_data_points {
            self.fitted = None;
            let reason = FallbackReason::InsufficientData {
                have: n,
                need: self.config.min_data_points,
            };
            return self.short_history_estimate(history, reason);
        }

        let window = &history[n - self.config.variance_window.min(n)..];
        let lats: Vec<f64> = window.iter().map(|f| f.lat).collect();
        let lons: Vec<f64> = window.iter().map(|f| f.lon).collect();
        if variance(&lats) < self.config.min_variance && variance(&lons) < self.config.min_variance {
            self.fitted = None;
            let last = history[n - 1];
            let j = self.config.stationary_jitter_deg;
            let point = GeoPoint::new(
                last.lat + self.rng.gen_range(-j..=j),
                last.lon + self.rng.gen_range(-j..=j),
            );
            return Prediction {
                point,
                method: ForecastMethod::NoMovement,
                fallback: Some(FallbackReason::NoMovement),
            };
        }

        match self.try_var_forecast(history, steps) {
            Ok(prediction) => prediction,
            Err(reason) => {
                debug!("VAR forecast unavailable ({}), extrapolating", reason);
                self.fitted = None;
                self.short_history_estimate(history, reason)
            }
        }
    }

    /// Extrapolation ladder used below the VAR threshold and on any failure.
    fn short_history_estimate(&mut self, history: &[Fix], reason: FallbackReason) -> Prediction {
        match history {
            [.., prev, last] => {
                let d = self.config.damping;
                let point = GeoPoint::new(
                    last.lat + (last.lat - prev.lat) * d,
                    last.lon + (last.lon - prev.lon) * d,
                );
                Prediction {
                    point,
                    method: ForecastMethod::DampedExtrapolation,
                    fallback: Some(reason),
                }
            }
            [only] => Prediction {
                point: self.jitter(only.lat, only.lon),
                method: ForecastMethod::LastFixJitter,
                fallback: Some(reason),
            },
            [] => Prediction {
                point: self.jitter(self.config.default_lat, self.config.default_lon),
                method: ForecastMethod::DefaultLocation,
                fallback: Some(reason),
            },
        }
    }

    fn jitter(&mut self, lat: f64, lon: f64) -> GeoPoint {
        let sigma = self.config.jitter_std_deg;
        let dlat: f64 = self.rng.sample(StandardNormal);
        let dlon: f64 = self.rng.sample(StandardNormal);
        GeoPoint::new(lat + dlat * sigma, lon + dlon * sigma)
    }

    fn try_var_forecast(&mut self, history: &[Fix], steps: usize) -> Result<Prediction, FallbackReason> {
        let n = history.len();
        let levels = DMatrix::from_fn(n, 2, |r, c| if c == 0 { history[r].lat } else { history[r].lon });
        if levels.iter().any(|v| !v.is_finite()) {
            return Err(FallbackReason::NonFinite("history"));
        }

        let representation = self.choose_representation(&levels);
        let series = match representation {
            Representation::Levels => levels,
            Representation::Differences => DMatrix::from_fn(n - 1, 2, |r, c| levels[(r + 1, c)] - levels[(r, c)]),
        };

        let snapshot = WindowSnapshot {
            len: n,
            first_timestamp: history[0].timestamp,
            last_timestamp: history[n - 1].timestamp,
            representation,
        };

        let reusable = self.fitted.as_ref().map_or(false, |f| f.snapshot == snapshot);
        if !reusable {
            let model = self.fit(&series)?;
            debug!(
                "Fitted VAR({}) on {} {:?} observations, aic {:.3}",
                model.lag, model.nobs, representation, model.aic
            );
            self.fitted = Some(ForecastModel {
                representation,
                model,
                snapshot,
            });
        }

        let fitted = self.fitted.as_ref().ok_or(FallbackReason::InsufficientData {
            have: n,
            need: self.config.min_data_points,
        })?;
        let forecast = fitted.model.forecast(&series, steps)?;
        let (a, b) = (forecast[(0, 0)], forecast[(0, 1)]);

        let last = history[n - 1];
        let (point, method) = match fitted.representation {
            Representation::Levels => (GeoPoint::new(a, b), ForecastMethod::Var),
            Representation::Differences => (GeoPoint::new(last.lat + a, last.lon + b), ForecastMethod::VarDifferenced),
        };
        if !point.is_finite() {
            return Err(FallbackReason::NonFinite("forecast"));
        }

        Ok(Prediction {
            point,
            method,
            fallback: None,
        })
    }

    /// Differences when both differenced series test stationary, else levels.
    fn choose_representation(&self, levels: &DMatrix<f64>) -> Representation {
        let significance = self.config.stationarity_significance;
        let stationary = (0..levels.ncols()).all(|c| {
            let column: Vec<f64> = levels.column(c).iter().cloned().collect();
            match adf_test(&diff(&column)) {
                Ok(result) => result.is_stationary(significance),
                Err(_) => false,
            }
        });
        if stationary {
            Representation::Differences
        } else {
            Representation::Levels
        }
    }

    fn fit(&self, series: &DMatrix<f64>) -> Result<VarModel, FallbackReason> {
        let lag = self.select_lag(series);
        match VarModel::fit(series, lag) {
            Ok(model) => Ok(model),
            Err(reason) if lag != 1 => {
                debug!("VAR({}) fit failed ({}), retrying with lag 1", lag, reason);
                VarModel::fit(series, 1)
            }
            Err(reason) => Err(reason),
        }
    }

    /// AIC order if positive, else BIC order if positive, else a
    /// conservative `min(2, n/4)`; lag 1 when the search itself fails.
    fn select_lag(&self, series: &DMatrix<f64>) -> usize {
        let quarter = series.nrows() / 4;
        let max_lag = self.config.max_lag.min(quarter);
        let lag = match select_order(series, max_lag) {
            Ok(order) if order.aic > 0 => order.aic,
            Ok(order) if order.bic > 0 => order.bic,
            Ok(_) => quarter.min(2),
            Err(_) => 1,
        };
        lag.max(1)
    }

    /// Blend of trajectory consistency (0.6) and model fit quality (0.4).
    /// 0.3 when no model is fitted.
    pub fn confidence(&self, history: &[Fix]) -> f64 {
        let fitted = match &self.fitted {
            Some(f) => f,
            None => return 0.3,
        };

        let quality = (1.0 / (1.0 + fitted.model.aic.abs() / 100.0)).max(0.1);
        let consistency = trajectory_consistency(history);
        let score = 0.6 * consistency + 0.4 * quality;
        if score.is_finite() {
            score.clamp(0.0, 1.0)
        } else {
            0.3
        }
    }

    pub fn is_fitted(&self) -> bool {
        self.fitted.is_some()
    }

    pub fn model_info(&self) -> ForecastModelInfo {
        match &self.fitted {
            None => ForecastModelInfo {
                trained: false,
                lag_order: None,
                representation: None,
                nobs: None,
                aic: None,
                bic: None,
            },
            Some(f) => ForecastModelInfo {
                trained: true,
                lag_order: Some(f.model.lag),
                representation: Some(f.representation),
                nobs: Some(f.model.nobs),
                aic: Some(f.model.aic),
                bic: Some(f.model.bic),
            },
        }
    }
}

/// Average of inverse-variance of per-step speed (degrees per second) and
/// per-step heading. 0.5 with fewer than three fixes.
fn trajectory_consistency(history: &[Fix]) -> f64 {
    if history.len() < 3 {
        return 0.5;
    }

    let mut speeds = Vec::with_capacity(history.len() - 1);
    let mut headings = Vec::with_capacity(history.len() - 1);
    for w in history.windows(2) {
        let (a, b) = (w[0].point(), w[1].point());
        let dt = (w[1].timestamp - w[0].timestamp).max(1) as f64;
        let dist = ((b.lat - a.lat).powi(2) + (b.lon - a.lon).powi(2)).sqrt();
        speeds.push(dist / dt);
        headings.push(planar_bearing(&a, &b));
    }

    let speed_score = 1.0 / (1.0 + variance(&speeds));
    let heading_score = 1.0 / (1.0 + variance(&headings));
    (speed_score + heading_score) / 2.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn forecaster() -> LocationForecaster {
        LocationForecaster::with_seed(ForecastConfig::default(), 42)
    }

    fn noisy_track(n: usize, seed: u64) -> Vec<Fix> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n)
            .map(|i| {
                let e1: f64 = rng.sample(StandardNormal);
                let e2: f64 = rng.sample(StandardNormal);
                Fix::new(
                    -7.0 + i as f64 * 0.0002 + e1 * 0.00005,
                    110.4 + i as f64 * 0.0001 + e2 * 0.00005,
                    20.0,
                    1_700_000_000 + i as i64 * 5,
                )
            })
            .collect()
    }

    #[test]
    fn test_single_fix_stays_close() {
        let mut f = forecaster();
        let history = [Fix::new(-7.005, 110.438, 0.0, 1_700_000_000)];
        let p = f.predict_next(&history, 1);
        assert_eq!(p.method, ForecastMethod::LastFixJitter);
        assert!((p.point.lat + 7.005).abs() < 0.01);
        assert!((p.point.lon - 110.438).abs() < 0.01);
        assert!(matches!(p.fallback, Some(FallbackReason::InsufficientData { have: 1, need: 10 })));
    }

    #[test]
    fn test_empty_history_uses_default() {
        let mut f = forecaster();
        let p = f.predict_next(&[], 1);
        assert_eq!(p.method, ForecastMethod::DefaultLocation);
        assert!((p.point.lat + 7.005).abs() < 0.01);
        assert!((p.point.lon - 110.438).abs() < 0.01);
    }

    #[test]
    fn test_damped_extrapolation() {
        let mut f = forecaster();
        let history = [Fix::new(0.0, 0.0, 10.0, 1), Fix::new(0.001, 0.002, 10.0, 2)];
        let p = f.predict_next(&history, 1);
        assert_eq!(p.method, ForecastMethod::DampedExtrapolation);
        assert!((p.point.lat - 0.0018).abs() < 1e-12);
        assert!((p.point.lon - 0.0036).abs() < 1e-12);
    }

    #[test]
    fn test_identical_fixes_take_no_movement_branch() {
        let mut f = forecaster();
        let history: Vec<Fix> = (0..15).map(|i| Fix::new(1.0, 2.0, 0.0, 100 + i)).collect();
        let p = f.predict_next(&history, 1);
        assert_eq!(p.method, ForecastMethod::NoMovement);
        assert!((p.point.lat - 1.0).abs() <= 0.0001);
        assert!((p.point.lon - 2.0).abs() <= 0.0001);
        assert!(!f.is_fitted());
    }

    #[test]
    fn test_noisy_track_produces_finite_nearby_forecast() {
        let mut f = forecaster();
        let history = noisy_track(50, 8);
        let last = history[49];
        let p = f.predict_next(&history, 1);
        assert!(p.point.is_finite());
        assert!((p.point.lat - last.lat).abs() < 0.01, "{:?}", p);
        assert!((p.point.lon - last.lon).abs() < 0.01, "{:?}", p);

        assert_eq!(p.method, ForecastMethod::VarDifferenced);
        assert!(p.fallback.is_none());
        assert!(f.is_fitted());
        let info = f.model_info();
        assert!(info.trained);
        assert_eq!(info.representation, Some(Representation::Differences));
        assert!(info.lag_order.unwrap() >= 1);
        let c = f.confidence(&history);
        assert!((0.0..=1.0).contains(&c));
    }

    #[test]
    fn test_multi_step_request_returns_first_step() {
        let mut f = forecaster();
        let history = noisy_track(40, 21);
        let one = f.predict_next(&history, 1);
        let mut g = forecaster();
        let five = g.predict_next(&history, 5);
        assert_eq!(one.method, ForecastMethod::VarDifferenced);
        assert_eq!(five.method, ForecastMethod::VarDifferenced);
        assert!((one.point.lat - five.point.lat).abs() < 1e-12);
        assert!((one.point.lon - five.point.lon).abs() < 1e-12);
    }

    #[test]
    fn test_confidence_unfitted() {
        let f = forecaster();
        assert_eq!(f.confidence(&noisy_track(20, 1)), 0.3);
        assert!(!f.model_info().trained);
    }

    #[test]
    fn test_short_history_clears_model() {
        let mut f = forecaster();
        let _ = f.predict_next(&noisy_track(50, 8), 1);
        let _ = f.predict_next(&noisy_track(3, 8), 1);
        assert!(!f.is_fitted());
    }

    #[test]
    fn test_stationary_window_drops_previous_model() {
        let mut f = forecaster();
        let moving = f.predict_next(&noisy_track(50, 8), 1);
        assert!(moving.fallback.is_none());
        assert!(f.is_fitted());

        let parked: Vec<Fix> = (0..15).map(|i| Fix::new(1.0, 2.0, 0.0, 100 + i)).collect();
        let p = f.predict_next(&parked, 1);
        assert_eq!(p.method, ForecastMethod::NoMovement);
        assert!(!f.is_fitted());
        assert!(!f.model_info().trained);
        assert_eq!(f.confidence(&parked), 0.3);
    }

    #[test]
    fn test_constant_longitude_falls_back_to_extrapolation() {
        let mut f = forecaster();
        let history: Vec<Fix> = (0..20)
            .map(|i| Fix::new(1.0 + i as f64 * 0.001, 2.0, 10.0, 100 + i))
            .collect();
        let p = f.predict_next(&history, 1);
        assert_eq!(p.method, ForecastMethod::DampedExtrapolation);
        assert!(matches!(p.fallback, Some(FallbackReason::SingularMatrix(_))), "{:?}", p);
        assert!((p.point.lat - (1.019 + 0.001 * 0.8)).abs() < 1e-9);
        assert!((p.point.lon - 2.0).abs() < 1e-12);
        assert!(!f.is_fitted());
    }

    #[test]
    fn test_lag_selection_ladder() {
        let f = forecaster();
        let mut rng = StdRng::seed_from_u64(5);
        let noise = DMatrix::from_fn(40, 2, |_, _| rng.sample::<f64, _>(StandardNormal));

        let max_lag = f.config.max_lag.min(40 / 4);
        let order = select_order(&noise, max_lag).unwrap();
        let expected = if order.aic > 0 {
            order.aic
        } else if order.bic > 0 {
            order.bic
        } else {
            (40 / 4).min(2)
        };
        let lag = f.select_lag(&noise);
        assert_eq!(lag, expected);
        assert!((1..=max_lag).contains(&lag));

        // No lag can be fitted on a constant series; the search fails and lag 1 is used.
        let flat = DMatrix::from_element(12, 2, 3.0);
        assert!(select_order(&flat, 3).is_err());
        assert_eq!(f.select_lag(&flat), 1);
    }

    #[test]
    fn test_trajectory_consistency() {
        assert_eq!(trajectory_consistency(&noisy_track(2, 1)), 0.5);
        // Constant velocity in a straight line is perfectly consistent.
        let straight: Vec<Fix> = (0..10).map(|i| Fix::new(i as f64 * 0.001, 0.0, 5.0, i)).collect();
        assert!((trajectory_consistency(&straight) - 1.0).abs() < 1e-9);
    }
}
