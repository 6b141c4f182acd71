//! Augmented Dickey-Fuller unit-root test (constant, no trend)

use nalgebra::{DMatrix, DVector};
use statrs::function::erf::erfc;

use super::statistics::{diff, mean, ols, OlsFit};
use crate::error::FallbackReason;

/// Outcome of an ADF test.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdfResult {
    pub statistic: f64,
    pub p_value: f64,
    pub used_lag: usize,
    pub nobs: usize,
}

impl AdfResult {
    pub fn is_stationary(&self, significance: f64) -> bool {
        self.p_value <= significance
    }
}

/// Run the test with the lag length picked by AIC, starting from
/// `ceil(12 * (n/100)^(1/4))` and capped so the regression stays estimable.
pub fn adf_test(series: &[f64]) -> Result<AdfResult, FallbackReason> {
    let n = series.len();
    let max_lag = ((12.0 * (n as f64 / 100.0).powf(0.25)).ceil() as usize).min((n / 2).saturating_sub(2));
    if n < 6 {
        return Err(FallbackReason::SeriesTooShort { len: n, lag: max_lag });
    }

    // Lag search on a common sample so AIC values are comparable.
    let mut best: Option<(usize, f64)> = None;
    for lag in 0..=max_lag {
        let fit = match adf_regression(series, lag, max_lag) {
            Ok(fit) => fit,
            Err(_) => continue,
        };
        let aic = fit.aic();
        if aic.is_finite() && best.map_or(true, |(_, b)| aic < b) {
            best = Some((lag, aic));
        }
    }
    let (used_lag, _) = best.ok_or(FallbackReason::SeriesTooShort { len: n, lag: max_lag })?;

    let fit = adf_regression(series, used_lag, used_lag)?;
    let statistic = fit.t_value(1)?;

    Ok(AdfResult {
        statistic,
        p_value: mackinnon_p_value(statistic),
        used_lag,
        nobs: fit.nobs,
    })
}

/// `dx[t] = a + b * x[t-1] + sum_i g_i * dx[t-i] + e`, dropping the first
/// `skip` differenced observations. Column 1 holds `b`.
fn adf_regression(series: &[f64], lag: usize, skip: usize) -> Result<OlsFit, FallbackReason> {
    let dx = diff(series);
    if dx.len() <= skip {
        return Err(FallbackReason::SeriesTooShort { len: series.len(), lag });
    }

    let rows: Vec<usize> = (skip..dx.len()).collect();
    let nobs = rows.len();
    let k = 2 + lag;

    // x[t-1] for dx[t] is series[t]; centring leaves b and its t-stat unchanged.
    let level_mean = mean(&rows.iter().map(|&t| series[t]).collect::<Vec<_>>());

    let x = DMatrix::from_fn(nobs, k, |r, c| {
        let t = rows[r];
        match c {
            0 => 1.0,
            1 => series[t] - level_mean,
            _ => dx[t - (c - 1)],
        }
    });
    let y = DVector::from_fn(nobs, |r, _| dx[rows[r]]);

    ols(&x, &y)
}

// MacKinnon (1994) response-surface coefficients, constant-only, one variable.
const TAU_MAX: f64 = 2.74;
const TAU_MIN: f64 = -18.83;
const TAU_STAR: f64 = -1.61;
const TAU_SMALL_P: [f64; 3] = [2.1659, 1.4412, 0.038269];
const TAU_LARGE_P: [f64; 4] = [1.7339, 0.93202, -0.12745, -0.010368];

/// Approximate p-value of an ADF statistic.
pub fn mackinnon_p_value(statistic: f64) -> f64 {
    if statistic.is_nan() {
        return 1.0;
    }
    if statistic > TAU_MAX {
        return 1.0;
    }
    if statistic < TAU_MIN {
        return 0.0;
    }

    let coefs: &[f64] = if statistic <= TAU_STAR { &TAU_SMALL_P } else { &TAU_LARGE_P };
    let z = coefs.iter().rev().fold(0.0, |acc, &c| acc * statistic + c);
    standard_normal_cdf(z)
}

fn standard_normal_cdf(z: f64) -> f64 {
    0.5 * erfc(-z / std::f64::consts::SQRT_2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::prelude::*;
    use rand_distr::StandardNormal;

    fn white_noise(n: usize, seed: u64) -> Vec<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n).map(|_| rng.sample::<f64, _>(StandardNormal)).collect()
    }

    #[test]
    fn test_p_value_bounds() {
        assert_eq!(mackinnon_p_value(5.0), 1.0);
        assert_eq!(mackinnon_p_value(-25.0), 0.0);
        assert_eq!(mackinnon_p_value(f64::NAN), 1.0);
    }

    #[test]
    fn test_p_value_matches_critical_values() {
        // 5% critical value for the constant-only case is about -2.86.
        let p = mackinnon_p_value(-2.86);
        assert!((p - 0.05).abs() < 0.01, "p = {}", p);
        // 1% critical value is about -3.43.
        let p = mackinnon_p_value(-3.43);
        assert!((p - 0.01).abs() < 0.005, "p = {}", p);
    }

    #[test]
    fn test_p_value_is_monotone() {
        let mut last = 0.0;
        for i in 0..200 {
            let stat = -10.0 + i as f64 * 0.06;
            let p = mackinnon_p_value(stat);
            assert!(p >= last - 1e-12);
            last = p;
        }
    }

    #[test]
    fn test_white_noise_is_stationary() {
        let series = white_noise(200, 1);
        let result = adf_test(&series).unwrap();
        assert!(result.is_stationary(0.05), "{:?}", result);
    }

    #[test]
    fn test_random_walk_is_not_stationary() {
        let steps = white_noise(200, 2);
        let walk: Vec<f64> = steps
            .iter()
            .scan(0.0, |acc, &s| {
                *acc += s + 0.5;
                Some(*acc)
            })
            .collect();
        let result = adf_test(&walk).unwrap();
        assert!(!result.is_stationary(0.05), "{:?}", result);
    }

    #[test]
    fn test_short_series_is_an_error() {
        assert!(adf_test(&[1.0, 2.0, 3.0]).is_err());
    }
}
