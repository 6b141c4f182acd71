// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/glowbarn-rs

//! Vector autoregression fitted by least squares
//!
//! Rows of the data matrix are time steps, columns are variables. Each
//! variable is centred on its sample mean before fitting; the means are added
//! back when forecasting.

use nalgebra::DMatrix;

use super::statistics::ols_multi;
use crate::error::FallbackReason;

/// A fitted VAR(p) with intercept.
#[derive(Debug, Clone)]
pub struct VarModel {
    pub lag: usize,
    pub neqs: usize,
    pub nobs: usize,
    /// `(1 + lag * neqs) x neqs`. Row 0 is the intercept, then one block of
    /// `neqs` rows per lag, most recent lag first.
    pub coefs: DMatrix<f64>,
    pub means: Vec<f64>,
    /// Residual covariance, divided by `nobs`.
    pub sigma_u_mle: DMatrix<f64>,
    pub aic: f64,
    pub bic: f64,
}

/// Orders preferred by each information criterion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectedOrder {
    pub aic: usize,
    pub bic: usize,
}

impl VarModel {
    /// Fit on the whole sample.
    pub fn fit(data: &DMatrix<f64>, lag: usize) -> Result<Self, FallbackReason> {
        Self::fit_with_offset(data, lag, 0)
    }

    /// Fit dropping `offset` extra leading observations, so several lag
    /// orders can be compared on the same estimation sample.
    fn fit_with_offset(data: &DMatrix<f64>, lag: usize, offset: usize) -> Result<Self, FallbackReason> {
        let (n, neqs) = data.shape();
        let start = lag + offset;
        let k = 1 + lag * neqs;
        if neqs == 0 || n <= start + k {
            return Err(FallbackReason::SeriesTooShort { len: n, lag });
        }
        let nobs = n - start;

        let means: Vec<f64> = data.column_iter().map(|c| c.mean()).collect();
        let centred = DMatrix::from_fn(n, neqs, |r, c| data[(r, c)] - means[c]);

        let x = DMatrix::from_fn(nobs, k, |r, c| {
            if c == 0 {
                return 1.0;
            }
            let t = start + r;
            let lag_i = (c - 1) / neqs + 1;
            let var = (c - 1) % neqs;
            centred[(t - lag_i, var)]
        });
        let y = centred.rows(start, nobs).into_owned();

        let (coefs, resid) = ols_multi(&x, &y)?;

        let sigma_u_mle = resid.transpose() * &resid / nobs as f64;
        let det = sigma_u_mle.determinant();
        if !(det > 0.0) || !det.is_finite() {
            return Err(FallbackReason::DegenerateCovariance);
        }

        let ld = det.ln();
        let free_params = (lag * neqs * neqs + neqs) as f64;
        let nobs_f = nobs as f64;
        let aic = ld + 2.0 / nobs_f * free_params;
        let bic = ld + nobs_f.ln() / nobs_f * free_params;

        Ok(Self {
            lag,
            neqs,
            nobs,
            coefs,
            means,
            sigma_u_mle,
            aic,
            bic,
        })
    }

    /// Forecast `steps` rows ahead from the end of `data`. Row `i` of the
    /// result is the forecast `i + 1` steps out.
    pub fn forecast(&self, data: &DMatrix<f64>, steps: usize) -> Result<DMatrix<f64>, FallbackReason> {
        let (n, neqs) = data.shape();
        if neqs != self.neqs {
            return Err(FallbackReason::SingularMatrix(format!(
                "forecast input has {} columns, model has {}",
                neqs, self.neqs
            )));
        }
        if n < self.lag {
            return Err(FallbackReason::SeriesTooShort { len: n, lag: self.lag });
        }

        // Centred history, most recent last.
        let mut window: Vec<Vec<f64>> = (n - self.lag..n)
            .map(|r| (0..neqs).map(|c| data[(r, c)] - self.means[c]).collect())
            .collect();

        let mut out = DMatrix::zeros(steps, neqs);
        for step in 0..steps {
            let mut next = vec![0.0; neqs];
            for (eq, value) in next.iter_mut().enumerate() {
                let mut acc = self.coefs[(0, eq)];
                for lag_i in 1..=self.lag {
                    let past = &window[window.len() - lag_i];
                    for (var, &v) in past.iter().enumerate() {
                        acc += self.coefs[(1 + (lag_i - 1) * neqs + var, eq)] * v;
                    }
                }
                *value = acc;
            }

            for (c, &v) in next.iter().enumerate() {
                let value = v + self.means[c];
                if !value.is_finite() {
                    return Err(FallbackReason::NonFinite("forecast"));
                }
                out[(step, c)] = value;
            }
            if self.lag > 0 {
                window.remove(0);
                window.push(next);
            }
        }
        Ok(out)
    }
}

/// Compare VAR(0) through VAR(`max_lag`) on a common sample and report the
/// order minimising AIC and BIC. Orders that cannot be estimated are skipped.
pub fn select_order(data: &DMatrix<f64>, max_lag: usize) -> Result<SelectedOrder, FallbackReason> {
    let mut best_aic: Option<(usize, f64)> = None;
    let mut best_bic: Option<(usize, f64)> = None;

    for lag in 0..=max_lag {
        let model = match VarModel::fit_with_offset(data, lag, max_lag - lag) {
            Ok(m) => m,
            Err(_) => continue,
        };
        if model.aic.is_finite() && best_aic.map_or(true, |(_, v)| model.aic < v) {
            best_aic = Some((lag, model.aic));
        }
        if model.bic.is_finite() && best_bic.map_or(true, |(_, v)| model.bic < v) {
            best_bic = Some((lag, model.bic));
        }
    }

    match (best_aic, best_bic) {
        (Some((aic, _)), Some((bic, _))) => Ok(SelectedOrder { aic, bic }),
        _ => Err(FallbackReason::SeriesTooShort { len: data.nrows(), lag: max_lag }),
    }
}
