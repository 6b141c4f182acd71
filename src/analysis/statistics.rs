// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/glowbarn-rs

//! Descriptive statistics and ordinary least squares

use nalgebra::{Cholesky, DMatrix, DVector, Dyn};

use crate::error::FallbackReason;

pub fn mean(data: &[f64]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    data.iter().sum::<f64>() / data.len() as f64
}

/// Population variance (divides by `n`). Zero for fewer than two values.
pub fn variance(data: &[f64]) -> f64 {
    if data.len() < 2 {
        return 0.0;
    }
    let m = mean(data);
    data.iter().map(|&x| (x - m).powi(2)).sum::<f64>() / data.len() as f64
}

/// First differences `x[t] - x[t-1]`.
pub fn diff(data: &[f64]) -> Vec<f64> {
    data.windows(2).map(|w| w[1] - w[0]).collect()
}

/// Result of a single-equation least-squares fit.
#[derive(Debug, Clone)]
pub struct OlsFit {
    pub params: DVector<f64>,
    pub residuals: DVector<f64>,
    pub ssr: f64,
    pub nobs: usize,
    /// Number of regressors including the intercept column.
    pub k: usize,
    xtx_inv: DMatrix<f64>,
}

impl OlsFit {
    /// Gaussian log-likelihood at the MLE of the error variance.
    pub fn log_likelihood(&self) -> f64 {
        let n = self.nobs as f64;
        -n / 2.0 * ((2.0 * std::f64::consts::PI).ln() + (self.ssr / n).ln() + 1.0)
    }

    pub fn aic(&self) -> f64 {
        -2.0 * self.log_likelihood() + 2.0 * self.k as f64
    }

    /// t-statistic of coefficient `j`.
    pub fn t_value(&self, j: usize) -> Result<f64, FallbackReason> {
        let df = self.nobs.saturating_sub(self.k);
        if df == 0 {
            return Err(FallbackReason::SeriesTooShort { len: self.nobs, lag: self.k });
        }
        let sigma2 = self.ssr / df as f64;
        let se = (sigma2 * self.xtx_inv[(j, j)]).sqrt();
        let t = self.params[j] / se;
        if t.is_finite() {
            Ok(t)
        } else {
            Err(FallbackReason::NonFinite("t statistic"))
        }
    }
}

/// Least squares via the normal equations on unit-norm columns. Fails when
/// the regressors are collinear.
pub fn ols(x: &DMatrix<f64>, y: &DVector<f64>) -> Result<OlsFit, FallbackReason> {
    let (nobs, k) = x.shape();
    if nobs <= k {
        return Err(FallbackReason::SeriesTooShort { len: nobs, lag: k });
    }

    let (xs, scales) = equilibrate(x)?;
    let xst = xs.transpose();
    let chol = factor_normal_equations(&xst * &xs)?;

    let mut params = chol.solve(&(&xst * y));
    params.component_div_assign(&scales);

    let residuals = y - x * &params;
    let ssr = residuals.norm_squared();
    if !ssr.is_finite() {
        return Err(FallbackReason::NonFinite("residuals"));
    }

    let mut xtx_inv = chol.inverse();
    for i in 0..k {
        for j in 0..k {
            xtx_inv[(i, j)] /= scales[i] * scales[j];
        }
    }

    Ok(OlsFit {
        params,
        residuals,
        ssr,
        nobs,
        k,
        xtx_inv,
    })
}

/// Multivariate least squares `Y = X B`, shared design across equations.
/// Returns `B` (k x m) and the residual matrix (n x m).
pub fn ols_multi(x: &DMatrix<f64>, y: &DMatrix<f64>) -> Result<(DMatrix<f64>, DMatrix<f64>), FallbackReason> {
    let (nobs, k) = x.shape();
    if nobs <= k {
        return Err(FallbackReason::SeriesTooShort { len: nobs, lag: k });
    }

    let (xs, scales) = equilibrate(x)?;
    let xst = xs.transpose();
    let chol = factor_normal_equations(&xst * &xs)?;

    let mut coefs = chol.solve(&(&xst * y));
    for (i, mut row) in coefs.row_iter_mut().enumerate() {
        row /= scales[i];
    }

    let residuals = y - x * &coefs;
    if residuals.iter().any(|v| !v.is_finite()) {
        return Err(FallbackReason::NonFinite("residuals"));
    }
    Ok((coefs, residuals))
}

/// Smallest Cholesky pivot, relative to the largest, accepted on the
/// equilibrated normal equations.
const PIVOT_RATIO_FLOOR: f64 = 1e-7;

/// Scale every column to unit Euclidean norm.
fn equilibrate(x: &DMatrix<f64>) -> Result<(DMatrix<f64>, DVector<f64>), FallbackReason> {
    let scales = DVector::from_iterator(x.ncols(), x.column_iter().map(|c| c.norm()));
    if scales.iter().any(|s| !s.is_finite()) {
        return Err(FallbackReason::NonFinite("design matrix"));
    }
    if scales.iter().any(|&s| s == 0.0) {
        return Err(FallbackReason::SingularMatrix("all-zero regressor".to_string()));
    }

    let mut xs = x.clone();
    for (j, mut col) in xs.column_iter_mut().enumerate() {
        col /= scales[j];
    }
    Ok((xs, scales))
}

fn factor_normal_equations(xtx: DMatrix<f64>) -> Result<Cholesky<f64, Dyn>, FallbackReason> {
    let k = xtx.nrows();
    let singular = || FallbackReason::SingularMatrix(format!("{}x{} normal equations", k, k));
    let chol = xtx.cholesky().ok_or_else(singular)?;

    let diag = chol.l_dirty().diagonal();
    let max = diag.iter().cloned().fold(0.0_f64, f64::max);
    let min = diag.iter().cloned().fold(f64::INFINITY, f64::min);
    if !(max > 0.0) || !(min / max >= PIVOT_RATIO_FLOOR) {
        return Err(singular());
    }
    Ok(chol)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variance_is_population_variance() {
        assert_eq!(variance(&[1.0, 2.0, 3.0, 4.0]), 1.25);
        assert_eq!(variance(&[5.0]), 0.0);
        assert_eq!(variance(&[]), 0.0);
    }

    #[test]
    fn test_diff() {
        assert_eq!(diff(&[1.0, 4.0, 9.0]), vec![3.0, 5.0]);
        assert!(diff(&[1.0]).is_empty());
    }

    #[test]
    fn test_ols_recovers_line() {
        // y = 2 + 3x with a small deterministic wobble
        let xs: Vec<f64> = (0..20).map(|i| i as f64).collect();
        let x = DMatrix::from_fn(20, 2, |r, c| if c == 0 { 1.0 } else { xs[r] });
        let y = DVector::from_fn(20, |r, _| 2.0 + 3.0 * xs[r] + if r % 2 == 0 { 0.01 } else { -0.01 });

        let fit = ols(&x, &y).unwrap();
        assert!((fit.params[0] - 2.0).abs() < 0.05);
        assert!((fit.params[1] - 3.0).abs() < 0.01);
        assert!(fit.t_value(1).unwrap() > 100.0);
        assert!(fit.aic().is_finite());
    }

    #[test]
    fn test_ols_rejects_collinear_design() {
        let x = DMatrix::from_fn(10, 2, |_, _| 1.0);
        let y = DVector::from_fn(10, |r, _| r as f64);
        assert!(matches!(ols(&x, &y), Err(FallbackReason::SingularMatrix(_))));
    }

    #[test]
    fn test_ols_rejects_short_sample() {
        let x = DMatrix::from_fn(2, 3, |r, c| (r + c) as f64);
        let y = DVector::from_fn(2, |r, _| r as f64);
        assert!(matches!(ols(&x, &y), Err(FallbackReason::SeriesTooShort { .. })));
    }
}
