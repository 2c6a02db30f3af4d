use chrono::NaiveDate;

use crate::error::PipelineError;
use crate::model::price_matrix::SpreadSeries;

use super::linalg::least_squares;

const MODEL: &str = "autoregression";

/// AR(p) fit of the spread and the levels derived from it.
#[derive(Debug, Clone, PartialEq)]
pub struct DynamicsParameters {
    pub alpha: f64,
    /// Sum of the lag coefficients; the AR(1) coefficient when p = 1.
    pub beta: f64,
    pub lag_coefficients: Vec<f64>,
    pub sigma2: f64,
    pub equilibrium: f64,
    pub unconditional_sd: f64,
    pub observations: usize,
}

impl DynamicsParameters {
    /// Derive equilibrium and unconditional sd from fitted coefficients.
    pub fn from_coefficients(
        alpha: f64,
        lag_coefficients: Vec<f64>,
        sigma2: f64,
        observations: usize,
    ) -> Result<Self, PipelineError> {
        let beta: f64 = lag_coefficients.iter().sum();
        if !beta.is_finite() || beta.abs() >= 1.0 {
            return Err(PipelineError::NonStationarySpread { beta });
        }
        if !(alpha.is_finite() && sigma2.is_finite() && sigma2 >= 0.0) {
            return Err(PipelineError::model_fit(
                MODEL,
                format!("degenerate estimates alpha={} sigma2={}", alpha, sigma2),
            ));
        }
        Ok(Self {
            alpha,
            beta,
            equilibrium: alpha / (1.0 - beta),
            unconditional_sd: (sigma2 / (1.0 - beta * beta)).sqrt(),
            lag_coefficients,
            sigma2,
            observations,
        })
    }

    /// One-step prediction from the `p` most recent values, oldest first.
    pub fn predict_next(&self, recent: &[f64]) -> f64 {
        self.alpha
            + self
                .lag_coefficients
                .iter()
                .zip(recent.iter().rev())
                .map(|(b, y)| b * y)
                .sum::<f64>()
    }
}

/// OLS fit of y(t) = alpha + sum_i beta_i y(t - i) + e(t); sigma2 = SSR / nobs.
pub fn fit_autoregression(series: &[f64], p: usize) -> Result<DynamicsParameters, PipelineError> {
    if p == 0 {
        return Err(PipelineError::Configuration(
            "AR_p must be at least 1".to_string(),
        ));
    }
    // nobs must cover the p + 1 coefficients.
    let required = 2 * p + 1;
    if series.len() < required {
        return Err(PipelineError::InsufficientHistory {
            rows: series.len(),
            required,
        });
    }

    let design: Vec<Vec<f64>> = (p..series.len())
        .map(|t| {
            let mut row = Vec::with_capacity(p + 1);
            row.push(1.0);
            row.extend((1..=p).map(|lag| series[t - lag]));
            row
        })
        .collect();
    let target = &series[p..];
    let nobs = target.len();

    let (coef, ssr) = least_squares(&design, target).ok_or_else(|| {
        PipelineError::model_fit(MODEL, "lagged design matrix is singular (constant spread?)")
    })?;
    DynamicsParameters::from_coefficients(coef[0], coef[1..].to_vec(), ssr / nobs as f64, nobs)
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidationPoint {
    pub date: NaiveDate,
    pub actual: f64,
    pub predicted: f64,
}

/// Out-of-sample one-step check of the AR fit on the most recent rows.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationReport {
    pub holdout: usize,
    pub rmse: f64,
    pub mean_error: f64,
    pub points: Vec<ValidationPoint>,
}

/// Refit on all but the last `holdout` values and predict each held-back value one step ahead.
pub fn validate_one_step(
    spread: &SpreadSeries,
    p: usize,
    holdout: usize,
) -> Result<Option<ValidationReport>, PipelineError> {
    if holdout == 0 {
        return Ok(None);
    }
    let n = spread.len();
    if holdout >= n {
        return Err(PipelineError::InsufficientHistory {
            rows: n,
            required: holdout + 2 * p + 1,
        });
    }
    let split = n - holdout;
    let fit = fit_autoregression(&spread.values[..split], p)?;

    let points: Vec<ValidationPoint> = (split..n)
        .map(|t| ValidationPoint {
            date: spread.dates[t],
            actual: spread.values[t],
            predicted: fit.predict_next(&spread.values[t - p..t]),
        })
        .collect();
    let errors: Vec<f64> = points.iter().map(|pt| pt.actual - pt.predicted).collect();
    let count = errors.len() as f64;
    let rmse = (errors.iter().map(|e| e * e).sum::<f64>() / count).sqrt();
    let mean_error = errors.iter().sum::<f64>() / count;

    Ok(Some(ValidationReport {
        holdout,
        rmse,
        mean_error,
        points,
    }))
}
