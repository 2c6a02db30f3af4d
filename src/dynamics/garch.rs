use std::f64::consts::PI;

use crate::error::PipelineError;

use super::nelder_mead::{minimize, NelderMeadConfig};

const MODEL: &str = "garch";
pub const MIN_GARCH_OBSERVATIONS: usize = 20;
const BACKCAST_DECAY: f64 = 0.94;
const BACKCAST_WINDOW: usize = 75;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GarchOrder {
    /// Lagged squared shocks.
    pub p: usize,
    /// Lagged conditional variances.
    pub q: usize,
}

/// Fitted constant-mean GARCH(p, q) and its one-step-ahead forecast.
#[derive(Debug, Clone, PartialEq)]
pub struct VolatilityForecast {
    pub mu: f64,
    pub omega: f64,
    pub alpha: Vec<f64>,
    pub beta: Vec<f64>,
    pub log_likelihood: f64,
    pub persistence: f64,
    pub aic: f64,
    pub bic: f64,
    pub variance: f64,
    pub volatility: f64,
    pub iterations: usize,
}

#[derive(Debug, Clone)]
struct GarchParams {
    mu: f64,
    omega: f64,
    alpha: Vec<f64>,
    beta: Vec<f64>,
}

impl GarchParams {
    /// theta = [mu, ln omega, a_1..a_p, b_1..b_q]; ARCH and GARCH weights share one
    /// logistic normalisation so their sum stays below one.
    fn from_theta(theta: &[f64], order: GarchOrder) -> Self {
        let exp: Vec<f64> = theta[2..].iter().map(|v| v.clamp(-50.0, 50.0).exp()).collect();
        let denom = 1.0 + exp.iter().sum::<f64>();
        Self {
            mu: theta[0],
            omega: theta[1].clamp(-50.0, 50.0).exp(),
            alpha: exp[..order.p].iter().map(|e| e / denom).collect(),
            beta: exp[order.p..].iter().map(|e| e / denom).collect(),
        }
    }

    fn persistence(&self) -> f64 {
        self.alpha.iter().sum::<f64>() + self.beta.iter().sum::<f64>()
    }
}

fn initial_theta(mean: f64, order: GarchOrder) -> Vec<f64> {
    // alpha total 0.1, beta total 0.8, unit unconditional variance.
    let mut theta = vec![mean, 0.1_f64.ln()];
    theta.extend(std::iter::repeat((1.0 / order.p as f64).ln()).take(order.p));
    theta.extend(std::iter::repeat((8.0 / order.q as f64).ln()).take(order.q));
    theta
}

/// Exponentially weighted mean of the first squared residuals, used for pre-sample terms.
fn backcast(resid_sq: &[f64]) -> f64 {
    let tau = resid_sq.len().min(BACKCAST_WINDOW);
    let mut weight = 1.0;
    let mut total_weight = 0.0;
    let mut acc = 0.0;
    for r in &resid_sq[..tau] {
        acc += weight * r;
        total_weight += weight;
        weight *= BACKCAST_DECAY;
    }
    acc / total_weight
}

/// Conditional variance path for `series` under `params`, plus the next-step variance.
fn variance_path(series: &[f64], params: &GarchParams) -> (Vec<f64>, Vec<f64>, f64) {
    let resid_sq: Vec<f64> = series.iter().map(|x| (x - params.mu).powi(2)).collect();
    let bc = backcast(&resid_sq);
    let n = series.len();
    let mut sigma2 = Vec::with_capacity(n);
    let step = |t: usize, sigma2: &[f64]| -> f64 {
        let arch: f64 = params
            .alpha
            .iter()
            .enumerate()
            .map(|(i, a)| a * if t > i { resid_sq[t - 1 - i] } else { bc })
            .sum();
        let garch: f64 = params
            .beta
            .iter()
            .enumerate()
            .map(|(j, b)| b * if t > j { sigma2[t - 1 - j] } else { bc })
            .sum();
        params.omega + arch + garch
    };
    for t in 0..n {
        let s = step(t, &sigma2);
        sigma2.push(s);
    }
    let next = step(n, &sigma2);
    (resid_sq, sigma2, next)
}

fn negative_log_likelihood(series: &[f64], params: &GarchParams) -> f64 {
    let (resid_sq, sigma2, _) = variance_path(series, params);
    0.5 * resid_sq
        .iter()
        .zip(&sigma2)
        .map(|(e2, s2)| (2.0 * PI).ln() + s2.ln() + e2 / s2)
        .sum::<f64>()
}

/// Fit GARCH(p, q) by maximum likelihood and forecast the next conditional variance.
///
/// The series is standardised before fitting; reported mu, omega, likelihood and the
/// forecast are mapped back to the original scale.
pub fn fit_garch(
    series: &[f64],
    order: GarchOrder,
    max_iter: usize,
) -> Result<VolatilityForecast, PipelineError> {
    if order.p == 0 || order.q == 0 {
        return Err(PipelineError::Configuration(format!(
            "GARCH_p and GARCH_q must be at least 1, got p={} q={}",
            order.p, order.q
        )));
    }
    let n = series.len();
    let required = MIN_GARCH_OBSERVATIONS.max(order.p + order.q + 2);
    if n < required {
        return Err(PipelineError::InsufficientHistory { rows: n, required });
    }
    if series.iter().any(|v| !v.is_finite()) {
        return Err(PipelineError::model_fit(MODEL, "series contains non-finite values"));
    }

    let mean = series.iter().sum::<f64>() / n as f64;
    let var = series.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n as f64;
    let sd = var.sqrt();
    if !(sd.is_finite() && sd > 1e-12 * (1.0 + mean.abs())) {
        return Err(PipelineError::model_fit(MODEL, "spread has zero variance"));
    }
    let z: Vec<f64> = series.iter().map(|x| (x - mean) / sd).collect();

    let objective = |theta: &[f64]| negative_log_likelihood(&z, &GarchParams::from_theta(theta, order));
    let cfg = NelderMeadConfig {
        max_iter,
        ..NelderMeadConfig::default()
    };
    let min = minimize(objective, &initial_theta(0.0, order), cfg);
    if !min.converged {
        return Err(PipelineError::model_fit(
            MODEL,
            format!("likelihood optimizer did not converge in {} iterations", max_iter),
        ));
    }
    if !min.value.is_finite() {
        return Err(PipelineError::model_fit(MODEL, "likelihood is not finite"));
    }

    let fitted = GarchParams::from_theta(&min.x, order);
    let (_, _, next_z) = variance_path(&z, &fitted);
    let variance = next_z * var;
    if !(variance.is_finite() && variance >= 0.0) {
        return Err(PipelineError::model_fit(
            MODEL,
            format!("forecast variance {} is invalid", variance),
        ));
    }

    let log_likelihood = -min.value - n as f64 * sd.ln();
    let k = (2 + order.p + order.q) as f64;
    Ok(VolatilityForecast {
        mu: mean + sd * fitted.mu,
        omega: fitted.omega * var,
        persistence: fitted.persistence(),
        alpha: fitted.alpha,
        beta: fitted.beta,
        log_likelihood,
        aic: -2.0 * log_likelihood + 2.0 * k,
        bic: -2.0 * log_likelihood + k * (n as f64).ln(),
        variance,
        volatility: variance.sqrt(),
        iterations: min.iterations,
    })
}
