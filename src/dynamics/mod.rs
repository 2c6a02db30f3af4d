pub mod autoreg;
pub mod garch;
pub mod linalg;
pub mod nelder_mead;

use std::time::Instant;

pub use autoreg::{
    fit_autoregression, validate_one_step, DynamicsParameters, ValidationPoint, ValidationReport,
};
pub use garch::{fit_garch, GarchOrder, VolatilityForecast, MIN_GARCH_OBSERVATIONS};

use crate::error::PipelineError;
use crate::model::price_matrix::SpreadSeries;

/// Mean-reversion fit of the training-window spread.
pub fn estimate_dynamics(
    spread: &SpreadSeries,
    ar_p: usize,
) -> Result<DynamicsParameters, PipelineError> {
    let started = Instant::now();
    let params = fit_autoregression(&spread.values, ar_p)?;
    tracing::info!(
        alpha = params.alpha,
        beta = params.beta,
        sigma2 = params.sigma2,
        equilibrium = params.equilibrium,
        unconditional_sd = params.unconditional_sd,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Fitted spread autoregression"
    );
    Ok(params)
}

/// One-step volatility forecast of the training-window spread.
pub fn forecast_volatility(
    spread: &SpreadSeries,
    order: GarchOrder,
    max_iter: usize,
) -> Result<VolatilityForecast, PipelineError> {
    let started = Instant::now();
    let forecast = fit_garch(&spread.values, order, max_iter)?;
    tracing::info!(
        p = order.p,
        q = order.q,
        omega = forecast.omega,
        persistence = forecast.persistence,
        log_likelihood = forecast.log_likelihood,
        volatility = forecast.volatility,
        iterations = forecast.iterations,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Fitted spread volatility"
    );
    Ok(forecast)
}
