use chrono::NaiveDate;

use crate::error::PipelineError;
use crate::model::signal::{SignalRow, SignalState};

/// Market readings for the held-out run date.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignalInputs {
    pub date: NaiveDate,
    pub future_value: f64,
    pub portfolio_value: f64,
    pub equilibrium: f64,
    pub volatility: f64,
}

impl SignalInputs {
    pub fn spread(&self) -> f64 {
        self.portfolio_value - self.future_value
    }
}

pub fn lower_bound(equilibrium: f64, volatility: f64, boundary_ratio: f64) -> f64 {
    equilibrium - boundary_ratio * volatility
}

/// Enter below the lower bound, hold while at or below equilibrium.
pub fn next_state(
    previous: SignalState,
    spread: f64,
    equilibrium: f64,
    lower_bound: f64,
) -> SignalState {
    match previous {
        SignalState::Flat if spread <= lower_bound => SignalState::Engaged,
        SignalState::Flat => SignalState::Flat,
        SignalState::Engaged if spread <= equilibrium => SignalState::Engaged,
        SignalState::Engaged => SignalState::Flat,
    }
}

/// Apply one daily transition. A missing previous state starts flat.
pub fn evaluate(
    previous: Option<SignalState>,
    inputs: &SignalInputs,
    boundary_ratio: f64,
) -> Result<SignalRow, PipelineError> {
    let previous = previous.unwrap_or_default();
    let spread = inputs.spread();
    let lower = lower_bound(inputs.equilibrium, inputs.volatility, boundary_ratio);

    for (name, value) in [
        ("spread", spread),
        ("equilibrium", inputs.equilibrium),
        ("volatility", inputs.volatility),
        ("lower bound", lower),
    ] {
        if !value.is_finite() {
            return Err(PipelineError::model_fit(
                "signal",
                format!("{} is {} on {}", name, value, inputs.date),
            ));
        }
    }

    let state = next_state(previous, spread, inputs.equilibrium, lower);
    tracing::info!(
        date = %inputs.date,
        spread,
        equilibrium = inputs.equilibrium,
        lower_bound = lower,
        previous = previous.as_str(),
        state = state.as_str(),
        "Evaluated signal"
    );

    Ok(SignalRow {
        date: inputs.date,
        volatility: inputs.volatility,
        equilibrium: inputs.equilibrium,
        lower_bound: lower,
        future_value: inputs.future_value,
        portfolio_value: inputs.portfolio_value,
        spread,
        previous,
        state,
    })
}
