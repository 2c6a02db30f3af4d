use chrono::NaiveDate;

use crate::error::PipelineError;

/// Position pair carried between daily runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SignalState {
    /// No basket, no future.
    #[default]
    Flat,
    /// Long the basket, short one unit of future.
    Engaged,
}

impl SignalState {
    /// Rebuild from stored positions; only (0, 0) and (1, -1) are legal.
    pub fn from_positions(portfolio: i64, future: i64) -> Result<Self, PipelineError> {
        match (portfolio, future) {
            (0, 0) => Ok(Self::Flat),
            (1, -1) => Ok(Self::Engaged),
            _ => Err(PipelineError::ConsistencyError { portfolio, future }),
        }
    }

    pub fn portfolio_position(self) -> i64 {
        match self {
            Self::Flat => 0,
            Self::Engaged => 1,
        }
    }

    pub fn future_position(self) -> i64 {
        match self {
            Self::Flat => 0,
            Self::Engaged => -1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Flat => "FLAT",
            Self::Engaged => "ENGAGED",
        }
    }
}

/// Everything the signal step computed for one run date.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalRow {
    pub date: NaiveDate,
    pub volatility: f64,
    pub equilibrium: f64,
    pub lower_bound: f64,
    pub future_value: f64,
    pub portfolio_value: f64,
    pub spread: f64,
    pub previous: SignalState,
    pub state: SignalState,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positions_round_trip_for_legal_states() {
        for state in [SignalState::Flat, SignalState::Engaged] {
            let rebuilt =
                SignalState::from_positions(state.portfolio_position(), state.future_position())
                    .unwrap();
            assert_eq!(rebuilt, state);
        }
    }

    #[test]
    fn illegal_combinations_are_consistency_errors() {
        for (p, f) in [(1, 0), (0, -1), (1, 1), (-1, 1), (2, -2)] {
            let err = SignalState::from_positions(p, f).unwrap_err();
            assert!(matches!(
                err,
                PipelineError::ConsistencyError { portfolio, future } if portfolio == p && future == f
            ));
        }
    }
}
