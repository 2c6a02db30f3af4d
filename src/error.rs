use std::fmt;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("data unavailable: {0}")]
    DataUnavailable(String),

    #[error("insufficient history: {rows} aligned rows, at least {required} required")]
    InsufficientHistory { rows: usize, required: usize },

    #[error("{model} fit failed: {reason}")]
    ModelFitFailure { model: &'static str, reason: String },

    #[error("spread is not mean-reverting: AR coefficient {beta:.6} has |beta| >= 1")]
    NonStationarySpread { beta: f64 },

    #[error(
        "inconsistent stored signal state (portfolio={portfolio}, future={future}); \
         expected (0, 0) or (1, -1)"
    )]
    ConsistencyError { portfolio: i64, future: i64 },

    #[error("capital unspecified: {0}")]
    CapitalUnspecified(String),

    #[error("no stored hedge vector for a non-rebalance run; run on a rebalance day first")]
    HedgeVectorMissing,

    #[error("storage error: {0}")]
    Storage(String),
}

impl PipelineError {
    pub fn model_fit(model: &'static str, reason: impl Into<String>) -> Self {
        Self::ModelFitFailure {
            model,
            reason: reason.into(),
        }
    }

    pub fn storage(err: anyhow::Error) -> Self {
        Self::Storage(format!("{:#}", err))
    }
}

/// Pipeline stage names used in run diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Configuration,
    Planning,
    MarketData,
    PriceSeries,
    HedgePortfolio,
    SpreadDynamics,
    Volatility,
    Signal,
    PositionSizing,
    Persistence,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Configuration => "configuration",
            Self::Planning => "run planning",
            Self::MarketData => "market data download",
            Self::PriceSeries => "price series build",
            Self::HedgePortfolio => "hedge portfolio estimation",
            Self::SpreadDynamics => "spread dynamics estimation",
            Self::Volatility => "volatility forecast",
            Self::Signal => "signal generation",
            Self::PositionSizing => "position sizing",
            Self::Persistence => "persistence",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
#[error("{stage} stage failed: {error}")]
pub struct StageError {
    pub stage: Stage,
    #[source]
    pub error: PipelineError,
}

impl StageError {
    pub fn new(stage: Stage, error: PipelineError) -> Self {
        Self { stage, error }
    }
}

/// Attach a stage to a typed pipeline result.
pub trait AtStage<T> {
    fn at_stage(self, stage: Stage) -> Result<T, StageError>;
}

impl<T> AtStage<T> for Result<T, PipelineError> {
    fn at_stage(self, stage: Stage) -> Result<T, StageError> {
        self.map_err(|error| StageError::new(stage, error))
    }
}
