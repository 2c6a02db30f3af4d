use std::path::PathBuf;
use std::time::Instant;

use chrono::NaiveDate;
use uuid::Uuid;

use crate::calendar::TradingCalendar;
use crate::config::Config;
use crate::dynamics::{
    estimate_dynamics, forecast_volatility, validate_one_step, DynamicsParameters, GarchOrder,
    ValidationReport, VolatilityForecast,
};
use crate::error::{AtStage, PipelineError, Stage, StageError};
use crate::gateway::MarketDataGateway;
use crate::hedge::{estimate_hedge, LassoSettings};
use crate::model::hedge::HedgeVector;
use crate::model::signal::{SignalRow, SignalState};
use crate::signal_machine::{evaluate, SignalInputs};
use crate::sizing::{size_positions, PositionSizing, SizingMode};
use crate::store::{ArtifactWriter, RunCommit, RunState, StateStore};
use crate::wrangling::{build_price_matrix, collect_raw_history, minimum_rows};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunKind {
    /// No stored state: fit the hedge and size the future from capital.
    Initialization,
    /// First business day of the month: refit the hedge.
    Rebalance,
    /// Reuse the stored hedge.
    Reuse,
}

impl RunKind {
    pub fn refits_hedge(self) -> bool {
        !matches!(self, Self::Reuse)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initialization => "initialization",
            Self::Rebalance => "rebalance",
            Self::Reuse => "reuse",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunRequest {
    pub date: NaiveDate,
    /// Initial capital and exchange margin ratio; required on the first-ever run.
    pub initial_capital: Option<(f64, f64)>,
}

/// What a run will do, decided from stored state before any download.
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub date: NaiveDate,
    pub kind: RunKind,
    pub run_state: Option<RunState>,
    pub stored_hedge: Option<HedgeVector>,
    pub previous: Option<SignalState>,
    pub sizing: SizingMode,
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: String,
    pub date: NaiveDate,
    pub kind: RunKind,
    pub hedge: HedgeVector,
    pub dynamics: DynamicsParameters,
    pub volatility: VolatilityForecast,
    pub validation: Option<ValidationReport>,
    pub signal: SignalRow,
    pub sizing: PositionSizing,
    pub output_dir: PathBuf,
}

struct StageTimer {
    stage: Stage,
    started: Instant,
}

impl StageTimer {
    fn start(stage: Stage) -> Self {
        tracing::info!(stage = stage.as_str(), "Stage started");
        Self {
            stage,
            started: Instant::now(),
        }
    }

    fn finish(self) {
        tracing::info!(
            stage = self.stage.as_str(),
            elapsed_ms = self.started.elapsed().as_millis() as u64,
            "Stage finished"
        );
    }
}

fn storage_error(stage: Stage) -> impl FnOnce(anyhow::Error) -> StageError {
    move |e| StageError::new(stage, PipelineError::storage(e))
}

/// Decide the run kind from the stored state and check its preconditions.
pub fn plan_run(
    store: &StateStore,
    calendar: &TradingCalendar,
    request: &RunRequest,
) -> Result<RunPlan, PipelineError> {
    let run_state = store.load_run_state().map_err(PipelineError::storage)?;
    let previous = store
        .load_signal_positions()
        .map_err(PipelineError::storage)?
        .map(|p| SignalState::from_positions(p.portfolio_position, p.future_position))
        .transpose()?;

    let (kind, sizing) = match &run_state {
        None => {
            let Some((capital, margin_ratio)) = request.initial_capital else {
                return Err(PipelineError::CapitalUnspecified(
                    "first run requires initial capital and a margin ratio".to_string(),
                ));
            };
            (
                RunKind::Initialization,
                SizingMode::Initialize {
                    capital,
                    margin_ratio,
                },
            )
        }
        Some(state) => {
            let kind = if calendar.is_first_business_day_of_month(request.date) {
                RunKind::Rebalance
            } else {
                RunKind::Reuse
            };
            (
                kind,
                SizingMode::Reuse {
                    future_size: state.future_size,
                },
            )
        }
    };

    let stored_hedge = if kind.refits_hedge() {
        None
    } else {
        let hedge = store.load_hedge_vector().map_err(PipelineError::storage)?;
        Some(hedge.ok_or(PipelineError::HedgeVectorMissing)?)
    };

    Ok(RunPlan {
        date: request.date,
        kind,
        run_state,
        stored_hedge,
        previous,
        sizing,
    })
}

/// Run the daily pipeline end to end. Stored state changes only when every stage succeeds.
pub async fn run<G: MarketDataGateway>(
    config: &Config,
    gateway: &G,
    store: &mut StateStore,
    request: &RunRequest,
) -> Result<RunReport, StageError> {
    let pool = config.validate().at_stage(Stage::Configuration)?;
    let strategy = &config.strategy;
    let calendar = TradingCalendar::new(config.calendar.holidays.iter().copied());

    let timer = StageTimer::start(Stage::Planning);
    let plan = plan_run(store, &calendar, request).at_stage(Stage::Planning)?;
    let run_id = Uuid::new_v4().to_string();
    tracing::info!(
        run_id = %run_id,
        date = %plan.date,
        kind = plan.kind.as_str(),
        previous = plan.previous.map(SignalState::as_str).unwrap_or("none"),
        "Planned run"
    );
    timer.finish();

    let timer = StageTimer::start(Stage::MarketData);
    let raw = collect_raw_history(gateway, config, pool, plan.date)
        .await
        .at_stage(Stage::MarketData)?;
    timer.finish();

    let timer = StageTimer::start(Stage::PriceSeries);
    let built = build_price_matrix(&raw, &calendar, strategy.ar_p).at_stage(Stage::PriceSeries)?;
    let matrix = &built.matrix;
    tracing::info!(
        rows = matrix.row_count(),
        stocks = matrix.stock_columns().len(),
        first = %matrix.dates()[0],
        last = %matrix.dates()[matrix.row_count() - 1],
        "Built price matrix"
    );
    let artifacts = ArtifactWriter::new(&config.storage, plan.date)
        .map_err(storage_error(Stage::Persistence))?;
    artifacts
        .write_future_bars(&built.future)
        .and_then(|_| artifacts.write_close(&built.close))
        .and_then(|_| artifacts.write_adjustment_factors(&built.factors))
        .and_then(|_| artifacts.write_adjusted_close(&built.adjusted))
        .and_then(|_| artifacts.write_merged(matrix))
        .map_err(storage_error(Stage::Persistence))?;
    let (training, last) = matrix
        .split_last()
        .ok_or(PipelineError::InsufficientHistory {
            rows: matrix.row_count(),
            required: minimum_rows(strategy.ar_p),
        })
        .at_stage(Stage::PriceSeries)?;
    if last.date != plan.date {
        tracing::warn!(
            run_date = %plan.date,
            last_row = %last.date,
            "Most recent price row is not the run date"
        );
    }
    timer.finish();

    let timer = StageTimer::start(Stage::HedgePortfolio);
    let hedge = match plan.stored_hedge.clone() {
        Some(hedge) => {
            tracing::info!(
                fitted_on = %hedge.fitted_on,
                active = hedge.active_count(),
                "Reusing stored hedge portfolio"
            );
            hedge
        }
        None => estimate_hedge(
            &training,
            LassoSettings {
                alpha: strategy.lasso_alpha,
                max_iter: strategy.lasso_max_iter,
                tol: strategy.lasso_tol,
            },
            plan.date,
        )
        .at_stage(Stage::HedgePortfolio)?,
    };
    let spread = training.spread(&hedge).at_stage(Stage::HedgePortfolio)?;
    timer.finish();

    let timer = StageTimer::start(Stage::SpreadDynamics);
    let dynamics = estimate_dynamics(&spread, strategy.ar_p).at_stage(Stage::SpreadDynamics)?;
    let validation = match validate_one_step(&spread, strategy.ar_p, strategy.update_window_size) {
        Ok(report) => report,
        Err(e) => {
            tracing::warn!(error = %e, "Skipping validation diagnostics");
            None
        }
    };
    if let Some(report) = &validation {
        tracing::info!(
            holdout = report.holdout,
            rmse = report.rmse,
            mean_error = report.mean_error,
            "Validated spread autoregression"
        );
    }
    timer.finish();

    let timer = StageTimer::start(Stage::Volatility);
    let volatility = forecast_volatility(
        &spread,
        GarchOrder {
            p: strategy.garch_p,
            q: strategy.garch_q,
        },
        strategy.garch_max_iter,
    )
    .at_stage(Stage::Volatility)?;
    timer.finish();

    let timer = StageTimer::start(Stage::Signal);
    let portfolio_value = last
        .basket_value(training.stock_columns(), &hedge)
        .at_stage(Stage::Signal)?;
    let signal = evaluate(
        plan.previous,
        &SignalInputs {
            date: last.date,
            future_value: last.future,
            portfolio_value,
            equilibrium: dynamics.equilibrium,
            volatility: volatility.volatility,
        },
        strategy.boundary_ratio,
    )
    .at_stage(Stage::Signal)?;
    timer.finish();

    let timer = StageTimer::start(Stage::PositionSizing);
    let sizing = size_positions(
        &hedge,
        training.stock_columns(),
        &last,
        signal.state.portfolio_position(),
        plan.sizing,
        strategy.margin_buffer,
    )
    .at_stage(Stage::PositionSizing)?;
    timer.finish();

    let timer = StageTimer::start(Stage::Persistence);
    let mut writes = artifacts.write_ar_params(&dynamics);
    writes = writes.and_then(|_| artifacts.write_garch_params(&volatility));
    if plan.kind.refits_hedge() {
        writes = writes.and_then(|_| artifacts.write_hedge(&hedge));
    }
    if let Some(report) = &validation {
        writes = writes.and_then(|_| artifacts.write_validation(report));
    }
    writes
        .and_then(|_| artifacts.write_signal(&signal, &run_id))
        .and_then(|_| artifacts.write_position_weights(&sizing))
        .and_then(|_| artifacts.write_future_size(&sizing))
        .map_err(storage_error(Stage::Persistence))?;

    let (initialized_on, capital, margin_ratio) = match (&plan.run_state, plan.sizing) {
        (Some(state), _) => (state.initialized_on, state.capital, state.margin_ratio),
        (
            None,
            SizingMode::Initialize {
                capital,
                margin_ratio,
            },
        ) => (plan.date, capital, margin_ratio),
        (None, SizingMode::Reuse { .. }) => {
            return Err(StageError::new(
                Stage::Persistence,
                PipelineError::CapitalUnspecified(
                    "no stored run state and no initial capital".to_string(),
                ),
            ))
        }
    };
    store
        .commit_run(&RunCommit {
            run_id: &run_id,
            run_date: plan.date,
            initialized_on,
            capital,
            margin_ratio,
            future_size: sizing.future_size,
            hedge: plan.kind.refits_hedge().then_some(&hedge),
            signal: &signal,
        })
        .map_err(storage_error(Stage::Persistence))?;
    timer.finish();

    Ok(RunReport {
        run_id,
        date: plan.date,
        kind: plan.kind,
        hedge,
        dynamics,
        volatility,
        validation,
        signal,
        sizing,
        output_dir: artifacts.output_dir().to_path_buf(),
    })
}
