use std::fs::{self, File};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::Serialize;

use crate::config::StorageConfig;
use crate::dynamics::{DynamicsParameters, ValidationReport, VolatilityForecast};
use crate::model::bar::Bar;
use crate::model::hedge::HedgeVector;
use crate::model::price_matrix::PriceMatrix;
use crate::model::signal::SignalRow;
use crate::sizing::PositionSizing;
use crate::wrangling::SeriesFrame;

const FUTURES_FILE: &str = "futures.csv";
const CLOSE_FILE: &str = "close.csv";
const ADJ_FACTORS_FILE: &str = "adj_factors.csv";
const ADJ_CLOSE_FILE: &str = "adj_close.csv";
const MERGED_FILE: &str = "merged.csv";
const HEDGE_FILE: &str = "lasso_coef.csv";
const AR_PARAMS_FILE: &str = "ar_params.csv";
const GARCH_PARAMS_FILE: &str = "garch_params.csv";
const VALIDATION_FILE: &str = "validation.csv";
const SIGNAL_FILE: &str = "signal.csv";
const WEIGHTS_FILE: &str = "port_weights.csv";
const FUTURE_SIZE_FILE: &str = "future_size.txt";

#[derive(Serialize)]
struct ParameterRow<'a> {
    parameter: &'a str,
    value: f64,
}

#[derive(Serialize)]
struct SignalRecord<'a> {
    run_id: &'a str,
    date: String,
    volatility: f64,
    equilibrium: f64,
    lower_bound: f64,
    future_value: f64,
    portfolio_value: f64,
    spread: f64,
    previous_state: &'a str,
    state: &'a str,
    portfolio_position: i64,
    future_position: i64,
}

/// Per-date CSV files: downloaded data under `data_dir/<date>`, results under `output_dir/<date>`.
pub struct ArtifactWriter {
    data_dir: PathBuf,
    output_dir: PathBuf,
}

impl ArtifactWriter {
    pub fn new(storage: &StorageConfig, date: NaiveDate) -> Result<Self> {
        let stamp = date.format("%Y-%m-%d").to_string();
        let data_dir = storage.data_dir.join(&stamp);
        let output_dir = storage.output_dir.join(&stamp);
        for dir in [&data_dir, &output_dir] {
            fs::create_dir_all(dir)
                .with_context(|| format!("failed to create directory {}", dir.display()))?;
        }
        Ok(Self {
            data_dir,
            output_dir,
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    fn create(dir: &Path, name: &str) -> Result<csv::Writer<File>> {
        let path = dir.join(name);
        csv::Writer::from_path(&path)
            .with_context(|| format!("failed to create {}", path.display()))
    }

    pub fn write_future_bars(&self, bars: &[Bar]) -> Result<()> {
        let mut w = Self::create(&self.data_dir, FUTURES_FILE)?;
        w.write_record(["date", "close"])?;
        for bar in bars {
            w.write_record([bar.date.to_string(), bar.close.to_string()])?;
        }
        w.flush()?;
        Ok(())
    }

    pub fn write_close(&self, frame: &SeriesFrame) -> Result<()> {
        write_frame(&self.data_dir, CLOSE_FILE, frame)
    }

    pub fn write_adjustment_factors(&self, frame: &SeriesFrame) -> Result<()> {
        write_frame(&self.data_dir, ADJ_FACTORS_FILE, frame)
    }

    pub fn write_adjusted_close(&self, frame: &SeriesFrame) -> Result<()> {
        write_frame(&self.data_dir, ADJ_CLOSE_FILE, frame)
    }

    pub fn write_merged(&self, matrix: &PriceMatrix) -> Result<()> {
        let mut w = Self::create(&self.data_dir, MERGED_FILE)?;
        let mut header = vec!["date".to_string()];
        header.extend(matrix.columns().iter().cloned());
        w.write_record(&header)?;
        for (date, row) in matrix.dates().iter().zip(matrix.rows()) {
            let mut record = vec![date.to_string()];
            record.extend(row.iter().map(f64::to_string));
            w.write_record(&record)?;
        }
        w.flush()?;
        Ok(())
    }

    pub fn write_hedge(&self, hedge: &HedgeVector) -> Result<()> {
        let mut w = Self::create(&self.output_dir, HEDGE_FILE)?;
        w.write_record(["symbol", "weight", "fitted_on"])?;
        for (symbol, weight) in hedge.columns.iter().zip(&hedge.weights) {
            w.write_record([
                symbol.clone(),
                weight.to_string(),
                hedge.fitted_on.to_string(),
            ])?;
        }
        w.flush()?;
        Ok(())
    }

    pub fn write_ar_params(&self, params: &DynamicsParameters) -> Result<()> {
        let mut rows = vec![("alpha".to_string(), params.alpha)];
        rows.extend(
            params
                .lag_coefficients
                .iter()
                .enumerate()
                .map(|(i, b)| (format!("beta_{}", i + 1), *b)),
        );
        rows.extend([
            ("beta".to_string(), params.beta),
            ("sigma2".to_string(), params.sigma2),
            ("equilibrium".to_string(), params.equilibrium),
            ("unconditional_sd".to_string(), params.unconditional_sd),
            ("observations".to_string(), params.observations as f64),
        ]);
        write_parameters(&self.output_dir, AR_PARAMS_FILE, &rows)
    }

    pub fn write_garch_params(&self, forecast: &VolatilityForecast) -> Result<()> {
        let mut rows = vec![
            ("mu".to_string(), forecast.mu),
            ("omega".to_string(), forecast.omega),
        ];
        rows.extend(
            forecast
                .alpha
                .iter()
                .enumerate()
                .map(|(i, a)| (format!("alpha_{}", i + 1), *a)),
        );
        rows.extend(
            forecast
                .beta
                .iter()
                .enumerate()
                .map(|(j, b)| (format!("beta_{}", j + 1), *b)),
        );
        rows.extend([
            ("persistence".to_string(), forecast.persistence),
            ("log_likelihood".to_string(), forecast.log_likelihood),
            ("aic".to_string(), forecast.aic),
            ("bic".to_string(), forecast.bic),
            ("variance".to_string(), forecast.variance),
            ("volatility".to_string(), forecast.volatility),
        ]);
        write_parameters(&self.output_dir, GARCH_PARAMS_FILE, &rows)
    }

    pub fn write_validation(&self, report: &ValidationReport) -> Result<()> {
        let mut w = Self::create(&self.output_dir, VALIDATION_FILE)?;
        w.write_record(["date", "actual", "predicted", "error"])?;
        for pt in &report.points {
            w.write_record([
                pt.date.to_string(),
                pt.actual.to_string(),
                pt.predicted.to_string(),
                (pt.actual - pt.predicted).to_string(),
            ])?;
        }
        w.write_record(["rmse".to_string(), String::new(), String::new(), report.rmse.to_string()])?;
        w.write_record([
            "mean_error".to_string(),
            String::new(),
            String::new(),
            report.mean_error.to_string(),
        ])?;
        w.flush()?;
        Ok(())
    }

    pub fn write_signal(&self, signal: &SignalRow, run_id: &str) -> Result<()> {
        let mut w = Self::create(&self.output_dir, SIGNAL_FILE)?;
        w.serialize(SignalRecord {
            run_id,
            date: signal.date.to_string(),
            volatility: signal.volatility,
            equilibrium: signal.equilibrium,
            lower_bound: signal.lower_bound,
            future_value: signal.future_value,
            portfolio_value: signal.portfolio_value,
            spread: signal.spread,
            previous_state: signal.previous.as_str(),
            state: signal.state.as_str(),
            portfolio_position: signal.state.portfolio_position(),
            future_position: signal.state.future_position(),
        })?;
        w.flush()?;
        Ok(())
    }

    pub fn write_position_weights(&self, sizing: &PositionSizing) -> Result<()> {
        let path = self.output_dir.join(WEIGHTS_FILE);
        let file =
            File::create(&path).with_context(|| format!("failed to create {}", path.display()))?;
        sizing.write_weights(file)
    }

    pub fn write_future_size(&self, sizing: &PositionSizing) -> Result<()> {
        let path = self.output_dir.join(FUTURE_SIZE_FILE);
        fs::write(&path, sizing.future_size_text())
            .with_context(|| format!("failed to write {}", path.display()))
    }
}

fn write_frame(dir: &Path, name: &str, frame: &SeriesFrame) -> Result<()> {
    let mut w = ArtifactWriter::create(dir, name)?;
    let mut header = vec!["date".to_string()];
    header.extend(frame.columns.iter().cloned());
    w.write_record(&header)?;
    for (date, row) in frame.dates.iter().zip(&frame.cells) {
        let mut record = vec![date.to_string()];
        record.extend(row.iter().map(|c| c.map(|v| v.to_string()).unwrap_or_default()));
        w.write_record(&record)?;
    }
    w.flush()?;
    Ok(())
}

fn write_parameters(dir: &Path, name: &str, rows: &[(String, f64)]) -> Result<()> {
    let mut w = ArtifactWriter::create(dir, name)?;
    for (parameter, value) in rows {
        w.serialize(ParameterRow {
            parameter,
            value: *value,
        })?;
    }
    w.flush()?;
    Ok(())
}
