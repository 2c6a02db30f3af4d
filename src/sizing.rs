use std::io::Write;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::Serialize;

use crate::error::PipelineError;
use crate::model::hedge::HedgeVector;
use crate::model::price_matrix::PriceRow;

/// How the future contract count is obtained for this run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SizingMode {
    /// First run: size from capital and the exchange margin ratio.
    Initialize { capital: f64, margin_ratio: f64 },
    /// Later runs keep the size fixed at initialization.
    Reuse { future_size: u64 },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PositionWeight {
    pub symbol: String,
    pub weight: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PositionSizing {
    pub date: NaiveDate,
    pub notional: f64,
    pub weights: Vec<PositionWeight>,
    pub future_size: u64,
}

impl PositionSizing {
    /// Signed contract count; the future leg is always short.
    pub fn future_contracts(&self) -> i64 {
        -(self.future_size as i64)
    }

    pub fn future_size_text(&self) -> String {
        format!("-{}", self.future_size)
    }

    pub fn write_weights<W: Write>(&self, out: W) -> Result<()> {
        let mut writer = csv::Writer::from_writer(out);
        for weight in &self.weights {
            writer
                .serialize(weight)
                .with_context(|| format!("failed to write weight for {}", weight.symbol))?;
        }
        writer.flush().context("failed to flush position weights")?;
        Ok(())
    }
}

/// Contracts affordable with `capital` at the given margin plus buffer, floored.
pub fn contracts_for_capital(
    capital: f64,
    margin_ratio: f64,
    margin_buffer: f64,
    notional: f64,
) -> Result<u64, PipelineError> {
    if !(capital.is_finite() && capital > 0.0) {
        return Err(PipelineError::CapitalUnspecified(format!(
            "initial capital must be a positive amount, got {}",
            capital
        )));
    }
    if !(margin_ratio.is_finite() && margin_ratio >= 0.0) {
        return Err(PipelineError::CapitalUnspecified(format!(
            "margin ratio must be a non-negative fraction, got {}",
            margin_ratio
        )));
    }
    let size = (capital / ((1.0 + margin_ratio + margin_buffer) * notional)).floor();
    if !size.is_finite() || size < 0.0 {
        return Err(PipelineError::model_fit(
            "position sizing",
            format!("contract count {} is invalid", size),
        ));
    }
    Ok(size as u64)
}

/// Turn the hedge and the run-date prices into stock weights and the future size.
pub fn size_positions(
    hedge: &HedgeVector,
    stock_columns: &[String],
    last: &PriceRow,
    portfolio_position: i64,
    mode: SizingMode,
    margin_buffer: f64,
) -> Result<PositionSizing, PipelineError> {
    let aligned = hedge.align(stock_columns)?;
    let values: Vec<f64> = aligned
        .iter()
        .zip(&hedge.weights)
        .map(|(idx, w)| idx.map(|i| w * last.stocks[i]).unwrap_or(0.0))
        .collect();
    let notional: f64 = values.iter().sum();
    if !(notional.is_finite() && notional > 0.0) {
        return Err(PipelineError::model_fit(
            "position sizing",
            format!("basket notional {} on {} is not positive", notional, last.date),
        ));
    }

    let weights = hedge
        .columns
        .iter()
        .zip(&values)
        .map(|(symbol, value)| PositionWeight {
            symbol: symbol.clone(),
            weight: value / notional * portfolio_position as f64,
        })
        .collect();

    let future_size = match mode {
        SizingMode::Initialize {
            capital,
            margin_ratio,
        } => contracts_for_capital(capital, margin_ratio, margin_buffer, notional)?,
        SizingMode::Reuse { future_size } => future_size,
    };

    tracing::info!(
        date = %last.date,
        notional,
        portfolio_position,
        future_size,
        "Sized positions"
    );
    Ok(PositionSizing {
        date: last.date,
        notional,
        weights,
        future_size,
    })
}
