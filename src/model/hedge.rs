use chrono::NaiveDate;

use crate::error::PipelineError;

/// Non-negative basket weights fitted against a fixed, labelled column set.
#[derive(Debug, Clone, PartialEq)]
pub struct HedgeVector {
    pub fitted_on: NaiveDate,
    pub columns: Vec<String>,
    pub weights: Vec<f64>,
}

impl HedgeVector {
    pub fn new(
        fitted_on: NaiveDate,
        columns: Vec<String>,
        weights: Vec<f64>,
    ) -> Result<Self, PipelineError> {
        if columns.len() != weights.len() {
            return Err(PipelineError::model_fit(
                "hedge portfolio",
                format!(
                    "{} weights for {} columns",
                    weights.len(),
                    columns.len()
                ),
            ));
        }
        if let Some((col, w)) = columns
            .iter()
            .zip(&weights)
            .find(|(_, w)| !(w.is_finite() && **w >= 0.0))
        {
            return Err(PipelineError::model_fit(
                "hedge portfolio",
                format!("weight for {} is {}, expected a finite value >= 0", col, w),
            ));
        }
        Ok(Self {
            fitted_on,
            columns,
            weights,
        })
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    pub fn active_count(&self) -> usize {
        self.weights.iter().filter(|w| **w > 0.0).count()
    }

    /// Index of each hedge column within `stock_columns`.
    ///
    /// A column absent from the price data is tolerated only when its weight is zero.
    pub fn align(&self, stock_columns: &[String]) -> Result<Vec<Option<usize>>, PipelineError> {
        self.columns
            .iter()
            .zip(&self.weights)
            .map(|(col, w)| {
                let idx = stock_columns.iter().position(|c| c == col);
                if idx.is_none() && *w > 0.0 {
                    return Err(PipelineError::DataUnavailable(format!(
                        "hedge constituent {} (weight {:.6}) is missing from the price history",
                        col, w
                    )));
                }
                Ok(idx)
            })
            .collect()
    }
}
