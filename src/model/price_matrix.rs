use chrono::NaiveDate;

use crate::error::PipelineError;
use crate::model::hedge::HedgeVector;

pub const FUTURE_COLUMN: &str = "future";

/// Date-indexed close matrix; column 0 is always the future.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceMatrix {
    dates: Vec<NaiveDate>,
    columns: Vec<String>,
    rows: Vec<Vec<f64>>,
}

/// One date of a [`PriceMatrix`].
#[derive(Debug, Clone, PartialEq)]
pub struct PriceRow {
    pub date: NaiveDate,
    pub future: f64,
    pub stocks: Vec<f64>,
}

/// basket(t) - future(t) over the dates of a matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct SpreadSeries {
    pub dates: Vec<NaiveDate>,
    pub values: Vec<f64>,
}

impl SpreadSeries {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl PriceMatrix {
    pub fn new(
        dates: Vec<NaiveDate>,
        columns: Vec<String>,
        rows: Vec<Vec<f64>>,
    ) -> Result<Self, PipelineError> {
        if columns.first().map(String::as_str) != Some(FUTURE_COLUMN) {
            return Err(PipelineError::DataUnavailable(format!(
                "price matrix must start with the '{}' column",
                FUTURE_COLUMN
            )));
        }
        if dates.len() != rows.len() {
            return Err(PipelineError::DataUnavailable(format!(
                "{} dates for {} rows",
                dates.len(),
                rows.len()
            )));
        }
        if let Some(w) = dates.windows(2).find(|w| w[0] >= w[1]) {
            return Err(PipelineError::DataUnavailable(format!(
                "date index is not strictly increasing at {} -> {}",
                w[0], w[1]
            )));
        }
        for (date, row) in dates.iter().zip(&rows) {
            if row.len() != columns.len() {
                return Err(PipelineError::DataUnavailable(format!(
                    "row {} has {} values for {} columns",
                    date,
                    row.len(),
                    columns.len()
                )));
            }
            if row.iter().any(|v| !v.is_finite()) {
                return Err(PipelineError::DataUnavailable(format!(
                    "row {} contains a missing value",
                    date
                )));
            }
        }
        Ok(Self {
            dates,
            columns,
            rows,
        })
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    /// All column labels, future first.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn stock_columns(&self) -> &[String] {
        &self.columns[1..]
    }

    pub fn rows(&self) -> &[Vec<f64>] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn future_values(&self) -> Vec<f64> {
        self.rows.iter().map(|r| r[0]).collect()
    }

    pub fn stock_row(&self, i: usize) -> &[f64] {
        &self.rows[i][1..]
    }

    pub fn row(&self, i: usize) -> PriceRow {
        PriceRow {
            date: self.dates[i],
            future: self.rows[i][0],
            stocks: self.rows[i][1..].to_vec(),
        }
    }

    /// Split into the training window and the held-out most recent row.
    pub fn split_last(&self) -> Option<(PriceMatrix, PriceRow)> {
        if self.rows.len() < 2 {
            return None;
        }
        let last = self.rows.len() - 1;
        let training = PriceMatrix {
            dates: self.dates[..last].to_vec(),
            columns: self.columns.clone(),
            rows: self.rows[..last].to_vec(),
        };
        Some((training, self.row(last)))
    }

    pub fn basket_values(&self, hedge: &HedgeVector) -> Result<Vec<f64>, PipelineError> {
        let aligned = hedge.align(self.stock_columns())?;
        Ok((0..self.rows.len())
            .map(|i| basket_value(self.stock_row(i), &aligned, &hedge.weights))
            .collect())
    }

    pub fn spread(&self, hedge: &HedgeVector) -> Result<SpreadSeries, PipelineError> {
        let basket = self.basket_values(hedge)?;
        let values = basket
            .iter()
            .zip(&self.rows)
            .map(|(b, row)| b - row[0])
            .collect();
        Ok(SpreadSeries {
            dates: self.dates.clone(),
            values,
        })
    }
}

impl PriceRow {
    /// Hedge-weighted basket value given the matrix stock columns this row belongs to.
    pub fn basket_value(
        &self,
        stock_columns: &[String],
        hedge: &HedgeVector,
    ) -> Result<f64, PipelineError> {
        let aligned = hedge.align(stock_columns)?;
        Ok(basket_value(&self.stocks, &aligned, &hedge.weights))
    }
}

fn basket_value(stocks: &[f64], aligned: &[Option<usize>], weights: &[f64]) -> f64 {
    aligned
        .iter()
        .zip(weights)
        .filter_map(|(idx, w)| idx.map(|i| w * stocks[i]))
        .sum()
}
