use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::Instant;

use anyhow::Context;
use chrono::NaiveDate;
use futures_util::stream::{self, StreamExt, TryStreamExt};

use crate::calendar::{history_window_start, months_back, TradingCalendar};
use crate::config::{Config, StockPool};
use crate::dynamics::MIN_GARCH_OBSERVATIONS;
use crate::error::PipelineError;
use crate::gateway::MarketDataGateway;
use crate::model::bar::{normalize_bars, AdjustmentFactor, Bar, BarFrequency, Exchange};
use crate::model::price_matrix::{PriceMatrix, FUTURE_COLUMN};

/// Share of the stock date axis a symbol must cover to be kept.
pub const MIN_COVERAGE_RATIO: f64 = 0.7;
/// Below this share of the row count, missing cells drop rows instead of columns.
pub const ROW_DROP_RATIO: f64 = 0.1;

const MEMBERSHIP_STEP_MONTHS: u32 = 6;

/// Everything downloaded for one run, keyed by symbol.
#[derive(Debug, Clone, Default)]
pub struct RawHistory {
    pub future: Vec<Bar>,
    pub stocks: BTreeMap<String, Vec<Bar>>,
    pub factors: BTreeMap<String, Vec<AdjustmentFactor>>,
}

/// Date-indexed table with holes, used for the intermediate data artifacts.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesFrame {
    pub dates: Vec<NaiveDate>,
    pub columns: Vec<String>,
    pub cells: Vec<Vec<Option<f64>>>,
}

impl SeriesFrame {
    pub fn missing_count(&self) -> usize {
        self.cells
            .iter()
            .map(|row| row.iter().filter(|c| c.is_none()).count())
            .sum()
    }
}

/// Output of [`build_price_matrix`]: the final matrix plus its intermediate tables.
#[derive(Debug, Clone)]
pub struct PriceSeriesBuild {
    pub future: Vec<Bar>,
    pub close: SeriesFrame,
    pub factors: SeriesFrame,
    pub adjusted: SeriesFrame,
    pub merged: SeriesFrame,
    pub matrix: PriceMatrix,
}

/// Index constituents for the window, stepping the start back six months while empty.
pub async fn resolve_index_members<G: MarketDataGateway>(
    gateway: &G,
    index_code: &str,
    start: NaiveDate,
    end: NaiveDate,
    max_steps: usize,
) -> Result<Vec<String>, PipelineError> {
    let mut from = start;
    for step in 0..=max_steps {
        let mut members = gateway
            .get_index_members(index_code, from, end)
            .await
            .with_context(|| format!("index members of {} from {}", index_code, from))
            .map_err(|e| PipelineError::DataUnavailable(format!("{:#}", e)))?;
        if !members.is_empty() {
            members.sort();
            members.dedup();
            if step > 0 {
                tracing::info!(index_code, from = %from, "Using earlier index components");
            }
            return Ok(members);
        }
        tracing::warn!(
            index_code,
            from = %from,
            step,
            "No index components for window, stepping back"
        );
        from = months_back(from, MEMBERSHIP_STEP_MONTHS);
    }
    Err(PipelineError::DataUnavailable(format!(
        "no constituents for {} after {} six-month steps back from {}",
        index_code, max_steps, start
    )))
}

/// Download the future, the index basket and adjustment factors for the year ending at `end`.
pub async fn collect_raw_history<G: MarketDataGateway>(
    gateway: &G,
    config: &Config,
    pool: StockPool,
    end: NaiveDate,
) -> Result<RawHistory, PipelineError> {
    let start = history_window_start(end);
    let strategy = &config.strategy;
    let exchange: Exchange = strategy
        .future_exchange
        .parse()
        .map_err(|e: anyhow::Error| PipelineError::Configuration(e.to_string()))?;

    let started = Instant::now();
    let future = gateway
        .get_bars(
            &strategy.future_code,
            exchange,
            BarFrequency::Daily,
            start,
            end,
        )
        .await
        .with_context(|| format!("future bars for {}", strategy.future_code))
        .map_err(|e| PipelineError::DataUnavailable(format!("{:#}", e)))?;
    if future.is_empty() {
        return Err(PipelineError::DataUnavailable(format!(
            "no bars for future {} between {} and {}",
            strategy.future_code, start, end
        )));
    }
    tracing::info!(
        symbol = %strategy.future_code,
        bars = future.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Downloaded future bars"
    );

    let members = resolve_index_members(
        gateway,
        pool.index_code(),
        start,
        end,
        strategy.membership_walkback_steps,
    )
    .await?;
    tracing::info!(
        index_code = pool.index_code(),
        members = members.len(),
        "Loaded stock pool"
    );

    let started = Instant::now();
    let fetched: Vec<(String, Vec<Bar>, Vec<AdjustmentFactor>)> = stream::iter(members)
        .map(|code| async move {
            let exchange = Exchange::from_stock_code(&code)
                .with_context(|| format!("cannot infer exchange of {}", code))?;
            let bars = gateway
                .get_bars(&code, exchange, BarFrequency::Daily, start, end)
                .await
                .with_context(|| format!("stock bars for {}", code))?;
            let factors = gateway
                .get_adjustment_factors(&code, start, end)
                .await
                .with_context(|| format!("adjustment factors for {}", code))?;
            Ok::<_, anyhow::Error>((code, bars, factors))
        })
        .buffer_unordered(config.data.request_concurrency.max(1))
        .try_collect()
        .await
        .map_err(|e| PipelineError::DataUnavailable(format!("{:#}", e)))?;

    let mut stocks = BTreeMap::new();
    let mut factors = BTreeMap::new();
    for (code, bars, adj) in fetched {
        factors.insert(code.clone(), adj);
        stocks.insert(code, bars);
    }
    tracing::info!(
        symbols = stocks.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Downloaded stock bars"
    );

    Ok(RawHistory {
        future,
        stocks,
        factors,
    })
}

/// Bare numeric part of an instrument code, `600000` for `600000.SH`.
pub fn bare_code(code: &str) -> &str {
    code.split_once('.').map(|(bare, _)| bare).unwrap_or(code)
}

/// Ordering of stock columns: bare code, descending.
pub fn instrument_order(a: &str, b: &str) -> Ordering {
    bare_code(b).cmp(bare_code(a)).then_with(|| b.cmp(a))
}

pub fn sort_instruments(columns: &mut [String]) {
    columns.sort_by(|a, b| instrument_order(a, b));
}

/// Rows the merged matrix needs: the last row is held out, the remaining
/// training rows must cover the autoregression (2p+1) and the GARCH fit.
pub fn minimum_rows(ar_p: usize) -> usize {
    (2 * ar_p + 2).max(MIN_GARCH_OBSERVATIONS + 1)
}

/// Align, clean and adjust the raw history into the final price matrix.
pub fn build_price_matrix(
    raw: &RawHistory,
    calendar: &TradingCalendar,
    ar_p: usize,
) -> Result<PriceSeriesBuild, PipelineError> {
    let future: Vec<Bar> = normalize_bars(raw.future.clone())
        .into_iter()
        .filter(|b| !calendar.is_holiday(b.date))
        .collect();
    if future.is_empty() {
        return Err(PipelineError::DataUnavailable(
            "future series is empty".to_string(),
        ));
    }

    let stocks: BTreeMap<&String, Vec<Bar>> = raw
        .stocks
        .iter()
        .map(|(code, bars)| {
            let bars = normalize_bars(bars.clone())
                .into_iter()
                .filter(|b| !calendar.is_holiday(b.date))
                .collect();
            (code, bars)
        })
        .collect();

    let axis: Vec<NaiveDate> = stocks
        .values()
        .flat_map(|bars| bars.iter().map(|b| b.date))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let axis_pos: HashMap<NaiveDate, usize> =
        axis.iter().enumerate().map(|(i, d)| (*d, i)).collect();

    let min_count = MIN_COVERAGE_RATIO * axis.len() as f64;
    let mut kept: Vec<(String, Vec<Option<f64>>)> = Vec::new();
    for (code, bars) in &stocks {
        let mut column = vec![None; axis.len()];
        for bar in bars {
            if let Some(&i) = axis_pos.get(&bar.date) {
                column[i] = Some(bar.close);
            }
        }
        let present = column.iter().filter(|c| c.is_some()).count();
        if (present as f64) < min_count {
            tracing::debug!(symbol = %code, present, axis = axis.len(), "Dropping thin series");
            continue;
        }
        forward_fill(&mut column);
        kept.push(((*code).clone(), column));
    }
    if kept.is_empty() {
        return Err(PipelineError::DataUnavailable(
            "no stock series survived the coverage filter".to_string(),
        ));
    }
    kept.sort_by(|a, b| instrument_order(&a.0, &b.0));

    let mut factor_columns = Vec::with_capacity(kept.len());
    let mut adjusted_columns = Vec::with_capacity(kept.len());
    for (code, closes) in &kept {
        let factors = align_factors(raw.factors.get(code).map(Vec::as_slice), &axis);
        let last = factors.last().copied().unwrap_or(1.0);
        if !(last.is_finite() && last > 0.0) {
            return Err(PipelineError::DataUnavailable(format!(
                "latest adjustment factor of {} is {}",
                code, last
            )));
        }
        let adjusted: Vec<Option<f64>> = closes
            .iter()
            .zip(&factors)
            .map(|(close, factor)| close.map(|c| c * factor / last))
            .collect();
        factor_columns.push(factors.into_iter().map(Some).collect::<Vec<_>>());
        adjusted_columns.push(adjusted);
    }

    let stock_labels: Vec<String> = kept.iter().map(|(code, _)| code.clone()).collect();
    let close = frame_from_columns(
        &axis,
        &stock_labels,
        &kept.iter().map(|(_, c)| c.clone()).collect::<Vec<_>>(),
    );
    let factors = frame_from_columns(&axis, &stock_labels, &factor_columns);
    let adjusted = frame_from_columns(&axis, &stock_labels, &adjusted_columns);

    let mut merged_columns = Vec::with_capacity(stock_labels.len() + 1);
    merged_columns.push(FUTURE_COLUMN.to_string());
    merged_columns.extend(stock_labels.iter().cloned());
    let merged_rows: Vec<Vec<Option<f64>>> = future
        .iter()
        .map(|bar| {
            let mut row = Vec::with_capacity(merged_columns.len());
            row.push(Some(bar.close));
            match axis_pos.get(&bar.date) {
                Some(&i) => row.extend(adjusted.cells[i].iter().copied()),
                None => row.extend(std::iter::repeat(None).take(stock_labels.len())),
            }
            row
        })
        .collect();
    let merged = SeriesFrame {
        dates: future.iter().map(|b| b.date).collect(),
        columns: merged_columns,
        cells: merged_rows,
    };

    let cleaned = drop_missing(&merged);
    if cleaned.columns.len() < 2 {
        return Err(PipelineError::DataUnavailable(
            "no stock column left after removing missing values".to_string(),
        ));
    }
    let required = minimum_rows(ar_p);
    if cleaned.dates.len() < required {
        return Err(PipelineError::InsufficientHistory {
            rows: cleaned.dates.len(),
            required,
        });
    }

    let rows = cleaned
        .cells
        .into_iter()
        .map(|row| row.into_iter().map(|c| c.unwrap_or(f64::NAN)).collect())
        .collect();
    let matrix = PriceMatrix::new(cleaned.dates, cleaned.columns, rows)?;

    Ok(PriceSeriesBuild {
        future,
        close,
        factors,
        adjusted,
        merged,
        matrix,
    })
}

fn forward_fill(column: &mut [Option<f64>]) {
    let mut last = None;
    for cell in column.iter_mut() {
        match cell {
            Some(v) => last = Some(*v),
            None => *cell = last,
        }
    }
}

/// Factor in force on each axis date: the next published factor, else the latest one, else 1.0.
fn align_factors(factors: Option<&[AdjustmentFactor]>, axis: &[NaiveDate]) -> Vec<f64> {
    let mut sorted: Vec<AdjustmentFactor> = factors
        .unwrap_or_default()
        .iter()
        .filter(|f| f.factor.is_finite())
        .copied()
        .collect();
    sorted.sort_by_key(|f| f.date);
    let fallback = sorted.last().map(|f| f.factor).unwrap_or(1.0);
    axis.iter()
        .map(|date| {
            let idx = sorted.partition_point(|f| f.date < *date);
            sorted.get(idx).map(|f| f.factor).unwrap_or(fallback)
        })
        .collect()
}

fn frame_from_columns(
    axis: &[NaiveDate],
    labels: &[String],
    columns: &[Vec<Option<f64>>],
) -> SeriesFrame {
    let cells = (0..axis.len())
        .map(|i| columns.iter().map(|col| col[i]).collect())
        .collect();
    SeriesFrame {
        dates: axis.to_vec(),
        columns: labels.to_vec(),
        cells,
    }
}

/// Few holes drop rows; many holes drop the affected stock columns.
fn drop_missing(frame: &SeriesFrame) -> SeriesFrame {
    let missing = frame.missing_count();
    if (missing as f64) < ROW_DROP_RATIO * frame.dates.len() as f64 {
        let (dates, cells) = frame
            .dates
            .iter()
            .zip(&frame.cells)
            .filter(|(_, row)| row.iter().all(Option::is_some))
            .map(|(d, row)| (*d, row.clone()))
            .unzip();
        return SeriesFrame {
            dates,
            columns: frame.columns.clone(),
            cells,
        };
    }

    // The future column is never dropped; rows missing it go instead.
    let keep: Vec<usize> = (0..frame.columns.len())
        .filter(|&j| j == 0 || frame.cells.iter().all(|row| row[j].is_some()))
        .collect();
    let (dates, cells) = frame
        .dates
        .iter()
        .zip(&frame.cells)
        .filter(|(_, row)| row[0].is_some())
        .map(|(d, row)| (*d, keep.iter().map(|&j| row[j]).collect()))
        .unzip();
    SeriesFrame {
        dates,
        columns: keep.iter().map(|&j| frame.columns[j].clone()).collect(),
        cells,
    }
}
