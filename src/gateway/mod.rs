pub mod rest;

use anyhow::Result;
use chrono::NaiveDate;

use crate::model::bar::{AdjustmentFactor, Bar, BarFrequency, Exchange};

pub use rest::RestMarketData;

/// Source of raw daily history for the future, the index basket and adjustment factors.
///
/// Implementations return bars in any order; callers normalize them.
#[allow(async_fn_in_trait)]
pub trait MarketDataGateway {
    async fn get_bars(
        &self,
        symbol: &str,
        exchange: Exchange,
        frequency: BarFrequency,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Bar>>;

    /// Constituent codes of `index_code` over the window. May legitimately be empty.
    async fn get_index_members(
        &self,
        index_code: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<String>>;

    /// Date-indexed factors, gaps backward-filled and defaulted to 1.0.
    async fn get_adjustment_factors(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<AdjustmentFactor>>;
}
