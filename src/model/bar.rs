use std::fmt;
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;

/// Daily close observation for one instrument.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bar {
    pub date: NaiveDate,
    pub close: f64,
}

/// Cumulative dividend/split adjustment factor for one trading date.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdjustmentFactor {
    pub date: NaiveDate,
    pub factor: f64,
}

/// Sort ascending, drop non-finite closes, keep the last bar for a repeated date.
pub fn normalize_bars(mut bars: Vec<Bar>) -> Vec<Bar> {
    bars.retain(|b| b.close.is_finite());
    bars.sort_by_key(|b| b.date);
    let mut out: Vec<Bar> = Vec::with_capacity(bars.len());
    for bar in bars {
        match out.last_mut() {
            Some(last) if last.date == bar.date => *last = bar,
            _ => out.push(bar),
        }
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exchange {
    Cffex,
    Shfe,
    Dce,
    Czce,
    Ine,
    Sse,
    Szse,
}

impl Exchange {
    /// Numeric venue code used by the futures bar endpoint.
    pub fn venue_code(self) -> u32 {
        match self {
            Self::Cffex => 3,
            Self::Shfe => 4,
            Self::Dce => 5,
            Self::Czce => 6,
            Self::Ine => 15,
            // Equity venues are not served by the futures endpoint.
            Self::Sse | Self::Szse => 0,
        }
    }

    pub fn is_futures_venue(self) -> bool {
        !matches!(self, Self::Sse | Self::Szse)
    }

    /// Venue of an A-share code such as `600000.SH` or `000001.SZ`.
    pub fn from_stock_code(code: &str) -> Option<Self> {
        let (_, suffix) = code.rsplit_once('.')?;
        match suffix.to_ascii_uppercase().as_str() {
            "SH" => Some(Self::Sse),
            "SZ" => Some(Self::Szse),
            _ => None,
        }
    }
}

impl FromStr for Exchange {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s.trim().to_ascii_uppercase().as_str() {
            "CFFEX" => Self::Cffex,
            "SHFE" => Self::Shfe,
            "DCE" => Self::Dce,
            "CZCE" => Self::Czce,
            "INE" => Self::Ine,
            "SSE" | "SH" => Self::Sse,
            "SZSE" | "SZ" => Self::Szse,
            other => bail!("unknown exchange '{}'", other),
        })
    }
}

impl fmt::Display for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Cffex => "CFFEX",
            Self::Shfe => "SHFE",
            Self::Dce => "DCE",
            Self::Czce => "CZCE",
            Self::Ine => "INE",
            Self::Sse => "SSE",
            Self::Szse => "SZSE",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarFrequency {
    TenSeconds,
    Minute,
    FiveMinutes,
    FifteenMinutes,
    ThirtyMinutes,
    Hour,
    Daily,
    Weekly,
}

impl BarFrequency {
    pub fn seconds(self) -> u64 {
        match self {
            Self::TenSeconds => 10,
            Self::Minute => 60,
            Self::FiveMinutes => 5 * 60,
            Self::FifteenMinutes => 15 * 60,
            Self::ThirtyMinutes => 30 * 60,
            Self::Hour => 60 * 60,
            Self::Daily => 86_400,
            Self::Weekly => 7 * 86_400,
        }
    }

    /// Kline type code of the equity bar endpoint.
    pub fn kline_type(self) -> Option<u32> {
        match self {
            Self::Minute => Some(11),
            Self::FiveMinutes => Some(1),
            Self::FifteenMinutes => Some(2),
            Self::ThirtyMinutes => Some(3),
            Self::Hour => Some(4),
            Self::Daily => Some(5),
            Self::Weekly => Some(6),
            Self::TenSeconds => None,
        }
    }
}

/// Parse a bar frequency string such as "10s", "1m", "15m", "60m", "1d" or "1w".
impl FromStr for BarFrequency {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.len() < 2 {
            bail!("invalid frequency '{}': expected format like '1d'", s);
        }
        let (num_str, suffix) = s.split_at(s.len() - 1);
        let n: u64 = num_str.parse().with_context(|| {
            format!(
                "invalid frequency '{}': quantity must be a positive integer",
                s
            )
        })?;
        Ok(match (n, suffix) {
            (10, "s") => Self::TenSeconds,
            (1, "m") => Self::Minute,
            (5, "m") => Self::FiveMinutes,
            (15, "m") => Self::FifteenMinutes,
            (30, "m") => Self::ThirtyMinutes,
            (60, "m") | (1, "h") => Self::Hour,
            (1, "d") => Self::Daily,
            (1, "w") => Self::Weekly,
            _ => bail!("unsupported frequency '{}'", s),
        })
    }
}
