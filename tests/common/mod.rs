#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{bail, Result};
use chrono::{Datelike, Days, NaiveDate, Weekday};

use spread_signal::config::Config;
use spread_signal::gateway::MarketDataGateway;
use spread_signal::model::{AdjustmentFactor, Bar, BarFrequency, Exchange};

pub const STOCK_A: &str = "600000.SH";
pub const STOCK_B: &str = "000001.SZ";

pub fn d(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").expect("test date should parse")
}

pub fn temp_dir(test_name: &str) -> PathBuf {
    let ts = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock should be monotonic")
        .as_nanos();
    std::env::temp_dir().join(format!("spread-signal-{}-{}", test_name, ts))
}

/// Rewrite the stored positions of a state database behind the store's back.
pub fn tamper_positions(path: &Path, portfolio: i64, future: i64) -> usize {
    let conn = rusqlite::Connection::open(path).expect("state database should open");
    conn.execute(
        "UPDATE signal_state SET portfolio_position = ?1, future_position = ?2 WHERE id = 1",
        rusqlite::params![portfolio, future],
    )
    .expect("position update should succeed")
}

/// Deterministic linear congruential generator for reproducible noise.
pub struct Lcg(u64);

impl Lcg {
    pub fn new(seed: u64) -> Self {
        Self(seed)
    }

    pub fn uniform(&mut self) -> f64 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        ((self.0 >> 11) as f64 + 0.5) / (1u64 << 53) as f64
    }

    pub fn normal(&mut self) -> f64 {
        let (u1, u2) = (self.uniform(), self.uniform());
        (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
    }
}

/// The last `n` weekdays up to and including `end`, ascending.
pub fn weekdays_until(end: NaiveDate, n: usize) -> Vec<NaiveDate> {
    let mut out = Vec::with_capacity(n);
    let mut day = end;
    while out.len() < n {
        if !matches!(day.weekday(), Weekday::Sat | Weekday::Sun) {
            out.push(day);
        }
        day = day - Days::new(1);
    }
    out.reverse();
    out
}

/// AR(1) spread s(t) = alpha + beta s(t-1) + e(t), started at its equilibrium.
pub fn ar1_spread(n: usize, alpha: f64, beta: f64, noise_sd: f64, seed: u64) -> Vec<f64> {
    let mut rng = Lcg::new(seed);
    let mut s = alpha / (1.0 - beta);
    (0..n)
        .map(|_| {
            s = alpha + beta * s + noise_sd * rng.normal();
            s
        })
        .collect()
}

/// Two stocks whose equal-weight basket sits `spread` above a future flat at 100.
pub fn paired_prices(spread: &[f64], seed: u64) -> (Vec<f64>, Vec<f64>) {
    let mut rng = Lcg::new(seed);
    spread
        .iter()
        .map(|s| {
            let wiggle = rng.normal();
            (100.0 + s + wiggle, 100.0 + s - wiggle)
        })
        .unzip()
}

pub fn bars(dates: &[NaiveDate], values: &[f64]) -> Vec<Bar> {
    dates
        .iter()
        .zip(values)
        .map(|(date, close)| Bar {
            date: *date,
            close: *close,
        })
        .collect()
}

/// In-process gateway serving fixed series and counting every call.
#[derive(Default)]
pub struct ScriptedGateway {
    pub future: Vec<Bar>,
    pub stocks: BTreeMap<String, Vec<Bar>>,
    pub factors: BTreeMap<String, Vec<AdjustmentFactor>>,
    pub members: Vec<String>,
    /// Membership queries answered with an empty list before the real one.
    pub empty_member_calls: usize,
    pub failing_symbol: Option<String>,
    calls: AtomicUsize,
    member_calls: AtomicUsize,
}

impl ScriptedGateway {
    /// Year of weekday data ending on `end` for the two-stock basket around a flat future.
    pub fn paired(end: NaiveDate, rows: usize, seed: u64) -> Self {
        let dates = weekdays_until(end, rows);
        let spread = ar1_spread(rows, 0.5, 0.5, 0.05, seed);
        let (a, b) = paired_prices(&spread, seed + 1);
        let mut stocks = BTreeMap::new();
        stocks.insert(STOCK_A.to_string(), bars(&dates, &a));
        stocks.insert(STOCK_B.to_string(), bars(&dates, &b));
        Self {
            future: bars(&dates, &vec![100.0; rows]),
            stocks,
            members: vec![STOCK_A.to_string(), STOCK_B.to_string()],
            ..Self::default()
        }
    }

    /// Membership-only gateway whose first `empty_member_calls` answers are empty.
    pub fn with_members(members: &[&str], empty_member_calls: usize) -> Self {
        Self {
            members: members.iter().map(|m| m.to_string()).collect(),
            empty_member_calls,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn window(bars: &[Bar], start: NaiveDate, end: NaiveDate) -> Vec<Bar> {
        bars.iter()
            .filter(|b| b.date >= start && b.date <= end)
            .copied()
            .collect()
    }
}

impl MarketDataGateway for ScriptedGateway {
    async fn get_bars(
        &self,
        symbol: &str,
        exchange: Exchange,
        _frequency: BarFrequency,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Bar>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_symbol.as_deref() == Some(symbol) {
            bail!("scripted failure for {}", symbol);
        }
        if exchange.is_futures_venue() {
            return Ok(Self::window(&self.future, start, end));
        }
        Ok(self
            .stocks
            .get(symbol)
            .map(|b| Self::window(b, start, end))
            .unwrap_or_default())
    }

    async fn get_index_members(
        &self,
        _index_code: &str,
        _start: NaiveDate,
        _end: NaiveDate,
    ) -> Result<Vec<String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let n = self.member_calls.fetch_add(1, Ordering::SeqCst);
        if n < self.empty_member_calls {
            return Ok(Vec::new());
        }
        Ok(self.members.clone())
    }

    async fn get_adjustment_factors(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<AdjustmentFactor>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .factors
            .get(symbol)
            .map(|f| {
                f.iter()
                    .filter(|x| x.date >= start && x.date <= end)
                    .copied()
                    .collect()
            })
            .unwrap_or_default())
    }
}

pub fn config_toml(stock_pool: &str, root: &std::path::Path) -> String {
    format!(
        r#"
[strategy]
future_code = "IF00"
stock_pool = "{stock_pool}"
LASSO_alpha = 0.0001
AR_p = 1
GARCH_p = 1
GARCH_q = 1
boundary_ratio = 1.0
update_window_size = 5

[data]
future_bars_url = "http://localhost/future"
stock_innercode_url = "http://localhost/innercode"
stock_bars_url = "http://localhost/kline"
index_members_url = "http://localhost/members"
adj_factor_url = "http://localhost/tushare"
request_concurrency = 2

[storage]
data_dir = "{data}"
output_dir = "{output}"
state_db = "{db}"
"#,
        stock_pool = stock_pool,
        data = root.join("data").display(),
        output = root.join("output").display(),
        db = root.join("output").join("state.sqlite").display(),
    )
}

pub fn test_config(stock_pool: &str, root: &std::path::Path) -> Config {
    Config::from_toml_str(&config_toml(stock_pool, root)).expect("test config should parse")
}
