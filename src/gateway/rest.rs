use std::collections::HashMap;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{Days, NaiveDate};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE, USER_AGENT};
use serde_json::{json, Value};
use tokio::sync::Mutex;

use crate::config::DataConfig;
use crate::model::bar::{AdjustmentFactor, Bar, BarFrequency, Exchange};

use super::MarketDataGateway;

/// HTTP gateway for futures bars, A-share klines, index components and adjustment factors.
pub struct RestMarketData {
    http: reqwest::Client,
    future_bars_url: String,
    stock_innercode_url: String,
    stock_bars_url: String,
    index_members_url: String,
    adj_factor_url: String,
    adj_factor_token: String,
    innercode_cache: Mutex<Option<HashMap<String, i64>>>,
}

impl RestMarketData {
    pub fn new(cfg: &DataConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static("spread-signal/0.1"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(cfg.request_timeout_secs.max(1)))
            .build()
            .context("failed to build market data HTTP client")?;
        Ok(Self {
            http,
            future_bars_url: cfg.future_bars_url.clone(),
            stock_innercode_url: cfg.stock_innercode_url.clone(),
            stock_bars_url: cfg.stock_bars_url.clone(),
            index_members_url: cfg.index_members_url.clone(),
            adj_factor_url: cfg.adj_factor_url.clone(),
            adj_factor_token: cfg.adj_factor_token.clone(),
            innercode_cache: Mutex::new(None),
        })
    }

    fn compact_error_body(body: &str) -> String {
        let normalized = body.split_whitespace().collect::<Vec<_>>().join(" ");
        if normalized.len() > 180 {
            let cut = (0..=180)
                .rev()
                .find(|i| normalized.is_char_boundary(*i))
                .unwrap_or(0);
            format!("{}...", &normalized[..cut])
        } else {
            normalized
        }
    }

    async fn read_json(resp: reqwest::Response, what: &str) -> Result<Value> {
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            bail!(
                "{} returned {}: {}",
                what,
                status,
                Self::compact_error_body(&body)
            );
        }
        resp.json()
            .await
            .with_context(|| format!("{} JSON parse failed", what))
    }

    async fn future_bars(
        &self,
        symbol: &str,
        exchange: Exchange,
        frequency: BarFrequency,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Bar>> {
        // A single-day daily request needs an exclusive end bound.
        let request_end = if start == end && frequency == BarFrequency::Daily {
            end + Days::new(1)
        } else {
            end
        };
        let body = json!({
            "symbol": symbol,
            "exchange": exchange.venue_code(),
            "dataType": frequency.seconds(),
            "dataSource": 1,
            "begin": start.format("%Y%m%d").to_string(),
            "end": request_end.format("%Y%m%d").to_string(),
        });
        let resp = self
            .http
            .post(&self.future_bars_url)
            .json(&body)
            .send()
            .await
            .context("future bars HTTP failed")?;
        let root = Self::read_json(resp, "future bars").await?;
        parse_future_bars(&root, start, end)
    }

    async fn innercode(&self, code: &str) -> Result<i64> {
        let mut cache = self.innercode_cache.lock().await;
        if cache.is_none() {
            let resp = self
                .http
                .get(&self.stock_innercode_url)
                .send()
                .await
                .context("innercode HTTP failed")?;
            let root = Self::read_json(resp, "innercode").await?;
            let table = parse_innercodes(&root)?;
            tracing::debug!(entries = table.len(), "Loaded stock innercode table");
            *cache = Some(table);
        }
        let table = cache.as_ref().map(|t| t as &HashMap<String, i64>);
        let bare = code.split('.').next().unwrap_or(code);
        table
            .and_then(|t| t.get(code).or_else(|| t.get(bare)).copied())
            .with_context(|| format!("no innercode for {}", code))
    }

    async fn stock_bars(
        &self,
        symbol: &str,
        frequency: BarFrequency,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Bar>> {
        let kline_type = frequency
            .kline_type()
            .with_context(|| format!("frequency {:?} not served for stocks", frequency))?;
        let innercode = self.innercode(symbol).await?;
        // The kline endpoint counts backwards from an exclusive end timestamp.
        let exclusive_end = end + Days::new(1);
        let count = (exclusive_end - start).num_days().max(1);
        let resp = self
            .http
            .get(&self.stock_bars_url)
            .query(&[
                ("code", innercode.to_string()),
                ("type", kline_type.to_string()),
                ("start", exclusive_end.format("%Y%m%d000000").to_string()),
                ("count", count.to_string()),
                ("ex", "0".to_string()),
            ])
            .send()
            .await
            .with_context(|| format!("stock bars HTTP failed for {}", symbol))?;
        let root = Self::read_json(resp, "stock bars").await?;
        parse_stock_bars(&root, start, end)
    }
}

impl MarketDataGateway for RestMarketData {
    async fn get_bars(
        &self,
        symbol: &str,
        exchange: Exchange,
        frequency: BarFrequency,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Bar>> {
        if exchange.is_futures_venue() {
            self.future_bars(symbol, exchange, frequency, start, end)
                .await
        } else {
            self.stock_bars(symbol, frequency, start, end).await
        }
    }

    async fn get_index_members(
        &self,
        index_code: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<String>> {
        let resp = self
            .http
            .get(&self.index_members_url)
            .query(&[
                ("sdate", start.format("%Y-%m-%d").to_string()),
                ("edate", end.format("%Y-%m-%d").to_string()),
                ("index_code", index_code.to_string()),
            ])
            .send()
            .await
            .context("index components HTTP failed")?;
        let root = Self::read_json(resp, "index components").await?;
        parse_index_members(&root)
            .with_context(|| format!("index components of {}", index_code))
    }

    async fn get_adjustment_factors(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<AdjustmentFactor>> {
        let body = json!({
            "api_name": "adj_factor",
            "token": self.adj_factor_token,
            "params": {
                "ts_code": symbol,
                "start_date": start.format("%Y%m%d").to_string(),
                "end_date": end.format("%Y%m%d").to_string(),
            },
            "fields": "trade_date,adj_factor",
        });
        let resp = self
            .http
            .post(&self.adj_factor_url)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("adjustment factor HTTP failed for {}", symbol))?;
        let root = Self::read_json(resp, "adjustment factors").await?;
        let raw = parse_adjustment_items(&root)
            .with_context(|| format!("adjustment factors for {}", symbol))?;
        Ok(fill_adjustment_factors(raw))
    }
}

/// Parse dates such as `20230103`, `2023-01-03`, `20230103000000` or `2023-01-03 15:00:00`.
pub fn parse_compact_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    let digits: String = s.chars().take_while(|c| *c != ' ' && *c != 'T').collect();
    NaiveDate::parse_from_str(&digits, "%Y-%m-%d")
        .ok()
        .or_else(|| {
            digits
                .get(..8)
                .and_then(|d| NaiveDate::parse_from_str(d, "%Y%m%d").ok())
        })
}

/// Futures bar timestamps are `YYYYMMDDhhmmss` integers.
fn date_from_bar_time(time: &Value) -> Option<NaiveDate> {
    match time {
        Value::Number(n) => {
            let t = n.as_i64()?;
            parse_compact_date(&(t / 1_000_000).to_string())
        }
        Value::String(s) => parse_compact_date(s),
        _ => None,
    }
}

fn in_window(date: NaiveDate, start: NaiveDate, end: NaiveDate) -> bool {
    date >= start && date <= end
}

pub fn parse_future_bars(root: &Value, start: NaiveDate, end: NaiveDate) -> Result<Vec<Bar>> {
    let Some(rows) = root.get("data").and_then(Value::as_array) else {
        if root.get("data").is_some_and(Value::is_null) {
            return Ok(Vec::new());
        }
        bail!("future bars payload has no 'data' array");
    };
    let mut bars = Vec::with_capacity(rows.len());
    for row in rows {
        // Array rows: symbol, exchange, bar_type, time, pre_close, open, high, low, close, ...
        let (time, close) = match row {
            Value::Array(cols) => (cols.get(3), cols.get(8)),
            Value::Object(_) => (row.get("time"), row.get("close")),
            _ => (None, None),
        };
        let Some(date) = time.and_then(date_from_bar_time) else {
            continue;
        };
        let Some(close) = close.and_then(Value::as_f64) else {
            continue;
        };
        if in_window(date, start, end) {
            bars.push(Bar { date, close });
        }
    }
    Ok(bars)
}

fn parse_innercodes(root: &Value) -> Result<HashMap<String, i64>> {
    let rows = root
        .get("data")
        .and_then(Value::as_array)
        .context("innercode payload has no 'data' array")?;
    let mut out = HashMap::with_capacity(rows.len());
    for row in rows {
        let code = row.get("TradingCode").and_then(Value::as_str);
        let inner = row.get("InnerCode").and_then(|v| {
            v.as_i64()
                .or_else(|| v.as_str().and_then(|s| s.parse().ok()))
        });
        if let (Some(code), Some(inner)) = (code, inner) {
            out.insert(code.trim().to_ascii_uppercase(), inner);
        }
    }
    Ok(out)
}

pub fn parse_stock_bars(root: &Value, start: NaiveDate, end: NaiveDate) -> Result<Vec<Bar>> {
    let rows = root
        .get("timedata")
        .and_then(Value::as_array)
        .context("stock bars payload has no 'timedata' array")?;
    let mut bars = Vec::with_capacity(rows.len());
    for row in rows {
        let Some(date) = row.get("times").and_then(|v| match v {
            Value::String(s) => parse_compact_date(s),
            Value::Number(n) => n.as_i64().and_then(|t| {
                let t = if t > 99_999_999 { t / 1_000_000 } else { t };
                parse_compact_date(&t.to_string())
            }),
            _ => None,
        }) else {
            continue;
        };
        // Close is quoted in cents.
        let Some(cents) = row.get("nowv").and_then(|v| {
            v.as_f64()
                .or_else(|| v.as_str().and_then(|s| s.parse().ok()))
        }) else {
            continue;
        };
        if in_window(date, start, end) {
            bars.push(Bar {
                date,
                close: cents.trunc() / 100.0,
            });
        }
    }
    Ok(bars)
}

/// An empty list is a valid answer; a body with no list at all is not.
pub fn parse_index_members(root: &Value) -> Result<Vec<String>> {
    let rows = root
        .as_array()
        .or_else(|| root.get("data").and_then(Value::as_array))
        .context("index components payload has no member list")?;
    let mut members: Vec<String> = rows
        .iter()
        .filter_map(|r| r.get("ticker").and_then(Value::as_str))
        .map(|s| s.trim().to_ascii_uppercase())
        .filter(|s| !s.is_empty())
        .collect();
    members.sort();
    members.dedup();
    Ok(members)
}

fn parse_adjustment_items(root: &Value) -> Result<Vec<(NaiveDate, Option<f64>)>> {
    let code = root.get("code").and_then(Value::as_i64).unwrap_or(0);
    if code != 0 {
        let msg = root.get("msg").and_then(Value::as_str).unwrap_or_default();
        bail!("provider error (code {}): {}", code, msg);
    }
    let data = root.get("data").context("payload has no 'data' object")?;
    let fields: Vec<&str> = data
        .get("fields")
        .and_then(Value::as_array)
        .map(|f| f.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();
    let date_idx = fields.iter().position(|f| *f == "trade_date").unwrap_or(0);
    let factor_idx = fields.iter().position(|f| *f == "adj_factor").unwrap_or(1);
    let items = data
        .get("items")
        .and_then(Value::as_array)
        .context("payload has no 'items' array")?;

    let mut out = Vec::with_capacity(items.len());
    for item in items {
        let Some(date) = item
            .get(date_idx)
            .and_then(Value::as_str)
            .and_then(parse_compact_date)
        else {
            continue;
        };
        out.push((date, item.get(factor_idx).and_then(Value::as_f64)));
    }
    Ok(out)
}

/// Sort, backward-fill gaps, default the remainder to 1.0 and round to 3 decimals.
pub fn fill_adjustment_factors(mut raw: Vec<(NaiveDate, Option<f64>)>) -> Vec<AdjustmentFactor> {
    raw.sort_by_key(|(d, _)| *d);
    raw.dedup_by_key(|(d, _)| *d);
    let mut next: Option<f64> = None;
    let mut filled: Vec<AdjustmentFactor> = raw
        .into_iter()
        .rev()
        .map(|(date, factor)| {
            let factor = factor.filter(|f| f.is_finite()).or(next);
            next = factor;
            AdjustmentFactor {
                date,
                factor: (factor.unwrap_or(1.0) * 1000.0).round() / 1000.0,
            }
        })
        .collect();
    filled.reverse();
    filled
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn compact_dates_in_several_shapes() {
        assert_eq!(parse_compact_date("20230103"), Some(d("2023-01-03")));
        assert_eq!(parse_compact_date("2023-01-03"), Some(d("2023-01-03")));
        assert_eq!(parse_compact_date("20230103150000"), Some(d("2023-01-03")));
        assert_eq!(parse_compact_date("2023-01-03 15:00:00"), Some(d("2023-01-03")));
        assert_eq!(parse_compact_date("garbage"), None);
    }

    #[test]
    fn future_bars_from_array_rows() {
        let root = json!({
            "data": [
                ["IF00", 3, 86400, 20230103000000_i64, 3800.0, 3810.0, 3850.0, 3790.0, 3840.0, 1, 1, 1, 0],
                ["IF00", 3, 86400, 20230104000000_i64, 3840.0, 3840.0, 3870.0, 3820.0, 3861.2, 1, 1, 1, 0],
                ["IF00", 3, 86400, 20221230000000_i64, 3700.0, 3700.0, 3700.0, 3700.0, 3700.0, 1, 1, 1, 0]
            ]
        });
        let bars = parse_future_bars(&root, d("2023-01-01"), d("2023-01-31")).unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[1].date, d("2023-01-04"));
        assert!((bars[1].close - 3861.2).abs() < 1e-9);
    }

    #[test]
    fn stock_bars_are_quoted_in_cents() {
        let root = json!({
            "timedata": [
                {"times": "2023-01-03 00:00:00", "nowv": 1234},
                {"times": "2023-01-04 00:00:00", "nowv": "1250"}
            ]
        });
        let bars = parse_stock_bars(&root, d("2023-01-01"), d("2023-01-31")).unwrap();
        assert_eq!(bars.len(), 2);
        assert!((bars[0].close - 12.34).abs() < 1e-9);
        assert!((bars[1].close - 12.5).abs() < 1e-9);
    }

    #[test]
    fn index_members_deduplicated() {
        let root = json!([
            {"ticker": "600000.SH"},
            {"ticker": "000001.SZ"},
            {"ticker": "600000.SH"}
        ]);
        assert_eq!(
            parse_index_members(&root).unwrap(),
            vec!["000001.SZ".to_string(), "600000.SH".to_string()]
        );
        assert!(parse_index_members(&json!([])).unwrap().is_empty());
        assert!(parse_index_members(&json!({"data": []})).unwrap().is_empty());
    }

    #[test]
    fn error_bodies_are_not_empty_data() {
        let root = json!({"message": "rate limited"});
        let range = (d("2023-01-01"), d("2023-01-31"));

        let err = parse_stock_bars(&root, range.0, range.1).unwrap_err();
        assert!(err.to_string().contains("timedata"));
        assert!(parse_future_bars(&root, range.0, range.1).is_err());
        assert!(parse_index_members(&root).is_err());

        let no_items = json!({"code": 0, "msg": "", "data": {"fields": ["trade_date", "adj_factor"]}});
        let err = parse_adjustment_items(&no_items).unwrap_err();
        assert!(err.to_string().contains("items"));
        let null_data = json!({"code": 0, "msg": "", "data": null});
        assert!(parse_adjustment_items(&null_data).is_err());
    }

    #[test]
    fn empty_lists_are_valid_answers() {
        let range = (d("2023-01-01"), d("2023-01-31"));
        let bars = parse_stock_bars(&json!({"timedata": []}), range.0, range.1).unwrap();
        assert!(bars.is_empty());
        let items = json!({"code": 0, "data": {"fields": ["trade_date", "adj_factor"], "items": []}});
        assert!(parse_adjustment_items(&items).unwrap().is_empty());
    }

    #[test]
    fn adjustment_factors_backfill_then_default() {
        let filled = fill_adjustment_factors(vec![
            (d("2023-01-05"), None),
            (d("2023-01-03"), None),
            (d("2023-01-04"), Some(1.23456)),
        ]);
        let values: Vec<f64> = filled.iter().map(|f| f.factor).collect();
        assert_eq!(filled[0].date, d("2023-01-03"));
        assert_eq!(values, vec![1.235, 1.235, 1.0]);
    }

    #[test]
    fn adjustment_provider_error_surfaces() {
        let root = json!({"code": 40203, "msg": "rate limited", "data": null});
        assert!(parse_adjustment_items(&root).is_err());
    }
}
