use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::PipelineError;

pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub strategy: StrategyConfig,
    #[serde(default)]
    pub calendar: CalendarConfig,
    pub data: DataConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StrategyConfig {
    pub future_code: String,
    #[serde(default = "default_future_exchange")]
    pub future_exchange: String,
    pub stock_pool: String,
    #[serde(alias = "LASSO_alpha")]
    pub lasso_alpha: f64,
    #[serde(default = "default_lasso_max_iter")]
    pub lasso_max_iter: usize,
    #[serde(default = "default_lasso_tol")]
    pub lasso_tol: f64,
    #[serde(alias = "AR_p")]
    pub ar_p: usize,
    #[serde(alias = "GARCH_p")]
    pub garch_p: usize,
    #[serde(alias = "GARCH_q")]
    pub garch_q: usize,
    #[serde(default = "default_garch_max_iter")]
    pub garch_max_iter: usize,
    pub boundary_ratio: f64,
    #[serde(default)]
    pub update_window_size: usize,
    /// Extra margin on top of the exchange margin ratio when sizing futures.
    #[serde(default = "default_margin_buffer")]
    pub margin_buffer: f64,
    /// Six-month steps taken back when index membership comes back empty.
    #[serde(default = "default_membership_walkback_steps")]
    pub membership_walkback_steps: usize,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CalendarConfig {
    #[serde(default)]
    pub holidays: Vec<NaiveDate>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DataConfig {
    pub future_bars_url: String,
    pub stock_innercode_url: String,
    pub stock_bars_url: String,
    pub index_members_url: String,
    pub adj_factor_url: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_request_concurrency")]
    pub request_concurrency: usize,
    #[serde(skip)]
    pub adj_factor_token: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_state_db")]
    pub state_db: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            output_dir: default_output_dir(),
            state_db: default_state_db(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// When set, logs are written as JSON lines to this file instead of stderr.
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

fn default_future_exchange() -> String {
    "CFFEX".to_string()
}
fn default_lasso_max_iter() -> usize {
    10_000
}
fn default_lasso_tol() -> f64 {
    1e-4
}
fn default_garch_max_iter() -> usize {
    5_000
}
fn default_margin_buffer() -> f64 {
    0.01
}
fn default_membership_walkback_steps() -> usize {
    8
}
fn default_request_timeout_secs() -> u64 {
    600
}
fn default_request_concurrency() -> usize {
    8
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}
fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}
fn default_state_db() -> PathBuf {
    PathBuf::from("output/state.sqlite")
}
fn default_log_level() -> String {
    "info".to_string()
}

/// Index whose constituents form the stock basket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StockPool {
    Csi300,
    Csi500,
}

impl StockPool {
    pub fn index_code(self) -> &'static str {
        match self {
            Self::Csi300 => "000300.SH",
            Self::Csi500 => "000905.SH",
        }
    }
}

impl FromStr for StockPool {
    type Err = PipelineError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "000300.SH" => Ok(Self::Csi300),
            "000905.SH" => Ok(Self::Csi500),
            other => Err(PipelineError::Configuration(format!(
                "stock_pool '{}' is not supported, choose between \"000300.SH\" and \"000905.SH\"",
                other
            ))),
        }
    }
}

impl StrategyConfig {
    pub fn stock_pool(&self) -> std::result::Result<StockPool, PipelineError> {
        self.stock_pool.parse()
    }
}

impl Config {
    /// Load from `SPREAD_SIGNAL_CONFIG` or `config/default.toml`, secrets from `.env`.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config_path = std::env::var("SPREAD_SIGNAL_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));
        let mut config = Self::from_path(&config_path)?;

        config.data.adj_factor_token = std::env::var("TUSHARE_TOKEN")
            .context("TUSHARE_TOKEN not set in .env or environment")?;

        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_toml_str(&config_str)
            .with_context(|| format!("failed to parse {}", path.display()))
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }

    /// Check every value a run depends on. Runs before any network access.
    pub fn validate(&self) -> std::result::Result<StockPool, PipelineError> {
        let pool = self.strategy.stock_pool()?;
        let s = &self.strategy;

        if s.future_code.trim().is_empty() {
            return Err(PipelineError::Configuration(
                "future_code must not be empty".to_string(),
            ));
        }
        if !(s.lasso_alpha.is_finite() && s.lasso_alpha >= 0.0) {
            return Err(PipelineError::Configuration(format!(
                "LASSO_alpha must be a non-negative number, got {}",
                s.lasso_alpha
            )));
        }
        if s.ar_p == 0 {
            return Err(PipelineError::Configuration(
                "AR_p must be at least 1".to_string(),
            ));
        }
        if s.garch_p == 0 || s.garch_q == 0 {
            return Err(PipelineError::Configuration(format!(
                "GARCH_p and GARCH_q must be at least 1, got p={} q={}",
                s.garch_p, s.garch_q
            )));
        }
        if !(s.boundary_ratio.is_finite() && s.boundary_ratio > 0.0) {
            return Err(PipelineError::Configuration(format!(
                "boundary_ratio must be positive, got {}",
                s.boundary_ratio
            )));
        }
        if s.lasso_max_iter == 0 || s.garch_max_iter == 0 {
            return Err(PipelineError::Configuration(
                "optimizer iteration budgets must be positive".to_string(),
            ));
        }
        if self.data.request_concurrency == 0 {
            return Err(PipelineError::Configuration(
                "data.request_concurrency must be at least 1".to_string(),
            ));
        }
        for (key, value) in [
            ("future_bars_url", &self.data.future_bars_url),
            ("stock_innercode_url", &self.data.stock_innercode_url),
            ("stock_bars_url", &self.data.stock_bars_url),
            ("index_members_url", &self.data.index_members_url),
            ("adj_factor_url", &self.data.adj_factor_url),
        ] {
            url::Url::parse(value).map_err(|e| {
                PipelineError::Configuration(format!("data.{} '{}' is invalid: {}", key, value, e))
            })?;
        }

        Ok(pool)
    }
}
