use std::io::{self, Write};

use anyhow::{Context, Result};

use spread_signal::calendar::TradingCalendar;
use spread_signal::config::{Config, LoggingConfig};
use spread_signal::gateway::RestMarketData;
use spread_signal::pipeline::{self, RunRequest};
use spread_signal::prompt::{prompt_initial_capital, prompt_run_date};
use spread_signal::store::StateStore;

fn init_tracing(logging: &LoggingConfig) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        logging
            .level
            .parse()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
    });

    // Prompts go to stdout, so logs never do.
    match &logging.file {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
            let log_file = std::fs::File::create(path)
                .with_context(|| format!("failed to create log file {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(log_file)
                .with_ansi(false)
                .json()
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(io::stderr)
                .init();
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config: {:#}", e);
            eprintln!("Make sure config/default.toml exists and TUSHARE_TOKEN is set in .env");
            std::process::exit(1);
        }
    };
    init_tracing(&config.logging)?;
    config.validate()?;

    tracing::info!(
        future = %config.strategy.future_code,
        stock_pool = %config.strategy.stock_pool,
        state_db = %config.storage.state_db.display(),
        "Starting spread-signal"
    );

    let mut store = StateStore::open(&config.storage.state_db)?;
    let calendar = TradingCalendar::new(config.calendar.holidays.iter().copied());

    let stdin = io::stdin();
    let mut input = stdin.lock();
    let mut out = io::stdout();
    let date = prompt_run_date(&mut input, &mut out, &calendar)?;

    let initial_capital = if store.load_run_state()?.is_none() {
        writeln!(
            out,
            "-- This is the first time running this strategy. Portfolio rebalance and model training will be performed."
        )?;
        prompt_initial_capital(&mut input, &mut out)?
    } else {
        if calendar.is_first_business_day_of_month(date) {
            writeln!(
                out,
                "-- The input date is the first business day of the month. Portfolio rebalance and model training will be performed."
            )?;
        } else {
            writeln!(
                out,
                "-- The input date is not the first business day of the month. Only model training will be performed."
            )?;
        }
        None
    };

    let gateway = RestMarketData::new(&config.data)?;
    let request = RunRequest {
        date,
        initial_capital,
    };
    let report = match pipeline::run(&config, &gateway, &mut store, &request).await {
        Ok(report) => report,
        Err(e) => {
            tracing::error!(stage = e.stage.as_str(), error = %e.error, "Run failed");
            return Err(e.into());
        }
    };

    writeln!(
        out,
        "-- {} finished: signal {} (spread {:.4}, equilibrium {:.4}, lower bound {:.4}), future size {}.",
        report.date,
        report.signal.state.as_str(),
        report.signal.spread,
        report.signal.equilibrium,
        report.signal.lower_bound,
        report.sizing.future_size_text(),
    )?;
    writeln!(
        out,
        "-- Check 'port_weights.csv' and 'future_size.txt' in {}.",
        report.output_dir.display()
    )?;
    Ok(())
}
