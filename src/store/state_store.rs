use std::path::Path;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};

use crate::model::hedge::HedgeVector;
use crate::model::signal::SignalRow;

const DATE_FMT: &str = "%Y-%m-%d";

/// Values fixed when the strategy was initialized, plus the last completed run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunState {
    pub initialized_on: NaiveDate,
    pub capital: f64,
    pub margin_ratio: f64,
    pub future_size: u64,
    pub last_run_date: NaiveDate,
    pub last_run_id: String,
}

/// Position pair written by the previous run, not yet validated.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredPositions {
    pub run_date: NaiveDate,
    pub portfolio_position: i64,
    pub future_position: i64,
}

/// Everything a successful run writes back.
#[derive(Debug, Clone)]
pub struct RunCommit<'a> {
    pub run_id: &'a str,
    pub run_date: NaiveDate,
    pub initialized_on: NaiveDate,
    pub capital: f64,
    pub margin_ratio: f64,
    pub future_size: u64,
    /// Present only when the hedge was refitted this run.
    pub hedge: Option<&'a HedgeVector>,
    pub signal: &'a SignalRow,
}

/// Cross-run state in SQLite: run record, hedge weights and the current signal.
pub struct StateStore {
    conn: Connection,
}

impl StateStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
        }
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open state store {}", path.display()))?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS run_state (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                initialized_on TEXT NOT NULL,
                capital REAL NOT NULL,
                margin_ratio REAL NOT NULL,
                future_size INTEGER NOT NULL,
                last_run_date TEXT NOT NULL,
                last_run_id TEXT NOT NULL,
                updated_at_ms INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS hedge_vector (
                position INTEGER PRIMARY KEY,
                symbol TEXT NOT NULL,
                weight REAL NOT NULL,
                fitted_on TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS signal_state (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                run_id TEXT NOT NULL,
                run_date TEXT NOT NULL,
                volatility REAL NOT NULL,
                equilibrium REAL NOT NULL,
                lower_bound REAL NOT NULL,
                future_value REAL NOT NULL,
                portfolio_value REAL NOT NULL,
                spread REAL NOT NULL,
                portfolio_position INTEGER NOT NULL,
                future_position INTEGER NOT NULL,
                updated_at_ms INTEGER NOT NULL
            );
            "#,
        )
        .context("failed to initialize state store schema")?;
        Ok(Self { conn })
    }

    pub fn load_run_state(&self) -> Result<Option<RunState>> {
        let row = self
            .conn
            .query_row(
                r#"
                SELECT initialized_on, capital, margin_ratio, future_size, last_run_date, last_run_id
                FROM run_state WHERE id = 1
                "#,
                [],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, f64>(1)?,
                        row.get::<_, f64>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                    ))
                },
            )
            .optional()
            .context("failed to read run state")?;

        let Some((initialized_on, capital, margin_ratio, future_size, last_run_date, last_run_id)) =
            row
        else {
            return Ok(None);
        };
        Ok(Some(RunState {
            initialized_on: parse_date(&initialized_on)?,
            capital,
            margin_ratio,
            future_size: u64::try_from(future_size)
                .with_context(|| format!("stored future size {} is negative", future_size))?,
            last_run_date: parse_date(&last_run_date)?,
            last_run_id,
        }))
    }

    pub fn load_hedge_vector(&self) -> Result<Option<HedgeVector>> {
        let mut stmt = self
            .conn
            .prepare("SELECT symbol, weight, fitted_on FROM hedge_vector ORDER BY position ASC")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, f64>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to read hedge vector")?;

        let Some((_, _, fitted_on)) = rows.first() else {
            return Ok(None);
        };
        let fitted_on = parse_date(fitted_on)?;
        let (columns, weights) = rows.into_iter().map(|(s, w, _)| (s, w)).unzip();
        Ok(Some(HedgeVector::new(fitted_on, columns, weights)?))
    }

    pub fn load_signal_positions(&self) -> Result<Option<StoredPositions>> {
        let row = self
            .conn
            .query_row(
                "SELECT run_date, portfolio_position, future_position FROM signal_state WHERE id = 1",
                [],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, i64>(2)?,
                    ))
                },
            )
            .optional()
            .context("failed to read signal state")?;
        row.map(|(run_date, portfolio_position, future_position)| {
            Ok(StoredPositions {
                run_date: parse_date(&run_date)?,
                portfolio_position,
                future_position,
            })
        })
        .transpose()
    }

    /// Replace the cross-run state in a single transaction.
    pub fn commit_run(&mut self, commit: &RunCommit<'_>) -> Result<()> {
        let now_ms = chrono::Utc::now().timestamp_millis();
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        tx.execute(
            r#"
            INSERT INTO run_state (
                id, initialized_on, capital, margin_ratio, future_size,
                last_run_date, last_run_id, updated_at_ms
            ) VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(id) DO UPDATE SET
                initialized_on = excluded.initialized_on,
                capital = excluded.capital,
                margin_ratio = excluded.margin_ratio,
                future_size = excluded.future_size,
                last_run_date = excluded.last_run_date,
                last_run_id = excluded.last_run_id,
                updated_at_ms = excluded.updated_at_ms
            "#,
            params![
                commit.initialized_on.format(DATE_FMT).to_string(),
                commit.capital,
                commit.margin_ratio,
                commit.future_size as i64,
                commit.run_date.format(DATE_FMT).to_string(),
                commit.run_id,
                now_ms,
            ],
        )?;

        if let Some(hedge) = commit.hedge {
            tx.execute("DELETE FROM hedge_vector", [])?;
            let fitted_on = hedge.fitted_on.format(DATE_FMT).to_string();
            for (position, (symbol, weight)) in hedge.columns.iter().zip(&hedge.weights).enumerate()
            {
                tx.execute(
                    "INSERT INTO hedge_vector (position, symbol, weight, fitted_on) VALUES (?1, ?2, ?3, ?4)",
                    params![position as i64, symbol, weight, fitted_on],
                )?;
            }
        }

        let signal = commit.signal;
        tx.execute(
            r#"
            INSERT INTO signal_state (
                id, run_id, run_date, volatility, equilibrium, lower_bound, future_value,
                portfolio_value, spread, portfolio_position, future_position, updated_at_ms
            ) VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            ON CONFLICT(id) DO UPDATE SET
                run_id = excluded.run_id,
                run_date = excluded.run_date,
                volatility = excluded.volatility,
                equilibrium = excluded.equilibrium,
                lower_bound = excluded.lower_bound,
                future_value = excluded.future_value,
                portfolio_value = excluded.portfolio_value,
                spread = excluded.spread,
                portfolio_position = excluded.portfolio_position,
                future_position = excluded.future_position,
                updated_at_ms = excluded.updated_at_ms
            "#,
            params![
                commit.run_id,
                signal.date.format(DATE_FMT).to_string(),
                signal.volatility,
                signal.equilibrium,
                signal.lower_bound,
                signal.future_value,
                signal.portfolio_value,
                signal.spread,
                signal.state.portfolio_position(),
                signal.state.future_position(),
                now_ms,
            ],
        )?;

        tx.commit().context("failed to commit run state")?;
        Ok(())
    }
}

fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, DATE_FMT).with_context(|| format!("invalid stored date '{}'", s))
}
