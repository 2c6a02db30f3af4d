use std::io::{BufRead, Write};

use anyhow::{bail, Result};
use chrono::NaiveDate;

use crate::calendar::TradingCalendar;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateInput {
    Accepted(NaiveDate),
    NotBusinessDay(NaiveDate),
    Malformed,
}

/// Accept `YYYY-MM-DD` naming a business day.
pub fn parse_run_date(input: &str, calendar: &TradingCalendar) -> DateInput {
    match NaiveDate::parse_from_str(input.trim(), "%Y-%m-%d") {
        Ok(date) if calendar.is_business_day(date) => DateInput::Accepted(date),
        Ok(date) => DateInput::NotBusinessDay(date),
        Err(_) => DateInput::Malformed,
    }
}

pub fn parse_capital(input: &str) -> Option<f64> {
    let value: f64 = input.trim().replace(',', "").parse().ok()?;
    (value.is_finite() && value > 0.0).then_some(value)
}

/// Margin ratio as a fraction, `0.15` for fifteen percent.
pub fn parse_margin_ratio(input: &str) -> Option<f64> {
    let value: f64 = input.trim().parse().ok()?;
    (value.is_finite() && (0.0..1.0).contains(&value)).then_some(value)
}

fn read_line<R: BufRead>(input: &mut R) -> Result<Option<String>> {
    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        return Ok(None);
    }
    Ok(Some(line))
}

/// Ask until a valid business date is entered.
pub fn prompt_run_date<R: BufRead, W: Write>(
    input: &mut R,
    out: &mut W,
    calendar: &TradingCalendar,
) -> Result<NaiveDate> {
    loop {
        write!(out, "Please specify the date for strategy generating (YYYY-MM-DD): ")?;
        out.flush()?;
        let Some(line) = read_line(input)? else {
            bail!("input closed before a run date was entered");
        };
        match parse_run_date(&line, calendar) {
            DateInput::Accepted(date) => return Ok(date),
            DateInput::NotBusinessDay(date) => {
                writeln!(out, "-- {} is not a business day. Please re-specify a date.", date)?
            }
            DateInput::Malformed => {
                writeln!(out, "-- The input format is incorrect. Please re-specify.")?
            }
        }
    }
}

/// Ask for initial capital and margin ratio; `None` when input ends first.
pub fn prompt_initial_capital<R: BufRead, W: Write>(
    input: &mut R,
    out: &mut W,
) -> Result<Option<(f64, f64)>> {
    let capital = loop {
        write!(
            out,
            "Please specify the initial amount of capital for this strategy (e.g. 1000000): "
        )?;
        out.flush()?;
        let Some(line) = read_line(input)? else {
            return Ok(None);
        };
        match parse_capital(&line) {
            Some(v) => break v,
            None => writeln!(out, "-- Capital must be a positive number.")?,
        }
    };
    let margin = loop {
        write!(
            out,
            "Please specify the margin ratio for future trading (e.g. 0.15 for fifteen percent): "
        )?;
        out.flush()?;
        let Some(line) = read_line(input)? else {
            return Ok(None);
        };
        match parse_margin_ratio(&line) {
            Some(v) => break v,
            None => writeln!(out, "-- Margin ratio must be a fraction between 0 and 1.")?,
        }
    };
    Ok(Some((capital, margin)))
}
