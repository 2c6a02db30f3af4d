use std::io::Cursor;

use spread_signal::calendar::TradingCalendar;
use spread_signal::prompt::{
    parse_capital, parse_margin_ratio, parse_run_date, prompt_initial_capital, prompt_run_date,
    DateInput,
};

mod common;
use common::d;

fn calendar() -> TradingCalendar {
    TradingCalendar::new([d("2023-01-23")])
}

#[test]
fn run_date_parsing_classifies_input() {
    let cal = calendar();
    assert_eq!(parse_run_date("2023-06-14", &cal), DateInput::Accepted(d("2023-06-14")));
    assert_eq!(parse_run_date(" 2023-06-14\n", &cal), DateInput::Accepted(d("2023-06-14")));
    assert_eq!(parse_run_date("2023-06-17", &cal), DateInput::NotBusinessDay(d("2023-06-17")));
    assert_eq!(parse_run_date("2023-01-23", &cal), DateInput::NotBusinessDay(d("2023-01-23")));
    assert_eq!(parse_run_date("20230614", &cal), DateInput::Malformed);
    assert_eq!(parse_run_date("2023-02-30", &cal), DateInput::Malformed);
}

#[test]
fn capital_and_margin_parsing() {
    assert_eq!(parse_capital("1000000"), Some(1_000_000.0));
    assert_eq!(parse_capital("1,000,000\n"), Some(1_000_000.0));
    assert_eq!(parse_capital("0"), None);
    assert_eq!(parse_capital("-5"), None);
    assert_eq!(parse_capital("lots"), None);

    assert_eq!(parse_margin_ratio("0.15"), Some(0.15));
    assert_eq!(parse_margin_ratio("0"), Some(0.0));
    assert_eq!(parse_margin_ratio("1"), None);
    assert_eq!(parse_margin_ratio("15%"), None);
}

#[test]
/// Verifies the date prompt re-asks on a weekend and on malformed input, then
/// returns the first business day entered.
fn date_prompt_loops_until_business_day() {
    let mut input = Cursor::new("2023-06-17\nnot a date\n2023-06-14\n");
    let mut out = Vec::new();
    let date = prompt_run_date(&mut input, &mut out, &calendar()).expect("prompt should succeed");
    assert_eq!(date, d("2023-06-14"));

    let text = String::from_utf8(out).unwrap();
    assert!(text.contains("2023-06-17 is not a business day"));
    assert!(text.contains("format is incorrect"));
}

#[test]
fn date_prompt_fails_when_input_closes() {
    let mut input = Cursor::new("2023-06-17\n");
    let mut out = Vec::new();
    assert!(prompt_run_date(&mut input, &mut out, &calendar()).is_err());
}

#[test]
fn capital_prompt_collects_both_values() {
    let mut input = Cursor::new("abc\n1000000\n1.5\n0.15\n");
    let mut out = Vec::new();
    let answer = prompt_initial_capital(&mut input, &mut out).expect("prompt should succeed");
    assert_eq!(answer, Some((1_000_000.0, 0.15)));

    let text = String::from_utf8(out).unwrap();
    assert!(text.contains("Capital must be a positive number"));
    assert!(text.contains("Margin ratio must be a fraction"));
}

#[test]
fn capital_prompt_returns_none_on_eof() {
    let mut input = Cursor::new("1000000\n");
    let mut out = Vec::new();
    assert_eq!(prompt_initial_capital(&mut input, &mut out).unwrap(), None);
}
