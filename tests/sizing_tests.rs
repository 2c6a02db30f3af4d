use spread_signal::error::PipelineError;
use spread_signal::model::{HedgeVector, PriceRow};
use spread_signal::sizing::{contracts_for_capital, size_positions, SizingMode};

mod common;
use common::d;

fn hedge() -> HedgeVector {
    HedgeVector::new(
        d("2023-06-14"),
        vec!["600000.SH".to_string(), "300750.SZ".to_string(), "000001.SZ".to_string()],
        vec![2.0, 0.0, 1.0],
    )
    .expect("hedge should build")
}

fn last_row() -> PriceRow {
    PriceRow {
        date: d("2023-06-14"),
        future: 4000.0,
        stocks: vec![1500.0, 200.0, 1000.0],
    }
}

fn stock_columns() -> Vec<String> {
    vec!["600000.SH".to_string(), "300750.SZ".to_string(), "000001.SZ".to_string()]
}

#[test]
/// Verifies the contract count floors capital over margin-loaded notional.
fn initial_contracts_from_capital() {
    assert_eq!(contracts_for_capital(1_000_000.0, 0.15, 0.01, 4000.0).unwrap(), 215);
    assert_eq!(contracts_for_capital(1_000.0, 0.15, 0.01, 4000.0).unwrap(), 0);
    assert!(matches!(
        contracts_for_capital(0.0, 0.15, 0.01, 4000.0),
        Err(PipelineError::CapitalUnspecified(_))
    ));
    assert!(matches!(
        contracts_for_capital(1_000_000.0, -0.1, 0.01, 4000.0),
        Err(PipelineError::CapitalUnspecified(_))
    ));
}

#[test]
fn engaged_weights_are_value_shares() {
    let sizing = size_positions(
        &hedge(),
        &stock_columns(),
        &last_row(),
        1,
        SizingMode::Initialize {
            capital: 1_000_000.0,
            margin_ratio: 0.15,
        },
        0.01,
    )
    .expect("sizing should succeed");

    assert!((sizing.notional - 4000.0).abs() < 1e-9);
    assert_eq!(sizing.weights.len(), 3);
    assert!((sizing.weights[0].weight - 0.75).abs() < 1e-12);
    assert_eq!(sizing.weights[1].weight, 0.0);
    assert!((sizing.weights[2].weight - 0.25).abs() < 1e-12);
    assert_eq!(sizing.future_size, 215);
    assert_eq!(sizing.future_contracts(), -215);
    assert_eq!(sizing.future_size_text(), "-215");
}

#[test]
/// Verifies a flat signal zeroes the weights but keeps the stored future size.
fn flat_weights_are_zero_and_size_is_reused() {
    let sizing = size_positions(
        &hedge(),
        &stock_columns(),
        &last_row(),
        0,
        SizingMode::Reuse { future_size: 7 },
        0.01,
    )
    .unwrap();
    assert!(sizing.weights.iter().all(|w| w.weight == 0.0));
    assert_eq!(sizing.future_size_text(), "-7");
}

#[test]
fn weights_follow_labels_not_positions() {
    let reordered = vec!["000001.SZ".to_string(), "300750.SZ".to_string(), "600000.SH".to_string()];
    let row = PriceRow {
        date: d("2023-06-14"),
        future: 4000.0,
        stocks: vec![1000.0, 200.0, 1500.0],
    };
    let sizing = size_positions(&hedge(), &reordered, &row, 1, SizingMode::Reuse { future_size: 3 }, 0.01)
        .unwrap();
    assert_eq!(sizing.weights[0].symbol, "600000.SH");
    assert!((sizing.weights[0].weight - 0.75).abs() < 1e-12);
}

#[test]
/// Verifies the weights file is byte-identical when written twice from the
/// same inputs.
fn weights_output_is_idempotent() {
    let sizing = size_positions(
        &hedge(),
        &stock_columns(),
        &last_row(),
        1,
        SizingMode::Reuse { future_size: 3 },
        0.01,
    )
    .unwrap();

    let mut first = Vec::new();
    sizing.write_weights(&mut first).expect("write should succeed");
    let mut second = Vec::new();
    sizing.write_weights(&mut second).expect("write should succeed");

    assert_eq!(first, second);
    let text = String::from_utf8(first).unwrap();
    assert!(text.starts_with("symbol,weight\n"));
    assert!(text.contains("600000.SH,0.75\n"));
    assert!(text.contains("000001.SZ,0.25\n"));
}

#[test]
fn zero_notional_fails() {
    let row = PriceRow {
        date: d("2023-06-14"),
        future: 4000.0,
        stocks: vec![0.0, 0.0, 0.0],
    };
    let err = size_positions(&hedge(), &stock_columns(), &row, 1, SizingMode::Reuse { future_size: 3 }, 0.01)
        .unwrap_err();
    assert!(matches!(err, PipelineError::ModelFitFailure { .. }));
}
