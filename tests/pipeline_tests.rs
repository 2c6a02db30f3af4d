use std::fs;

use spread_signal::error::{PipelineError, Stage};
use spread_signal::model::SignalState;
use spread_signal::pipeline::{run, RunKind, RunRequest};
use spread_signal::signal_machine::{evaluate, SignalInputs};
use spread_signal::store::{RunCommit, StateStore};

mod common;
use common::{d, ScriptedGateway, STOCK_B};

const DATA_END: &str = "2023-07-03";

fn first_request() -> RunRequest {
    RunRequest {
        date: d("2023-06-14"),
        initial_capital: Some((1_000_000.0, 0.15)),
    }
}

fn next_request(date: &str) -> RunRequest {
    RunRequest {
        date: d(date),
        initial_capital: None,
    }
}

#[tokio::test]
/// Verifies a first-ever run end to end: it starts flat, sizes the future from
/// capital, writes every artifact and commits the run state, hedge and signal.
async fn first_run_initializes_state() {
    let root = common::temp_dir("pipeline-first");
    let config = common::test_config("000300.SH", &root);
    let gateway = ScriptedGateway::paired(d(DATA_END), 280, 21);
    let mut store = StateStore::open_in_memory().expect("open should succeed");

    let report = run(&config, &gateway, &mut store, &first_request())
        .await
        .expect("first run should succeed");

    assert_eq!(report.kind, RunKind::Initialization);
    assert_eq!(report.date, d("2023-06-14"));
    assert_eq!(report.signal.date, d("2023-06-14"));
    assert_eq!(report.signal.previous, SignalState::Flat);
    assert_eq!(report.hedge.fitted_on, d("2023-06-14"));
    assert!(report.hedge.active_count() >= 1);
    assert!(report.sizing.future_size > 0);
    assert!(report.validation.is_some());

    let state = store
        .load_run_state()
        .unwrap()
        .expect("run state should be committed");
    assert_eq!(state.initialized_on, d("2023-06-14"));
    assert_eq!(state.last_run_date, d("2023-06-14"));
    assert_eq!(state.last_run_id, report.run_id);
    assert_eq!(state.future_size, report.sizing.future_size);
    assert!((state.margin_ratio - 0.15).abs() < f64::EPSILON);
    assert_eq!(store.load_hedge_vector().unwrap(), Some(report.hedge.clone()));
    let positions = store.load_signal_positions().unwrap().unwrap();
    assert_eq!(
        SignalState::from_positions(positions.portfolio_position, positions.future_position)
            .unwrap(),
        report.signal.state
    );

    for name in [
        "lasso_coef.csv",
        "ar_params.csv",
        "garch_params.csv",
        "validation.csv",
        "signal.csv",
        "port_weights.csv",
    ] {
        assert!(report.output_dir.join(name).exists(), "{} missing", name);
    }
    let size_text = fs::read_to_string(report.output_dir.join("future_size.txt")).unwrap();
    assert_eq!(size_text, report.sizing.future_size_text());
    assert!(size_text.starts_with('-'));
    for name in ["futures.csv", "close.csv", "adj_factors.csv", "adj_close.csv", "merged.csv"] {
        assert!(root.join("data").join("2023-06-14").join(name).exists(), "{} missing", name);
    }

    let _ = fs::remove_dir_all(&root);
}

#[tokio::test]
/// Verifies a later non-rebalance day reuses the stored hedge and future size
/// and chains the signal from the previous run.
async fn later_run_reuses_hedge_and_size() {
    let root = common::temp_dir("pipeline-reuse");
    let config = common::test_config("000300.SH", &root);
    let gateway = ScriptedGateway::paired(d(DATA_END), 280, 21);
    let mut store = StateStore::open_in_memory().unwrap();

    let first = run(&config, &gateway, &mut store, &first_request())
        .await
        .expect("first run should succeed");
    let second = run(&config, &gateway, &mut store, &next_request("2023-06-15"))
        .await
        .expect("second run should succeed");

    assert_eq!(second.kind, RunKind::Reuse);
    assert_eq!(second.hedge, first.hedge);
    assert_eq!(second.sizing.future_size, first.sizing.future_size);
    assert_eq!(second.signal.previous, first.signal.state);
    assert!(!second.output_dir.join("lasso_coef.csv").exists());

    let state = store.load_run_state().unwrap().unwrap();
    assert_eq!(state.initialized_on, d("2023-06-14"));
    assert_eq!(state.last_run_date, d("2023-06-15"));
    assert_eq!(state.last_run_id, second.run_id);

    let _ = fs::remove_dir_all(&root);
}

#[tokio::test]
async fn first_business_day_refits_hedge() {
    let root = common::temp_dir("pipeline-rebalance");
    let config = common::test_config("000300.SH", &root);
    let gateway = ScriptedGateway::paired(d(DATA_END), 280, 21);
    let mut store = StateStore::open_in_memory().unwrap();

    let first = run(&config, &gateway, &mut store, &first_request())
        .await
        .expect("first run should succeed");
    let rebalance = run(&config, &gateway, &mut store, &next_request("2023-07-03"))
        .await
        .expect("rebalance run should succeed");

    assert_eq!(rebalance.kind, RunKind::Rebalance);
    assert_eq!(rebalance.hedge.fitted_on, d("2023-07-03"));
    assert_eq!(rebalance.sizing.future_size, first.sizing.future_size);
    assert!(rebalance.output_dir.join("lasso_coef.csv").exists());
    assert_eq!(
        store.load_hedge_vector().unwrap().unwrap().fitted_on,
        d("2023-07-03")
    );

    let _ = fs::remove_dir_all(&root);
}

#[tokio::test]
/// Verifies an unsupported stock pool fails at the configuration stage before
/// any market data request is made.
async fn unsupported_stock_pool_fails_before_any_request() {
    let root = common::temp_dir("pipeline-pool");
    let config = common::test_config("999999.XX", &root);
    let gateway = ScriptedGateway::paired(d(DATA_END), 280, 21);
    let mut store = StateStore::open_in_memory().unwrap();

    let err = run(&config, &gateway, &mut store, &first_request())
        .await
        .unwrap_err();
    assert_eq!(err.stage, Stage::Configuration);
    assert!(matches!(err.error, PipelineError::Configuration(_)));
    assert_eq!(gateway.calls(), 0);
    assert!(store.load_run_state().unwrap().is_none());
}

#[tokio::test]
async fn first_run_without_capital_is_rejected() {
    let root = common::temp_dir("pipeline-capital");
    let config = common::test_config("000300.SH", &root);
    let gateway = ScriptedGateway::paired(d(DATA_END), 280, 21);
    let mut store = StateStore::open_in_memory().unwrap();

    let err = run(&config, &gateway, &mut store, &next_request("2023-06-14"))
        .await
        .unwrap_err();
    assert_eq!(err.stage, Stage::Planning);
    assert!(matches!(err.error, PipelineError::CapitalUnspecified(_)));
    assert_eq!(gateway.calls(), 0);
}

#[tokio::test]
/// Verifies a non-rebalance run with run state but no stored hedge stops at
/// planning with HedgeVectorMissing.
async fn reuse_without_stored_hedge_is_rejected() {
    let root = common::temp_dir("pipeline-nohedge");
    let config = common::test_config("000300.SH", &root);
    let gateway = ScriptedGateway::paired(d(DATA_END), 280, 21);
    let mut store = StateStore::open_in_memory().unwrap();

    let signal = evaluate(
        None,
        &SignalInputs {
            date: d("2023-06-14"),
            future_value: 100.0,
            portfolio_value: 101.0,
            equilibrium: 1.0,
            volatility: 0.1,
        },
        1.0,
    )
    .unwrap();
    store
        .commit_run(&RunCommit {
            run_id: "seed",
            run_date: d("2023-06-14"),
            initialized_on: d("2023-06-14"),
            capital: 1_000_000.0,
            margin_ratio: 0.15,
            future_size: 5,
            hedge: None,
            signal: &signal,
        })
        .unwrap();

    let err = run(&config, &gateway, &mut store, &next_request("2023-06-15"))
        .await
        .unwrap_err();
    assert_eq!(err.stage, Stage::Planning);
    assert!(matches!(err.error, PipelineError::HedgeVectorMissing));
    assert_eq!(gateway.calls(), 0);
}

#[tokio::test]
/// Verifies a failed run leaves the stored state exactly as the last
/// successful run committed it.
async fn failed_run_leaves_state_untouched() {
    let root = common::temp_dir("pipeline-failure");
    let config = common::test_config("000300.SH", &root);
    let gateway = ScriptedGateway::paired(d(DATA_END), 280, 21);
    let mut store = StateStore::open_in_memory().unwrap();

    run(&config, &gateway, &mut store, &first_request())
        .await
        .expect("first run should succeed");
    let state_before = store.load_run_state().unwrap();
    let hedge_before = store.load_hedge_vector().unwrap();
    let positions_before = store.load_signal_positions().unwrap();

    let mut failing = ScriptedGateway::paired(d(DATA_END), 280, 21);
    failing.failing_symbol = Some(STOCK_B.to_string());
    let err = run(&config, &failing, &mut store, &next_request("2023-06-15"))
        .await
        .unwrap_err();
    assert_eq!(err.stage, Stage::MarketData);
    assert!(matches!(err.error, PipelineError::DataUnavailable(_)));

    assert_eq!(store.load_run_state().unwrap(), state_before);
    assert_eq!(store.load_hedge_vector().unwrap(), hedge_before);
    assert_eq!(store.load_signal_positions().unwrap(), positions_before);

    let _ = fs::remove_dir_all(&root);
}
