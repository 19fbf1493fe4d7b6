//! Integration tests for the allocation engine.

use chrono::{DateTime, Duration, TimeZone, Utc};
use std::io::Write;
use taa::config::AllocationFileConfig;
use taa::data::{load_returns_csv, DataConfig};
use taa::engine::{AllocationConfig, AllocationEngine, RunMode};
use taa::error::AllocError;
use taa::lookback::LookbackWeights;
use taa::momentum::MomentumEngine;
use taa::risk::RiskEstimator;
use taa::types::ReturnMatrix;
use taa::weighting::{WeightingEngine, WeightingPolicy};
use tempfile::{NamedTempFile, TempDir};

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap()
}

/// One row per calendar day from 2020-01-01; `f(day, asset)` gives the return.
fn daily_matrix(assets: &[&str], days: usize, f: impl Fn(usize, usize) -> f64) -> ReturnMatrix {
    ReturnMatrix::new(
        assets.iter().map(|s| s.to_string()).collect(),
        (0..days).map(|d| start() + Duration::days(d as i64)).collect(),
        (0..days)
            .map(|d| (0..assets.len()).map(|a| f(d, a)).collect())
            .collect(),
    )
    .unwrap()
}

/// Deterministic noisy returns with an asset-specific drift.
fn noisy(day: usize, asset: usize) -> f64 {
    let x = day as f64;
    let a = asset as f64;
    0.0005 * (a + 1.0) + 0.01 * (x * 0.7 + a * 1.3).sin() + 0.004 * (x * 1.9 + a).cos()
}

fn config(lookback: usize) -> AllocationConfig {
    AllocationConfig::new(
        MomentumEngine::new(LookbackWeights::single(lookback).unwrap(), 0.0).unwrap(),
        RiskEstimator::new(
            LookbackWeights::single(lookback).unwrap(),
            LookbackWeights::single(lookback).unwrap(),
        )
        .unwrap(),
    )
}

#[test]
fn test_two_asset_equal_weight_scenario() {
    // January and February: [0.01, -0.01]; March: [0.02, 0.02]
    let m = daily_matrix(&["A", "B"], 91, |d, a| match (d < 60, a) {
        (true, 0) => 0.01,
        (true, _) => -0.01,
        (false, _) => 0.02,
    });

    let engine = AllocationEngine::new(
        config(5)
            .with_selection(f64::NEG_INFINITY, 2)
            .with_weighting(WeightingEngine::new(WeightingPolicy::EqualWeight))
            .with_window_periods(1),
    )
    .unwrap();
    let result = engine.run(&m, None, RunMode::Full).unwrap();

    assert_eq!(result.weights.len(), 2);
    for entry in result.weights.entries() {
        assert_eq!(entry.weights.as_slice(), &[0.5, 0.5]);
    }

    let returns = result.returns.unwrap();
    assert_eq!(returns.start_row, 60);
    assert!(returns.returns[..60].iter().all(|&r| r == 0.0));
    for &r in &returns.returns[60..] {
        assert!((r - 0.02).abs() < 1e-12);
    }
    assert!((returns.final_equity() - 1.02_f64.powi(31)).abs() < 1e-9);

    let metrics = result.metrics.unwrap();
    assert_eq!(metrics.periods, 31);
    assert_eq!(metrics.max_drawdown, 0.0);
}

#[test]
fn test_single_asset_below_threshold_stays_in_cash() {
    let m = daily_matrix(&["A"], 120, |_, _| -0.01);
    let engine = AllocationEngine::new(config(10).with_window_periods(1)).unwrap();
    let result = engine.run(&m, None, RunMode::Full).unwrap();

    assert!(!result.weights.is_empty());
    for entry in result.weights.entries() {
        assert!(entry.selected.is_empty());
        assert!(entry.weights.is_cash());
    }

    let returns = result.returns.unwrap();
    assert!(returns.returns.iter().all(|&r| r == 0.0));
    assert_eq!(returns.final_equity(), 1.0);
    assert_eq!(result.metrics.unwrap().total_return, 0.0);
}

#[test]
fn test_canary_all_positive_applies_leverage() {
    let primary = daily_matrix(&["SPY", "EFA", "IEF"], 200, noisy);
    let canary = daily_matrix(&["VWO", "BND"], 200, |_, _| 0.001);

    let base = config(21)
        .with_selection(f64::NEG_INFINITY, 2)
        .with_window_periods(2);
    let plain = AllocationEngine::new(base.clone())
        .unwrap()
        .run(&primary, None, RunMode::WeightsOnly)
        .unwrap();
    let levered = AllocationEngine::new(base.with_crash_asset("IEF").with_leverage(1.5))
        .unwrap()
        .run(&primary, Some(&canary), RunMode::WeightsOnly)
        .unwrap();

    assert_eq!(plain.weights.len(), levered.weights.len());
    for (p, l) in plain
        .weights
        .entries()
        .iter()
        .zip(levered.weights.entries())
    {
        assert_eq!(l.aggressive_fraction, 1.0);
        for (wp, wl) in p.weights.as_slice().iter().zip(l.weights.as_slice()) {
            assert!((wp * 1.5 - wl).abs() < 1e-12);
        }
        assert!((l.weights.sum() - 1.5).abs() < 1e-9);
    }
}

#[test]
fn test_canary_all_negative_moves_to_crash_asset() {
    // IEF trends up so it clears the threshold
    let primary = daily_matrix(&["SPY", "IEF"], 200, |d, a| {
        if a == 1 {
            0.001
        } else {
            noisy(d, a)
        }
    });
    let canary = daily_matrix(&["VWO", "BND"], 200, |_, _| -0.001);

    let engine = AllocationEngine::new(
        config(21)
            .with_selection(f64::NEG_INFINITY, 1)
            .with_window_periods(2)
            .with_crash_asset("IEF"),
    )
    .unwrap();
    let result = engine.run(&primary, Some(&canary), RunMode::Full).unwrap();

    for entry in result.weights.entries() {
        assert_eq!(entry.aggressive_fraction, 0.0);
        assert_eq!(entry.weights.get(0), 0.0);
        assert!((entry.weights.get(1) - 1.0).abs() < 1e-12);
    }
}

#[test]
fn test_canary_split_blends_allocation() {
    let primary = daily_matrix(&["SPY", "IEF"], 200, |_, a| if a == 0 { 0.002 } else { -0.001 });
    let canary = daily_matrix(&["VWO", "BND"], 200, |_, a| if a == 0 { 0.001 } else { -0.001 });

    let engine = AllocationEngine::new(
        config(21)
            .with_selection(0.0, 1)
            .with_window_periods(2)
            .with_crash_asset("IEF"),
    )
    .unwrap();
    let result = engine.run(&primary, Some(&canary), RunMode::WeightsOnly).unwrap();

    for entry in result.weights.entries() {
        assert_eq!(entry.aggressive_fraction, 0.5);
        // IEF is below the threshold, so the residual stays in cash
        assert_eq!(entry.weights.as_slice(), &[0.5, 0.0]);
    }
}

#[test]
fn test_canary_aligned_to_common_dates() {
    let primary = daily_matrix(&["SPY", "IEF"], 200, noisy);
    // Canary starts ten days later
    let canary = ReturnMatrix::new(
        vec!["VWO".to_string()],
        (10..200).map(|d| start() + Duration::days(d)).collect(),
        (10..200).map(|_| vec![0.001]).collect(),
    )
    .unwrap();

    let engine = AllocationEngine::new(config(21).with_window_periods(2)).unwrap();
    let result = engine.run(&primary, Some(&canary), RunMode::Full).unwrap();
    let returns = result.returns.unwrap();
    assert_eq!(returns.returns.len(), 190);
    assert_eq!(returns.timestamps[0], start() + Duration::days(10));
}

#[test]
fn test_minimum_variance_run_is_fully_invested() {
    let m = daily_matrix(&["A", "B", "C", "D"], 240, noisy);
    let engine = AllocationEngine::new(
        config(42)
            .with_selection(f64::NEG_INFINITY, 3)
            .with_weighting(WeightingEngine::new(WeightingPolicy::MinimumVariance))
            .with_window_periods(2),
    )
    .unwrap();
    let result = engine.run(&m, None, RunMode::Full).unwrap();

    assert!(!result.weights.is_empty());
    for entry in result.weights.entries() {
        assert_eq!(entry.selected.len(), 3);
        assert!((entry.weights.sum() - 1.0).abs() < 1e-9);
        assert!(entry.weights.as_slice().iter().all(|&w| w >= 0.0));
        for (i, &w) in entry.weights.as_slice().iter().enumerate() {
            if !entry.selected.contains(&i) {
                assert_eq!(w, 0.0);
            }
        }
    }
    assert!(result.metrics.unwrap().annual_volatility > 0.0);
}

#[test]
fn test_offset_moves_rebalance_rows() {
    let m = daily_matrix(&["A", "B"], 120, noisy);
    let base = config(10).with_window_periods(1);

    let natural = AllocationEngine::new(base.clone())
        .unwrap()
        .run(&m, None, RunMode::WeightsOnly)
        .unwrap();
    let early = AllocationEngine::new(base.with_rebalance(Default::default(), -5))
        .unwrap()
        .run(&m, None, RunMode::WeightsOnly)
        .unwrap();

    assert_eq!(natural.weights.entries()[0].rebalance_row, 60);
    assert_eq!(early.weights.entries()[0].rebalance_row, 55);
}

#[test]
fn test_insufficient_history_is_schedule_error() {
    // Default window is twelve months; 200 days cannot provide it
    let m = daily_matrix(&["A", "B"], 200, noisy);
    let engine = AllocationEngine::new(config(21)).unwrap();
    let err = engine.run(&m, None, RunMode::Full).unwrap_err();
    assert!(matches!(err, AllocError::InvalidSchedule(_)));
}

#[test]
fn test_independent_runs_on_threads() {
    let m1 = daily_matrix(&["A", "B", "C"], 200, noisy);
    let m2 = daily_matrix(&["A", "B", "C"], 200, |d, a| noisy(d + 7, a));
    let engine = AllocationEngine::new(
        config(21)
            .with_weighting(WeightingEngine::new(WeightingPolicy::InverseVolatility))
            .with_window_periods(2),
    )
    .unwrap();

    let (r1, r2) = std::thread::scope(|s| {
        let h1 = s.spawn(|| engine.run(&m1, None, RunMode::Full));
        let h2 = s.spawn(|| engine.run(&m2, None, RunMode::Full));
        (h1.join().unwrap().unwrap(), h2.join().unwrap().unwrap())
    });

    let s1 = engine.run(&m1, None, RunMode::Full).unwrap();
    let s2 = engine.run(&m2, None, RunMode::Full).unwrap();
    assert_eq!(r1.weights, s1.weights);
    assert_eq!(r2.weights, s2.weights);
}

#[test]
fn test_run_from_config_files() {
    let dir = TempDir::new().unwrap();
    let returns_path = dir.path().join("returns.csv");
    let canary_path = dir.path().join("canary.csv");

    let mut returns_csv = String::from("date,SPY,EFA,IEF\n");
    let mut canary_csv = String::from("date,VWO\n");
    for d in 0..200 {
        let date = (start() + Duration::days(d as i64)).format("%Y-%m-%d");
        returns_csv.push_str(&format!(
            "{},{},{},{}\n",
            date,
            noisy(d, 0),
            noisy(d, 1),
            noisy(d, 2)
        ));
        canary_csv.push_str(&format!("{},{}\n", date, noisy(d, 3)));
    }
    std::fs::write(&returns_path, returns_csv).unwrap();
    std::fs::write(&canary_path, canary_csv).unwrap();

    let toml = format!(
        r#"
[data]
returns = "{}"
canary = "{}"

[momentum]
lookbacks = [5, 21]
weights = [2.0, 1.0]
penalty = 0.5

[volatility]
lookbacks = [21]
weights = [1.0]

[correlation]
lookbacks = [21]
weights = [1.0]

[selection]
threshold = -1.0
top_n = 2

[weighting]
policy = "invVar"

[rebalance]
unit = "months"
window_periods = 2

[crash_protection]
asset = "IEF"
"#,
        returns_path.display(),
        canary_path.display()
    );
    let mut config_file = NamedTempFile::new().unwrap();
    writeln!(config_file, "{}", toml).unwrap();

    let file_config = AllocationFileConfig::load(config_file.path()).unwrap();
    let engine = AllocationEngine::new(file_config.to_allocation_config().unwrap()).unwrap();
    let returns = load_returns_csv(
        file_config.data.returns.as_ref().unwrap(),
        &DataConfig::default(),
    )
    .unwrap();
    let canary = load_returns_csv(
        file_config.data.canary.as_ref().unwrap(),
        &DataConfig::default(),
    )
    .unwrap();

    let result = engine.run(&returns, Some(&canary), RunMode::Full).unwrap();
    assert_eq!(result.weights.assets().len(), 3);
    assert!(result.metrics.is_some());
    for entry in result.weights.entries() {
        assert!(entry.weights.sum() <= 1.0 + 1e-9);
    }

    let json = serde_json::to_string(&result).unwrap();
    assert!(json.contains("aggressive_fraction"));
}
