//! Allocation engine: runs the rebalance loop and the simulation.

use crate::analytics::PerformanceMetrics;
use crate::error::{AllocError, Result};
use crate::momentum::MomentumEngine;
use crate::overlay::CrashProtection;
use crate::risk::RiskEstimator;
use crate::schedule::{RebalanceSchedule, RebalanceUnit};
use crate::selection::select_assets;
use crate::simulator::simulate;
use crate::types::{ReturnMatrix, StrategyReturns, WeightEntry, WeightHistory, WeightVector};
use crate::weighting::WeightingEngine;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use tracing::{debug, info, warn};

/// Validated configuration for an allocation run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AllocationConfig {
    /// Momentum scoring of the primary universe.
    pub momentum: MomentumEngine,
    /// Volatility and correlation estimation.
    pub risk: RiskEstimator,
    /// Minimum momentum (exclusive) for an asset to be held.
    pub threshold: f64,
    /// Maximum number of assets held.
    pub top_n: usize,
    /// Weighting policy for the selected assets.
    pub weighting: WeightingEngine,
    pub unit: RebalanceUnit,
    /// Row offset applied to the natural period ends.
    pub offset: i64,
    /// Schedule periods per data window (defaults to one year of periods).
    pub window_periods: Option<usize>,
    /// Defensive asset receiving the crash-protection residual.
    pub crash_asset: Option<String>,
    /// Leverage applied when the canary universe is fully risk-on.
    pub leverage: f64,
    /// Return rows per year, for annualizing statistics.
    pub periods_per_year: f64,
}

impl AllocationConfig {
    /// Configuration with default selection, weighting and schedule settings.
    pub fn new(momentum: MomentumEngine, risk: RiskEstimator) -> Self {
        Self {
            momentum,
            risk,
            threshold: 0.0,
            top_n: 3,
            weighting: WeightingEngine::default(),
            unit: RebalanceUnit::default(),
            offset: 0,
            window_periods: None,
            crash_asset: None,
            leverage: 1.0,
            periods_per_year: 252.0,
        }
    }

    pub fn with_selection(mut self, threshold: f64, top_n: usize) -> Self {
        self.threshold = threshold;
        self.top_n = top_n;
        self
    }

    pub fn with_weighting(mut self, weighting: WeightingEngine) -> Self {
        self.weighting = weighting;
        self
    }

    pub fn with_rebalance(mut self, unit: RebalanceUnit, offset: i64) -> Self {
        self.unit = unit;
        self.offset = offset;
        self
    }

    pub fn with_window_periods(mut self, periods: usize) -> Self {
        self.window_periods = Some(periods);
        self
    }

    pub fn with_crash_asset(mut self, asset: impl Into<String>) -> Self {
        self.crash_asset = Some(asset.into());
        self
    }

    pub fn with_leverage(mut self, leverage: f64) -> Self {
        self.leverage = leverage;
        self
    }

    pub fn with_periods_per_year(mut self, periods_per_year: f64) -> Self {
        self.periods_per_year = periods_per_year;
        self
    }

    /// Schedule periods that make up one data window.
    pub fn effective_window_periods(&self) -> usize {
        self.window_periods
            .unwrap_or_else(|| self.unit.periods_per_year())
    }

    /// Longest lookback used by any estimator.
    pub fn max_lookback(&self) -> usize {
        self.momentum
            .lookbacks()
            .max_lookback()
            .max(self.risk.max_lookback())
    }

    fn validate(&self) -> Result<()> {
        if self.top_n == 0 {
            return Err(AllocError::ConfigError(
                "top_n must be at least 1".to_string(),
            ));
        }
        if self.threshold.is_nan() {
            return Err(AllocError::ConfigError(
                "Selection threshold must not be NaN".to_string(),
            ));
        }
        if !self.leverage.is_finite() || self.leverage < 1.0 {
            return Err(AllocError::ConfigError(format!(
                "Leverage must be a finite value of at least 1.0, got {}",
                self.leverage
            )));
        }
        if !self.periods_per_year.is_finite() || self.periods_per_year <= 0.0 {
            return Err(AllocError::ConfigError(format!(
                "periods_per_year must be positive, got {}",
                self.periods_per_year
            )));
        }
        if self.window_periods == Some(0) {
            return Err(AllocError::ConfigError(
                "window_periods must be at least 1".to_string(),
            ));
        }
        if let Some(asset) = &self.crash_asset {
            if asset.trim().is_empty() {
                return Err(AllocError::ConfigError(
                    "Crash asset name must not be empty".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Whether a run compounds returns or stops after computing weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    #[default]
    Full,
    WeightsOnly,
}

/// Output of an allocation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocationResult {
    /// Rebalance points used.
    pub schedule: RebalanceSchedule,
    /// Weights chosen at every rebalance.
    pub weights: WeightHistory,
    /// Mean one-way turnover per rebalance after the first.
    pub average_turnover: f64,
    /// Simulated returns (`None` in weights-only mode).
    pub returns: Option<StrategyReturns>,
    /// Statistics over the invested span (`None` in weights-only mode).
    pub metrics: Option<PerformanceMetrics>,
}

/// Runs the momentum allocation strategy over a return matrix.
///
/// The engine holds only configuration; every run borrows its inputs, so a
/// single engine can serve concurrent runs from several threads.
#[derive(Debug, Clone)]
pub struct AllocationEngine {
    config: AllocationConfig,
}

impl AllocationEngine {
    /// Create an engine, rejecting invalid configuration up front.
    pub fn new(config: AllocationConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &AllocationConfig {
        &self.config
    }

    /// Run the strategy on `returns`, optionally guarded by a canary universe.
    ///
    /// The two matrices are aligned on their common timestamps first. Any
    /// failure aborts the whole run.
    pub fn run(
        &self,
        returns: &ReturnMatrix,
        canary: Option<&ReturnMatrix>,
        mode: RunMode,
    ) -> Result<AllocationResult> {
        let (returns, canary): (Cow<'_, ReturnMatrix>, Option<Cow<'_, ReturnMatrix>>) =
            match canary {
                Some(c) => {
                    let (r, c) = returns.intersect(c)?;
                    (r, Some(c))
                }
                None => (Cow::Borrowed(returns), None),
            };

        let overlay = match &canary {
            Some(_) => Some(self.build_overlay(&returns)?),
            None => {
                if self.config.crash_asset.is_some() || self.config.leverage != 1.0 {
                    warn!("No canary universe supplied; crash asset and leverage are ignored");
                }
                None
            }
        };

        let max_lookback = self.config.max_lookback();
        if returns.len() <= max_lookback {
            return Err(AllocError::InvalidSchedule(format!(
                "{} rows of data, need more than the longest lookback of {}",
                returns.len(),
                max_lookback
            )));
        }

        let window_periods = self.config.effective_window_periods();
        let schedule = RebalanceSchedule::generate(
            returns.timestamps(),
            self.config.unit,
            self.config.offset,
            window_periods,
        )?;

        info!(
            "Starting allocation: {} assets, {} rows, {} rebalance points ({} {}/window)",
            returns.num_assets(),
            returns.len(),
            schedule.len(),
            window_periods,
            self.config.unit
        );

        let weights = self.allocate(
            &returns,
            canary.as_deref(),
            overlay.as_ref(),
            &schedule,
            window_periods,
        )?;
        let average_turnover = weights.average_turnover();

        let (strategy_returns, metrics) = match mode {
            RunMode::WeightsOnly => (None, None),
            RunMode::Full => {
                let simulated = simulate(&returns, &weights)?;
                let metrics =
                    PerformanceMetrics::from_strategy(&simulated, self.config.periods_per_year);
                info!(
                    "Allocation complete: total return {:.2}%, max drawdown {:.2}%",
                    metrics.total_return * 100.0,
                    metrics.max_drawdown * 100.0
                );
                (Some(simulated), Some(metrics))
            }
        };

        Ok(AllocationResult {
            schedule,
            weights,
            average_turnover,
            returns: strategy_returns,
            metrics,
        })
    }

    fn build_overlay(&self, returns: &ReturnMatrix) -> Result<CrashProtection> {
        let crash_asset = match &self.config.crash_asset {
            Some(name) => Some(returns.asset_index(name).ok_or_else(|| {
                AllocError::ConfigError(format!(
                    "Crash asset '{}' is not a column of the return matrix",
                    name
                ))
            })?),
            None => None,
        };
        CrashProtection::new(
            self.config.momentum.lookbacks().clone(),
            crash_asset,
            self.config.leverage,
        )
    }

    /// Compute weights for every schedule point that has a full window
    /// behind it.
    fn allocate(
        &self,
        returns: &ReturnMatrix,
        canary: Option<&ReturnMatrix>,
        overlay: Option<&CrashProtection>,
        schedule: &RebalanceSchedule,
        window_periods: usize,
    ) -> Result<WeightHistory> {
        let n = returns.num_assets();
        let ends = schedule.indices();
        let mut history = WeightHistory::new(returns.assets().to_vec());
        let mut prior: Option<WeightVector> = None;

        for i in window_periods..ends.len() {
            let (from, to) = (ends[i - window_periods], ends[i]);
            let timestamp = returns.timestamps()[to - 1];
            let window = &returns.rows()[from..to];

            let scores = self.config.momentum.score(window, prior.as_ref());
            let selected = select_assets(&scores, self.config.threshold, self.config.top_n);

            let mut weights = match selected.len() {
                0 => WeightVector::zeros(n),
                1 => WeightVector::expand(n, &selected, &[1.0]),
                _ => {
                    let risk = self.config.risk.estimate(window, &selected);
                    let w = self.config.weighting.weights(&risk).map_err(|e| match e {
                        AllocError::OptimizationError(msg) => AllocError::OptimizationError(
                            format!("{} (rebalance {})", msg, timestamp.format("%Y-%m-%d")),
                        ),
                        other => other,
                    })?;
                    WeightVector::expand(n, &selected, &w)
                }
            };

            let mut fraction = 1.0;
            if let (Some(overlay), Some(canary)) = (overlay, canary) {
                fraction = overlay.aggressive_fraction(&canary.rows()[from..to]);
                overlay.apply(&mut weights, fraction, &scores, self.config.threshold);
            }

            debug!(
                "Rebalance {}: selected {:?}, aggressive {:.2}, invested {:.4}",
                timestamp.format("%Y-%m-%d"),
                selected
                    .iter()
                    .map(|&c| returns.assets()[c].as_str())
                    .collect::<Vec<_>>(),
                fraction,
                weights.sum()
            );

            history.push(WeightEntry {
                timestamp,
                rebalance_row: to,
                start_row: to,
                weights: weights.clone(),
                selected,
                aggressive_fraction: fraction,
            })?;
            prior = Some(weights);
        }

        Ok(history)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lookback::LookbackWeights;
    use chrono::{Duration, TimeZone, Utc};

    fn daily_matrix(assets: &[&str], days: usize, f: impl Fn(usize, usize) -> f64) -> ReturnMatrix {
        let start = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        ReturnMatrix::new(
            assets.iter().map(|s| s.to_string()).collect(),
            (0..days).map(|d| start + Duration::days(d as i64)).collect(),
            (0..days)
                .map(|d| (0..assets.len()).map(|a| f(d, a)).collect())
                .collect(),
        )
        .unwrap()
    }

    fn config() -> AllocationConfig {
        AllocationConfig::new(
            MomentumEngine::new(LookbackWeights::single(10).unwrap(), 0.0).unwrap(),
            RiskEstimator::new(
                LookbackWeights::single(10).unwrap(),
                LookbackWeights::single(10).unwrap(),
            )
            .unwrap(),
        )
        .with_window_periods(1)
    }

    #[test]
    fn test_engine_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<AllocationEngine>();
        assert_send_sync::<AllocationResult>();
    }

    #[test]
    fn test_invalid_config_rejected() {
        assert!(AllocationEngine::new(config().with_selection(0.0, 0)).is_err());
        assert!(AllocationEngine::new(config().with_leverage(0.9)).is_err());
        assert!(AllocationEngine::new(config().with_periods_per_year(0.0)).is_err());
        assert!(AllocationEngine::new(config().with_window_periods(0)).is_err());
    }

    #[test]
    fn test_too_few_rows() {
        let m = daily_matrix(&["A"], 8, |_, _| 0.01);
        let engine = AllocationEngine::new(config()).unwrap();
        let err = engine.run(&m, None, RunMode::Full).unwrap_err();
        assert!(matches!(err, AllocError::InvalidSchedule(_)));
    }

    #[test]
    fn test_unknown_crash_asset() {
        let m = daily_matrix(&["A", "B"], 91, |_, _| 0.01);
        let c = daily_matrix(&["C"], 91, |_, _| 0.01);
        let engine = AllocationEngine::new(config().with_crash_asset("BOND")).unwrap();
        let err = engine.run(&m, Some(&c), RunMode::Full).unwrap_err();
        assert!(matches!(err, AllocError::ConfigError(_)));
    }

    #[test]
    fn test_weights_only_skips_simulation() {
        let m = daily_matrix(&["A", "B"], 91, |d, a| {
            if a == 0 {
                0.01
            } else {
                -0.001 * (d % 3) as f64
            }
        });
        let engine = AllocationEngine::new(config().with_selection(0.0, 1)).unwrap();
        let result = engine.run(&m, None, RunMode::WeightsOnly).unwrap();
        assert!(result.returns.is_none());
        assert!(result.metrics.is_none());
        // Schedule [31, 60, 91]: entries at Feb and Mar month ends
        assert_eq!(result.weights.len(), 2);
        for entry in result.weights.entries() {
            assert_eq!(entry.weights.as_slice(), &[1.0, 0.0]);
            assert_eq!(entry.selected, vec![0]);
        }
    }

    #[test]
    fn test_entries_start_after_rebalance_row() {
        let m = daily_matrix(&["A"], 91, |_, _| 0.001);
        let engine = AllocationEngine::new(config()).unwrap();
        let result = engine.run(&m, None, RunMode::Full).unwrap();
        let first = &result.weights.entries()[0];
        assert_eq!(first.rebalance_row, 60);
        assert_eq!(first.start_row, 60);
        assert_eq!(first.timestamp, m.timestamps()[59]);

        let simulated = result.returns.unwrap();
        assert_eq!(simulated.start_row, 60);
        assert_eq!(simulated.returns[59], 0.0);
        assert!((simulated.returns[60] - 0.001).abs() < 1e-12);
    }
}
