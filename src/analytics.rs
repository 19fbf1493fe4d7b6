//! Performance statistics and terminal reporting.

use crate::engine::AllocationResult;
use crate::types::StrategyReturns;
use colored::Colorize;
use serde::{Deserialize, Serialize};

/// Summary statistics of a strategy return series.
///
/// Returns and drawdowns are fractions (0.05 = 5%).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    // Returns
    pub total_return: f64,
    pub annual_return: f64,

    // Risk
    pub annual_volatility: f64,
    pub max_drawdown: f64,
    pub ulcer_index: f64,

    // Risk-adjusted
    pub sharpe_ratio: f64,
    pub calmar_ratio: f64,
    pub ulcer_performance_index: f64,

    /// Number of returns the statistics cover.
    pub periods: usize,
    pub periods_per_year: f64,
}

impl PerformanceMetrics {
    /// Calculate metrics from per-period returns.
    ///
    /// Ratios whose denominator is zero are reported as 0.
    pub fn from_returns(returns: &[f64], periods_per_year: f64) -> Self {
        let periods = returns.len();
        if periods == 0 {
            return Self::empty(periods_per_year);
        }

        let growth: f64 = returns.iter().map(|r| 1.0 + r).product();
        let total_return = growth - 1.0;
        let annual_return = if growth > 0.0 {
            growth.powf(periods_per_year / periods as f64) - 1.0
        } else {
            -1.0
        };

        let annual_volatility = Self::sample_std(returns) * periods_per_year.sqrt();
        let drawdowns = Self::drawdowns(returns);
        let max_drawdown = drawdowns.iter().cloned().fold(0.0_f64, f64::max);
        let ulcer_index =
            (drawdowns.iter().map(|d| d * d).sum::<f64>() / drawdowns.len() as f64).sqrt();

        Self {
            total_return,
            annual_return,
            annual_volatility,
            max_drawdown,
            ulcer_index,
            sharpe_ratio: ratio(annual_return, annual_volatility),
            calmar_ratio: ratio(annual_return, max_drawdown.abs()),
            ulcer_performance_index: ratio(annual_return, ulcer_index),
            periods,
            periods_per_year,
        }
    }

    /// Metrics over the invested span of a simulation.
    pub fn from_strategy(returns: &StrategyReturns, periods_per_year: f64) -> Self {
        Self::from_returns(returns.active_returns(), periods_per_year)
    }

    fn empty(periods_per_year: f64) -> Self {
        Self {
            total_return: 0.0,
            annual_return: 0.0,
            annual_volatility: 0.0,
            max_drawdown: 0.0,
            ulcer_index: 0.0,
            sharpe_ratio: 0.0,
            calmar_ratio: 0.0,
            ulcer_performance_index: 0.0,
            periods: 0,
            periods_per_year,
        }
    }

    fn sample_std(returns: &[f64]) -> f64 {
        if returns.len() < 2 {
            return 0.0;
        }
        let mean = returns.iter().sum::<f64>() / returns.len() as f64;
        let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>()
            / (returns.len() - 1) as f64;
        variance.sqrt()
    }

    /// Drawdown from the running peak after each return, starting from a
    /// peak of 1.0.
    fn drawdowns(returns: &[f64]) -> Vec<f64> {
        let mut equity = 1.0_f64;
        let mut peak = 1.0_f64;
        returns
            .iter()
            .map(|r| {
                equity *= 1.0 + r;
                peak = peak.max(equity);
                1.0 - equity / peak
            })
            .collect()
    }
}

fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 || !denominator.is_finite() {
        0.0
    } else {
        numerator / denominator
    }
}

/// Format results for terminal display.
pub struct ResultFormatter;

impl ResultFormatter {
    /// Print a full allocation report to stdout.
    pub fn print_report(result: &AllocationResult) {
        println!();
        println!("{}", "═".repeat(60).blue());
        println!("{}", " ALLOCATION RESULTS ".bold().blue());
        println!("{}", "═".repeat(60).blue());
        println!();

        println!("{}", "Overview".bold().underline());
        println!("  Assets:          {}", result.weights.assets().join(", "));
        if let (Some(first), Some(last)) =
            (result.weights.entries().first(), result.weights.entries().last())
        {
            println!(
                "  Rebalances:      {} ({} to {})",
                result.weights.len(),
                first.timestamp.format("%Y-%m-%d"),
                last.timestamp.format("%Y-%m-%d")
            );
        } else {
            println!("  Rebalances:      0");
        }
        println!("  Avg Turnover:    {:>12.2}%", result.average_turnover * 100.0);
        println!();

        if let Some(metrics) = &result.metrics {
            Self::print_metrics(metrics);
        }

        Self::print_latest_weights(result);

        println!("{}", "═".repeat(60).blue());
    }

    fn print_metrics(metrics: &PerformanceMetrics) {
        println!("{}", "Performance".bold().underline());
        println!("  Total Return:    {:>12.2}%", metrics.total_return * 100.0);
        let annual = format!("{:>12.2}%", metrics.annual_return * 100.0);
        if metrics.annual_return >= 0.0 {
            println!("  Annual Return:   {}", annual.green());
        } else {
            println!("  Annual Return:   {}", annual.red());
        }
        println!();

        println!("{}", "Risk Metrics".bold().underline());
        println!("  Volatility:      {:>12.2}%", metrics.annual_volatility * 100.0);
        println!("  Max Drawdown:    {:>12.2}%", -metrics.max_drawdown * 100.0);
        println!("  Ulcer Index:     {:>12.4}", metrics.ulcer_index);
        println!("  Sharpe Ratio:    {:>12.2}", metrics.sharpe_ratio);
        println!("  Calmar Ratio:    {:>12.2}", metrics.calmar_ratio);
        println!("  Ulcer Perf.:     {:>12.2}", metrics.ulcer_performance_index);
        println!();
    }

    fn print_latest_weights(result: &AllocationResult) {
        let Some(latest) = result.weights.entries().last() else {
            return;
        };

        println!(
            "{}",
            format!("Latest Weights ({})", latest.timestamp.format("%Y-%m-%d"))
                .bold()
                .underline()
        );
        for (asset, w) in result
            .weights
            .assets()
            .iter()
            .zip(latest.weights.as_slice().iter())
        {
            if *w != 0.0 {
                println!("  {:<16} {:>12.2}%", asset, w * 100.0);
            }
        }
        let cash = latest.weights.cash();
        if cash > 1e-9 {
            println!("  {:<16} {:>12.2}%", "(cash)".dimmed(), cash * 100.0);
        }
        println!();
    }
}
