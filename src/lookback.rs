//! Weighted multi-horizon lookback aggregation.
//!
//! Momentum, volatility and correlation are all estimated as a weighted blend
//! of the same statistic measured over several trailing windows. This module
//! owns that blend ([`LookbackWeights::aggregate`]) together with the three
//! statistics it is applied to.

use crate::error::{AllocError, Result};
use serde::Serialize;

/// Trading periods per year used to annualize volatility.
pub const TRADING_DAYS_PER_YEAR: f64 = 252.0;

/// Values that can be scaled and summed element-wise.
pub trait Accumulate: Sized {
    fn scale(&mut self, factor: f64);
    fn accumulate(&mut self, other: Self);
}

impl Accumulate for f64 {
    fn scale(&mut self, factor: f64) {
        *self *= factor;
    }

    fn accumulate(&mut self, other: Self) {
        *self += other;
    }
}

impl<T: Accumulate> Accumulate for Vec<T> {
    fn scale(&mut self, factor: f64) {
        for item in self.iter_mut() {
            item.scale(factor);
        }
    }

    fn accumulate(&mut self, other: Self) {
        for (item, add) in self.iter_mut().zip(other) {
            item.accumulate(add);
        }
    }
}

/// Paired lookback lengths and blend weights, normalized to sum to one.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LookbackWeights {
    pairs: Vec<(usize, f64)>,
}

impl LookbackWeights {
    /// Pair lookbacks with weights.
    ///
    /// Weights that do not sum to one are rescaled. Mismatched lengths, empty
    /// lists, zero-length lookbacks and negative or non-finite weights are
    /// configuration errors.
    pub fn new(lookbacks: &[usize], weights: &[f64]) -> Result<Self> {
        if lookbacks.len() != weights.len() {
            return Err(AllocError::ConfigError(format!(
                "{} lookbacks but {} weights",
                lookbacks.len(),
                weights.len()
            )));
        }
        if lookbacks.is_empty() {
            return Err(AllocError::ConfigError(
                "At least one lookback is required".to_string(),
            ));
        }
        if lookbacks.contains(&0) {
            return Err(AllocError::ConfigError(
                "Lookback lengths must be positive".to_string(),
            ));
        }
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(AllocError::ConfigError(format!(
                "Lookback weights must be finite and non-negative, got {:?}",
                weights
            )));
        }

        let total: f64 = weights.iter().sum();
        if total <= 0.0 {
            return Err(AllocError::ConfigError(
                "Lookback weights must not all be zero".to_string(),
            ));
        }

        Ok(Self {
            pairs: lookbacks
                .iter()
                .zip(weights.iter())
                .map(|(&l, &w)| (l, w / total))
                .collect(),
        })
    }

    /// Single lookback with full weight.
    pub fn single(lookback: usize) -> Result<Self> {
        Self::new(&[lookback], &[1.0])
    }

    /// Reject lookbacks shorter than `min` (sample statistics need two points).
    pub fn require_min_lookback(self, min: usize, what: &str) -> Result<Self> {
        if let Some(&(short, _)) = self.pairs.iter().find(|(l, _)| *l < min) {
            return Err(AllocError::ConfigError(format!(
                "{} lookback {} is shorter than the minimum of {}",
                what, short, min
            )));
        }
        Ok(self)
    }

    pub fn pairs(&self) -> &[(usize, f64)] {
        &self.pairs
    }

    /// Longest lookback length.
    pub fn max_lookback(&self) -> usize {
        self.pairs.iter().map(|(l, _)| *l).max().unwrap_or(0)
    }

    /// Weighted sum of `stat` over the trailing `lookback` rows of `window`
    /// for every configured lookback.
    ///
    /// A lookback longer than the window uses the whole window.
    pub fn aggregate<T, F>(&self, window: &[Vec<f64>], stat: F) -> T
    where
        T: Accumulate,
        F: Fn(&[Vec<f64>]) -> T,
    {
        let mut parts = self.pairs.iter().map(|&(lookback, weight)| {
            let mut value = stat(tail(window, lookback));
            value.scale(weight);
            value
        });

        // `new` guarantees at least one pair.
        let mut total = match parts.next() {
            Some(first) => first,
            None => stat(&[]),
        };
        for part in parts {
            total.accumulate(part);
        }
        total
    }
}

/// Last `n` rows of a window, or all of it when shorter.
pub fn tail(window: &[Vec<f64>], n: usize) -> &[Vec<f64>] {
    &window[window.len().saturating_sub(n)..]
}

/// Compounded return of each column over the rows: `Π(1 + r) - 1`.
pub fn cumulative_return(rows: &[Vec<f64>], columns: &[usize]) -> Vec<f64> {
    columns
        .iter()
        .map(|&c| rows.iter().fold(1.0, |acc, row| acc * (1.0 + row[c])) - 1.0)
        .collect()
}

fn column_mean(rows: &[Vec<f64>], c: usize) -> f64 {
    rows.iter().map(|row| row[c]).sum::<f64>() / rows.len() as f64
}

fn sample_std(rows: &[Vec<f64>], c: usize) -> f64 {
    if rows.len() < 2 {
        return 0.0;
    }
    let mean = column_mean(rows, c);
    let variance =
        rows.iter().map(|row| (row[c] - mean).powi(2)).sum::<f64>() / (rows.len() - 1) as f64;
    variance.sqrt()
}

/// Annualized sample standard deviation of each column.
pub fn annualized_volatility(rows: &[Vec<f64>], columns: &[usize]) -> Vec<f64> {
    columns
        .iter()
        .map(|&c| sample_std(rows, c) * TRADING_DAYS_PER_YEAR.sqrt())
        .collect()
}

/// Pearson correlation matrix of the columns.
///
/// The diagonal is 1. Pairs involving a constant column have no defined
/// correlation and are set to 0.
pub fn correlation_matrix(rows: &[Vec<f64>], columns: &[usize]) -> Vec<Vec<f64>> {
    let k = columns.len();
    let n = rows.len();
    let means: Vec<f64> = if n == 0 {
        vec![0.0; k]
    } else {
        columns.iter().map(|&c| column_mean(rows, c)).collect()
    };

    let mut corr = vec![vec![0.0; k]; k];
    for i in 0..k {
        corr[i][i] = 1.0;
        for j in (i + 1)..k {
            let (ci, cj) = (columns[i], columns[j]);
            let mut cov = 0.0;
            let mut var_i = 0.0;
            let mut var_j = 0.0;
            for row in rows {
                let di = row[ci] - means[i];
                let dj = row[cj] - means[j];
                cov += di * dj;
                var_i += di * di;
                var_j += dj * dj;
            }
            let denom = (var_i * var_j).sqrt();
            let rho = if denom > 0.0 {
                (cov / denom).clamp(-1.0, 1.0)
            } else {
                0.0
            };
            corr[i][j] = rho;
            corr[j][i] = rho;
        }
    }
    corr
}
