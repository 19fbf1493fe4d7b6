//! Core data types: return matrices, weight vectors and the weight history.

use crate::error::{AllocError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap, HashSet};

/// Point-in-time matrix of period returns, one row per timestamp and one
/// column per asset.
///
/// Returns are fractional (0.01 = 1%). Construction enforces strictly
/// increasing timestamps, a full rectangular shape, unique asset names and
/// finite values, so every consumer can index rows without further checks.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReturnMatrix {
    assets: Vec<String>,
    timestamps: Vec<DateTime<Utc>>,
    rows: Vec<Vec<f64>>,
}

impl ReturnMatrix {
    /// Build a matrix from column names, timestamps and row-major returns.
    pub fn new(
        assets: Vec<String>,
        timestamps: Vec<DateTime<Utc>>,
        rows: Vec<Vec<f64>>,
    ) -> Result<Self> {
        if assets.is_empty() {
            return Err(AllocError::DataError(
                "Return matrix needs at least one asset".to_string(),
            ));
        }

        let mut seen = HashSet::with_capacity(assets.len());
        for asset in &assets {
            if !seen.insert(asset.as_str()) {
                return Err(AllocError::DataError(format!(
                    "Duplicate asset column: {}",
                    asset
                )));
            }
        }

        if timestamps.len() != rows.len() {
            return Err(AllocError::DataError(format!(
                "Timestamp count {} does not match row count {}",
                timestamps.len(),
                rows.len()
            )));
        }

        if let Some(pos) = timestamps.windows(2).position(|w| w[1] <= w[0]) {
            return Err(AllocError::DataError(format!(
                "Timestamps must be strictly increasing (row {} at {} follows {})",
                pos + 1,
                timestamps[pos + 1],
                timestamps[pos]
            )));
        }

        for (i, row) in rows.iter().enumerate() {
            if row.len() != assets.len() {
                return Err(AllocError::DataError(format!(
                    "Row {} has {} values, expected {}",
                    i,
                    row.len(),
                    assets.len()
                )));
            }
            if let Some(j) = row.iter().position(|v| !v.is_finite()) {
                return Err(AllocError::DataError(format!(
                    "Non-finite return for {} at {}",
                    assets[j], timestamps[i]
                )));
            }
        }

        Ok(Self {
            assets,
            timestamps,
            rows,
        })
    }

    /// Build simple returns from a price matrix.
    ///
    /// The first price row only seeds the calculation, so the resulting matrix
    /// has one row fewer than `prices`.
    pub fn from_prices(
        assets: Vec<String>,
        timestamps: Vec<DateTime<Utc>>,
        prices: Vec<Vec<f64>>,
    ) -> Result<Self> {
        if prices.len() != timestamps.len() {
            return Err(AllocError::DataError(format!(
                "Timestamp count {} does not match price row count {}",
                timestamps.len(),
                prices.len()
            )));
        }
        if prices.len() < 2 {
            return Err(AllocError::DataError(
                "Need at least two price rows to compute returns".to_string(),
            ));
        }

        let mut rows = Vec::with_capacity(prices.len() - 1);
        for (i, w) in prices.windows(2).enumerate() {
            if w[0].len() != w[1].len() {
                return Err(AllocError::DataError(format!(
                    "Price rows {} and {} have different widths",
                    i,
                    i + 1
                )));
            }
            let mut row = Vec::with_capacity(w[1].len());
            for (prev, curr) in w[0].iter().zip(w[1].iter()) {
                if *prev <= 0.0 {
                    return Err(AllocError::DataError(format!(
                        "Non-positive price at {}",
                        timestamps[i]
                    )));
                }
                row.push(curr / prev - 1.0);
            }
            rows.push(row);
        }

        Self::new(assets, timestamps[1..].to_vec(), rows)
    }

    /// Asset identifiers in column order.
    pub fn assets(&self) -> &[String] {
        &self.assets
    }

    /// Row timestamps.
    pub fn timestamps(&self) -> &[DateTime<Utc>] {
        &self.timestamps
    }

    /// Row-major return data.
    pub fn rows(&self) -> &[Vec<f64>] {
        &self.rows
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Number of asset columns.
    pub fn num_assets(&self) -> usize {
        self.assets.len()
    }

    /// Column index of an asset.
    pub fn asset_index(&self, asset: &str) -> Option<usize> {
        self.assets.iter().position(|a| a == asset)
    }

    /// Align two matrices to the timestamps present in both (inner join).
    ///
    /// Matrices whose timestamps already match are borrowed rather than copied.
    pub fn intersect<'a>(
        &'a self,
        other: &'a ReturnMatrix,
    ) -> Result<(Cow<'a, ReturnMatrix>, Cow<'a, ReturnMatrix>)> {
        if self.timestamps == other.timestamps {
            return Ok((Cow::Borrowed(self), Cow::Borrowed(other)));
        }

        let other_index: HashMap<DateTime<Utc>, usize> = other
            .timestamps
            .iter()
            .enumerate()
            .map(|(i, ts)| (*ts, i))
            .collect();

        let (left, right): (Vec<usize>, Vec<usize>) = self
            .timestamps
            .iter()
            .enumerate()
            .filter_map(|(i, ts)| other_index.get(ts).map(|&j| (i, j)))
            .unzip();

        if left.is_empty() {
            return Err(AllocError::DataError(
                "Return matrices share no timestamps".to_string(),
            ));
        }

        let left = if left.len() == self.len() {
            Cow::Borrowed(self)
        } else {
            Cow::Owned(self.take_rows(&left))
        };
        let right = if right.len() == other.len() {
            Cow::Borrowed(other)
        } else {
            Cow::Owned(other.take_rows(&right))
        };

        Ok((left, right))
    }

    fn take_rows(&self, indices: &[usize]) -> ReturnMatrix {
        ReturnMatrix {
            assets: self.assets.clone(),
            timestamps: indices.iter().map(|&i| self.timestamps[i]).collect(),
            rows: indices.iter().map(|&i| self.rows[i].clone()).collect(),
        }
    }
}

/// Long-only weights for one rebalance period, one entry per asset in
/// column order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightVector(Vec<f64>);

impl WeightVector {
    /// All-zero weights (fully in cash).
    pub fn zeros(n: usize) -> Self {
        Self(vec![0.0; n])
    }

    pub fn from_vec(weights: Vec<f64>) -> Self {
        Self(weights)
    }

    /// Expand weights computed on a subset of columns back to the full
    /// universe, with zero weight everywhere else.
    pub fn expand(n: usize, columns: &[usize], weights: &[f64]) -> Self {
        let mut full = vec![0.0; n];
        for (&col, &w) in columns.iter().zip(weights.iter()) {
            full[col] = w;
        }
        Self(full)
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> f64 {
        self.0.get(index).copied().unwrap_or(0.0)
    }

    pub fn sum(&self) -> f64 {
        self.0.iter().sum()
    }

    /// True when no asset carries weight.
    pub fn is_cash(&self) -> bool {
        self.0.iter().all(|&w| w == 0.0)
    }

    /// Multiply every weight by `factor`.
    pub fn scale(&mut self, factor: f64) {
        for w in &mut self.0 {
            *w *= factor;
        }
    }

    /// Add to the weight of one asset.
    pub fn add(&mut self, index: usize, amount: f64) {
        if let Some(w) = self.0.get_mut(index) {
            *w += amount;
        }
    }

    /// Uninvested share of capital; zero when leverage takes the sum above one.
    pub fn cash(&self) -> f64 {
        (1.0 - self.sum()).max(0.0)
    }

    /// Portfolio return for one row of asset returns.
    pub fn dot(&self, returns: &[f64]) -> f64 {
        self.0.iter().zip(returns.iter()).map(|(w, r)| w * r).sum()
    }
}

/// Weights chosen at one rebalance point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightEntry {
    /// Timestamp of the rebalance row.
    pub timestamp: DateTime<Utc>,
    /// 1-based index of the rebalance row.
    pub rebalance_row: usize,
    /// First 0-based row the weights apply to.
    pub start_row: usize,
    /// Weights over the full universe.
    pub weights: WeightVector,
    /// Column indices picked by the selection step.
    pub selected: Vec<usize>,
    /// Share of the allocation kept aggressive by the crash overlay (1.0 without one).
    pub aggressive_fraction: f64,
}

/// Weights of one entry keyed by asset name, for export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightRow {
    pub timestamp: DateTime<Utc>,
    pub weights: BTreeMap<String, f64>,
    pub cash: f64,
}

/// Ordered sequence of rebalance weights covering a simulated span.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightHistory {
    assets: Vec<String>,
    entries: Vec<WeightEntry>,
}

impl WeightHistory {
    pub fn new(assets: Vec<String>) -> Self {
        Self {
            assets,
            entries: Vec::new(),
        }
    }

    /// Append an entry; entries must arrive in chronological order.
    pub fn push(&mut self, entry: WeightEntry) -> Result<()> {
        if entry.weights.len() != self.assets.len() {
            return Err(AllocError::DataError(format!(
                "Weight vector has {} entries, universe has {} assets",
                entry.weights.len(),
                self.assets.len()
            )));
        }
        if let Some(last) = self.entries.last() {
            if entry.start_row <= last.start_row {
                return Err(AllocError::DataError(format!(
                    "Weight entry starting at row {} does not follow row {}",
                    entry.start_row, last.start_row
                )));
            }
        }
        self.entries.push(entry);
        Ok(())
    }

    pub fn assets(&self) -> &[String] {
        &self.assets
    }

    pub fn entries(&self) -> &[WeightEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// One-way turnover of each rebalance relative to the previous one.
    ///
    /// The first entry is measured against an all-cash start.
    pub fn turnover(&self) -> Vec<f64> {
        let mut previous = WeightVector::zeros(self.assets.len());
        self.entries
            .iter()
            .map(|entry| {
                let traded: f64 = entry
                    .weights
                    .as_slice()
                    .iter()
                    .zip(previous.as_slice().iter())
                    .map(|(new, old)| (new - old).abs())
                    .sum();
                previous = entry.weights.clone();
                traded / 2.0
            })
            .collect()
    }

    /// Mean turnover across rebalances, excluding the initial allocation.
    pub fn average_turnover(&self) -> f64 {
        let turnover = self.turnover();
        if turnover.len() < 2 {
            return 0.0;
        }
        turnover[1..].iter().sum::<f64>() / (turnover.len() - 1) as f64
    }

    /// Entries keyed by asset name, skipping zero weights.
    pub fn to_rows(&self) -> Vec<WeightRow> {
        self.entries
            .iter()
            .map(|entry| {
                let weights: BTreeMap<String, f64> = self
                    .assets
                    .iter()
                    .zip(entry.weights.as_slice().iter())
                    .filter(|&(_, &w)| w != 0.0)
                    .map(|(a, &w)| (a.clone(), w))
                    .collect();
                WeightRow {
                    timestamp: entry.timestamp,
                    cash: entry.weights.cash(),
                    weights,
                }
            })
            .collect()
    }
}

/// Per-row strategy returns produced by the simulator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyReturns {
    pub timestamps: Vec<DateTime<Utc>>,
    /// Portfolio return of every row (0 before the first allocation).
    pub returns: Vec<f64>,
    /// Compounded growth of one unit of capital.
    pub equity: Vec<f64>,
    /// First row covered by a weight entry.
    pub start_row: usize,
}

impl StrategyReturns {
    /// Returns over the invested span.
    pub fn active_returns(&self) -> &[f64] {
        &self.returns[self.start_row.min(self.returns.len())..]
    }

    pub fn final_equity(&self) -> f64 {
        self.equity.last().copied().unwrap_or(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, d, 0, 0, 0).unwrap()
    }

    fn matrix(days: &[u32], assets: &[&str]) -> ReturnMatrix {
        ReturnMatrix::new(
            assets.iter().map(|s| s.to_string()).collect(),
            days.iter().map(|&d| day(d)).collect(),
            days.iter()
                .map(|&d| assets.iter().map(|_| d as f64 / 100.0).collect())
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn test_rejects_unsorted_timestamps() {
        let result = ReturnMatrix::new(
            vec!["A".to_string()],
            vec![day(2), day(1)],
            vec![vec![0.0], vec![0.0]],
        );
        assert!(matches!(result, Err(AllocError::DataError(_))));
    }

    #[test]
    fn test_rejects_ragged_rows_and_nan() {
        let ragged = ReturnMatrix::new(
            vec!["A".to_string(), "B".to_string()],
            vec![day(1)],
            vec![vec![0.0]],
        );
        assert!(ragged.is_err());

        let nan = ReturnMatrix::new(vec!["A".to_string()], vec![day(1)], vec![vec![f64::NAN]]);
        assert!(nan.is_err());
    }

    #[test]
    fn test_rejects_duplicate_assets() {
        let result = ReturnMatrix::new(
            vec!["A".to_string(), "A".to_string()],
            vec![day(1)],
            vec![vec![0.0, 0.0]],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_from_prices() {
        let m = ReturnMatrix::from_prices(
            vec!["A".to_string()],
            vec![day(1), day(2), day(3)],
            vec![vec![100.0], vec![110.0], vec![99.0]],
        )
        .unwrap();
        assert_eq!(m.len(), 2);
        assert_eq!(m.timestamps()[0], day(2));
        assert!((m.rows()[0][0] - 0.10).abs() < 1e-12);
        assert!((m.rows()[1][0] + 0.10).abs() < 1e-12);
    }

    #[test]
    fn test_intersect_borrows_when_aligned() {
        let a = matrix(&[1, 2, 3], &["A"]);
        let b = matrix(&[1, 2, 3], &["C"]);
        let (left, right) = a.intersect(&b).unwrap();
        assert!(matches!(left, Cow::Borrowed(_)));
        assert!(matches!(right, Cow::Borrowed(_)));
    }

    #[test]
    fn test_intersect_trims_to_common_dates() {
        let a = matrix(&[1, 2, 3, 4], &["A"]);
        let b = matrix(&[2, 3, 5], &["C"]);
        let (left, right) = a.intersect(&b).unwrap();
        assert_eq!(left.timestamps(), &[day(2), day(3)]);
        assert_eq!(right.timestamps(), &[day(2), day(3)]);
        assert!((left.rows()[0][0] - 0.02).abs() < 1e-12);
    }

    #[test]
    fn test_intersect_disjoint_fails() {
        let a = matrix(&[1, 2], &["A"]);
        let b = matrix(&[3, 4], &["C"]);
        assert!(a.intersect(&b).is_err());
    }

    #[test]
    fn test_weight_vector_expand() {
        let w = WeightVector::expand(4, &[1, 3], &[0.25, 0.75]);
        assert_eq!(w.as_slice(), &[0.0, 0.25, 0.0, 0.75]);
        assert!((w.sum() - 1.0).abs() < 1e-12);
        assert!((w.dot(&[1.0, 0.04, 1.0, 0.0]) - 0.01).abs() < 1e-12);
    }

    #[test]
    fn test_history_turnover() {
        let mut history = WeightHistory::new(vec!["A".to_string(), "B".to_string()]);
        for (i, weights) in [vec![1.0, 0.0], vec![0.5, 0.5], vec![0.5, 0.5]]
            .into_iter()
            .enumerate()
        {
            history
                .push(WeightEntry {
                    timestamp: day(i as u32 + 1),
                    rebalance_row: i + 1,
                    start_row: i + 1,
                    weights: WeightVector::from_vec(weights),
                    selected: vec![],
                    aggressive_fraction: 1.0,
                })
                .unwrap();
        }

        let turnover = history.turnover();
        assert!((turnover[0] - 0.5).abs() < 1e-12);
        assert!((turnover[1] - 0.5).abs() < 1e-12);
        assert!(turnover[2].abs() < 1e-12);
        assert!((history.average_turnover() - 0.25).abs() < 1e-12);

        let rows = history.to_rows();
        assert_eq!(rows[0].weights.len(), 1);
        assert!(rows[1].cash.abs() < 1e-12);
    }

    #[test]
    fn test_leveraged_weights_report_no_cash() {
        let mut history = WeightHistory::new(vec!["A".to_string(), "B".to_string()]);
        history
            .push(WeightEntry {
                timestamp: day(1),
                rebalance_row: 1,
                start_row: 1,
                weights: WeightVector::from_vec(vec![0.75, 0.75]),
                selected: vec![0, 1],
                aggressive_fraction: 1.0,
            })
            .unwrap();

        assert_eq!(history.entries()[0].weights.cash(), 0.0);
        assert_eq!(history.to_rows()[0].cash, 0.0);
        assert!((WeightVector::from_vec(vec![0.25, 0.0]).cash() - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_history_rejects_out_of_order_entries() {
        let mut history = WeightHistory::new(vec!["A".to_string()]);
        let entry = WeightEntry {
            timestamp: day(2),
            rebalance_row: 2,
            start_row: 2,
            weights: WeightVector::zeros(1),
            selected: vec![],
            aggressive_fraction: 1.0,
        };
        history.push(entry.clone()).unwrap();
        assert!(history.push(entry).is_err());
    }
}
