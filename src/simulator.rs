//! Compounds a weight history against realized returns.

use crate::error::{AllocError, Result};
use crate::types::{ReturnMatrix, StrategyReturns, WeightHistory};

/// Simulate the strategy over every row of `returns`.
///
/// Each row is priced with the latest entry whose `start_row` is at or before
/// it; weights stay constant between rebalances. Rows before the first entry
/// earn nothing. Equity starts at 1.0.
pub fn simulate(returns: &ReturnMatrix, history: &WeightHistory) -> Result<StrategyReturns> {
    if history.assets() != returns.assets() {
        return Err(AllocError::DataError(
            "Weight history and return matrix cover different assets".to_string(),
        ));
    }

    let entries = history.entries();
    let n = returns.len();
    let mut period_returns = Vec::with_capacity(n);
    let mut equity = Vec::with_capacity(n);
    let mut value = 1.0;
    let mut next = 0;
    let mut current = None;

    for (t, row) in returns.rows().iter().enumerate() {
        while next < entries.len() && entries[next].start_row <= t {
            current = Some(&entries[next].weights);
            next += 1;
        }

        let r = current.map(|w| w.dot(row)).unwrap_or(0.0);
        value *= 1.0 + r;
        period_returns.push(r);
        equity.push(value);
    }

    let start_row = entries.first().map(|e| e.start_row.min(n)).unwrap_or(n);

    Ok(StrategyReturns {
        timestamps: returns.timestamps().to_vec(),
        returns: period_returns,
        equity,
        start_row,
    })
}
