//! Multi-horizon momentum scoring with a re-entry penalty.

use crate::error::{AllocError, Result};
use crate::lookback::{cumulative_return, LookbackWeights};
use crate::types::WeightVector;
use serde::Serialize;

/// Prior weights at or below this magnitude count as "not held".
pub const DEFAULT_ZERO_WEIGHT_TOLERANCE: f64 = 1e-9;

/// Scores assets by a weighted blend of trailing cumulative returns.
///
/// Assets that were out of the portfolio last period have negative momentum
/// amplified by `1 + penalty`, which makes weak newcomers rank lower without
/// holding back strong ones.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MomentumEngine {
    lookbacks: LookbackWeights,
    penalty: f64,
    zero_weight_tolerance: f64,
}

impl MomentumEngine {
    /// Create an engine; `penalty` must lie in `[0, 1]`.
    pub fn new(lookbacks: LookbackWeights, penalty: f64) -> Result<Self> {
        if !(0.0..=1.0).contains(&penalty) {
            return Err(AllocError::ConfigError(format!(
                "New-asset momentum penalty must be in [0, 1], got {}",
                penalty
            )));
        }
        Ok(Self {
            lookbacks,
            penalty,
            zero_weight_tolerance: DEFAULT_ZERO_WEIGHT_TOLERANCE,
        })
    }

    /// Engine without a re-entry penalty, as used for the canary universe.
    pub fn unpenalized(lookbacks: LookbackWeights) -> Self {
        Self {
            lookbacks,
            penalty: 0.0,
            zero_weight_tolerance: DEFAULT_ZERO_WEIGHT_TOLERANCE,
        }
    }

    /// Override the tolerance below which a prior weight counts as zero.
    pub fn with_zero_weight_tolerance(mut self, tolerance: f64) -> Result<Self> {
        if !tolerance.is_finite() || tolerance < 0.0 {
            return Err(AllocError::ConfigError(format!(
                "Zero-weight tolerance must be finite and non-negative, got {}",
                tolerance
            )));
        }
        self.zero_weight_tolerance = tolerance;
        Ok(self)
    }

    pub fn lookbacks(&self) -> &LookbackWeights {
        &self.lookbacks
    }

    pub fn penalty(&self) -> f64 {
        self.penalty
    }

    /// Momentum of every column of `window`.
    ///
    /// `prior` holds last period's weights in column order; `None` means
    /// nothing was held, so every asset is treated as new.
    pub fn score(&self, window: &[Vec<f64>], prior: Option<&WeightVector>) -> Vec<f64> {
        let columns: Vec<usize> = match window.first() {
            Some(row) => (0..row.len()).collect(),
            None => return Vec::new(),
        };

        let mut scores: Vec<f64> = self
            .lookbacks
            .aggregate(window, |rows| cumulative_return(rows, &columns));

        if self.penalty > 0.0 {
            for (i, score) in scores.iter_mut().enumerate() {
                let held = prior
                    .map(|w| w.get(i).abs() > self.zero_weight_tolerance)
                    .unwrap_or(false);
                if !held && *score < 0.0 {
                    *score *= 1.0 + self.penalty;
                }
            }
        }

        scores
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window() -> Vec<Vec<f64>> {
        // Asset 0 rises, asset 1 falls
        vec![vec![0.01, -0.02], vec![0.01, -0.02], vec![0.01, -0.02]]
    }

    fn engine(penalty: f64) -> MomentumEngine {
        MomentumEngine::new(LookbackWeights::new(&[1, 3], &[1.0, 1.0]).unwrap(), penalty).unwrap()
    }

    #[test]
    fn test_penalty_range_checked() {
        let lw = LookbackWeights::single(3).unwrap();
        assert!(MomentumEngine::new(lw.clone(), -0.1).is_err());
        assert!(MomentumEngine::new(lw.clone(), 1.5).is_err());
        assert!(MomentumEngine::new(lw, 1.0).is_ok());
    }

    #[test]
    fn test_scores_without_penalty() {
        let scores = engine(0.0).score(&window(), None);
        let expected_up = 0.5 * 0.01 + 0.5 * (1.01_f64.powi(3) - 1.0);
        assert!((scores[0] - expected_up).abs() < 1e-12);
        assert!(scores[1] < 0.0);
    }

    #[test]
    fn test_penalty_only_hits_negative_new_assets() {
        let base = engine(0.0).score(&window(), None);
        let penalized = engine(0.5).score(&window(), None);

        assert!((penalized[0] - base[0]).abs() < 1e-12);
        assert!((penalized[1] - base[1] * 1.5).abs() < 1e-12);
    }

    #[test]
    fn test_held_assets_not_penalized() {
        let prior = WeightVector::from_vec(vec![0.0, 1.0]);
        let base = engine(0.0).score(&window(), None);
        let scores = engine(0.5).score(&window(), Some(&prior));
        assert!((scores[1] - base[1]).abs() < 1e-12);
    }

    #[test]
    fn test_dust_weight_counts_as_zero() {
        let prior = WeightVector::from_vec(vec![0.0, 1e-12]);
        let base = engine(0.0).score(&window(), None);
        let scores = engine(1.0).score(&window(), Some(&prior));
        assert!((scores[1] - base[1] * 2.0).abs() < 1e-12);

        let strict = engine(1.0).with_zero_weight_tolerance(0.0).unwrap();
        let scores = strict.score(&window(), Some(&prior));
        assert!((scores[1] - base[1]).abs() < 1e-12);
    }

    #[test]
    fn test_empty_window() {
        assert!(engine(0.0).score(&[], None).is_empty());
    }
}
