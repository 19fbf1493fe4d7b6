//! Canary-driven crash protection.
//!
//! The share of canary assets with positive momentum sets how much of the
//! primary allocation stays invested. The withheld remainder goes to a
//! defensive asset when that asset is itself trending above the selection
//! threshold, and to cash otherwise.

use crate::error::{AllocError, Result};
use crate::lookback::LookbackWeights;
use crate::momentum::MomentumEngine;
use crate::types::WeightVector;
use serde::Serialize;
use tracing::trace;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CrashProtection {
    canary: MomentumEngine,
    crash_asset: Option<usize>,
    leverage: f64,
}

impl CrashProtection {
    /// `crash_asset` is a column of the primary universe; `leverage` applies
    /// only when every canary asset is trending up.
    pub fn new(
        lookbacks: LookbackWeights,
        crash_asset: Option<usize>,
        leverage: f64,
    ) -> Result<Self> {
        if !leverage.is_finite() || leverage < 1.0 {
            return Err(AllocError::ConfigError(format!(
                "Leverage must be a finite value of at least 1.0, got {}",
                leverage
            )));
        }
        Ok(Self {
            canary: MomentumEngine::unpenalized(lookbacks),
            crash_asset,
            leverage,
        })
    }

    pub fn crash_asset(&self) -> Option<usize> {
        self.crash_asset
    }

    pub fn leverage(&self) -> f64 {
        self.leverage
    }

    /// Fraction of canary assets with strictly positive momentum.
    pub fn aggressive_fraction(&self, canary_window: &[Vec<f64>]) -> f64 {
        let scores = self.canary.score(canary_window, None);
        if scores.is_empty() {
            return 1.0;
        }
        let positive = scores.iter().filter(|&&s| s > 0.0).count();
        positive as f64 / scores.len() as f64
    }

    /// Blend `weights` toward the defensive allocation.
    ///
    /// `primary_scores` are the momentum scores of the primary universe for
    /// the same period.
    pub fn apply(
        &self,
        weights: &mut WeightVector,
        fraction: f64,
        primary_scores: &[f64],
        threshold: f64,
    ) {
        if fraction >= 1.0 {
            if self.leverage != 1.0 {
                weights.scale(self.leverage);
            }
            return;
        }

        weights.scale(fraction);

        if let Some(crash) = self.crash_asset {
            let score = primary_scores.get(crash).copied().unwrap_or(f64::NAN);
            if score > threshold {
                weights.add(crash, 1.0 - fraction);
            } else {
                trace!(
                    "Crash asset score {:.4} not above threshold, residual {:.2} held in cash",
                    score,
                    1.0 - fraction
                );
            }
        }
    }
}
