//! Risk estimation: blended volatility, correlation and covariance.

use crate::error::Result;
use crate::lookback::{annualized_volatility, correlation_matrix, LookbackWeights};
use serde::{Deserialize, Serialize};

/// Risk estimates for a set of selected assets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskEstimate {
    /// Annualized volatility per selected asset.
    pub volatilities: Vec<f64>,
    /// Correlation matrix of the selected assets.
    pub correlation: Vec<Vec<f64>>,
    /// `cov[i][j] = vol[i] * vol[j] * corr[i][j]`.
    pub covariance: Vec<Vec<f64>>,
}

impl RiskEstimate {
    /// Combine volatilities and correlations into a covariance matrix.
    pub fn from_parts(volatilities: Vec<f64>, correlation: Vec<Vec<f64>>) -> Self {
        let covariance = correlation
            .iter()
            .enumerate()
            .map(|(i, row)| {
                row.iter()
                    .enumerate()
                    .map(|(j, rho)| volatilities[i] * volatilities[j] * rho)
                    .collect()
            })
            .collect();

        Self {
            volatilities,
            correlation,
            covariance,
        }
    }

    /// Number of assets covered.
    pub fn len(&self) -> usize {
        self.volatilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.volatilities.is_empty()
    }

    /// Portfolio variance `w' Σ w`.
    pub fn portfolio_variance(&self, weights: &[f64]) -> f64 {
        let mut variance = 0.0;
        for (i, wi) in weights.iter().enumerate() {
            for (j, wj) in weights.iter().enumerate() {
                variance += wi * wj * self.covariance[i][j];
            }
        }
        variance
    }
}

/// Estimates volatility and correlation as weighted multi-horizon blends.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskEstimator {
    volatility: LookbackWeights,
    correlation: LookbackWeights,
}

impl RiskEstimator {
    /// Both lookback sets need at least two observations per horizon.
    pub fn new(volatility: LookbackWeights, correlation: LookbackWeights) -> Result<Self> {
        Ok(Self {
            volatility: volatility.require_min_lookback(2, "Volatility")?,
            correlation: correlation.require_min_lookback(2, "Correlation")?,
        })
    }

    pub fn max_lookback(&self) -> usize {
        self.volatility.max_lookback().max(self.correlation.max_lookback())
    }

    /// Estimate risk for `columns` over `window`.
    pub fn estimate(&self, window: &[Vec<f64>], columns: &[usize]) -> RiskEstimate {
        let volatilities: Vec<f64> = self
            .volatility
            .aggregate(window, |rows| annualized_volatility(rows, columns));
        let correlation: Vec<Vec<f64>> = self
            .correlation
            .aggregate(window, |rows| correlation_matrix(rows, columns));

        RiskEstimate::from_parts(volatilities, correlation)
    }
}
