//! Weighting policies for the selected assets.
//!
//! Four policies are available: equal weight, inverse volatility, inverse
//! variance and long-only minimum variance. Minimum variance solves
//!
//! ```text
//! minimize    w' Σ w
//! subject to  Σ w_i = 1
//!             0 <= w_i <= 1
//! ```
//!
//! with the Clarabel interior-point solver.

use crate::error::{AllocError, Result};
use crate::risk::RiskEstimate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::warn;

/// How weights are assigned among the selected assets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum WeightingPolicy {
    /// `1/k` per asset.
    #[default]
    #[serde(rename = "ew")]
    EqualWeight,
    /// Proportional to `1 / vol`.
    #[serde(rename = "invVol")]
    InverseVolatility,
    /// Proportional to `1 / vol²`.
    #[serde(rename = "invVar")]
    InverseVariance,
    /// Long-only minimum-variance portfolio.
    #[serde(rename = "minVol")]
    MinimumVariance,
}

impl WeightingPolicy {
    pub const ALL: [WeightingPolicy; 4] = [
        WeightingPolicy::EqualWeight,
        WeightingPolicy::InverseVolatility,
        WeightingPolicy::InverseVariance,
        WeightingPolicy::MinimumVariance,
    ];

    /// Configuration name of the policy.
    pub fn name(&self) -> &'static str {
        match self {
            WeightingPolicy::EqualWeight => "ew",
            WeightingPolicy::InverseVolatility => "invVol",
            WeightingPolicy::InverseVariance => "invVar",
            WeightingPolicy::MinimumVariance => "minVol",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            WeightingPolicy::EqualWeight => "Equal weight across selected assets",
            WeightingPolicy::InverseVolatility => "Weights proportional to 1 / volatility",
            WeightingPolicy::InverseVariance => "Weights proportional to 1 / variance",
            WeightingPolicy::MinimumVariance => {
                "Long-only minimum-variance portfolio (quadratic program)"
            }
        }
    }

    /// Weights for the assets covered by `risk`, summing to one.
    pub fn compute(&self, risk: &RiskEstimate) -> Result<Vec<f64>> {
        let k = risk.len();
        if k == 0 {
            return Ok(Vec::new());
        }

        match self {
            WeightingPolicy::EqualWeight => Ok(vec![1.0 / k as f64; k]),
            WeightingPolicy::InverseVolatility => inverse_power_weights(&risk.volatilities, 1),
            WeightingPolicy::InverseVariance => inverse_power_weights(&risk.volatilities, 2),
            WeightingPolicy::MinimumVariance => minimum_variance(&risk.covariance),
        }
    }
}

impl FromStr for WeightingPolicy {
    type Err = AllocError;

    fn from_str(s: &str) -> Result<Self> {
        WeightingPolicy::ALL
            .into_iter()
            .find(|p| p.name() == s)
            .ok_or_else(|| {
                AllocError::ConfigError(format!(
                    "Unknown weighting policy '{}', expected one of: ew, invVol, invVar, minVol",
                    s
                ))
            })
    }
}

impl fmt::Display for WeightingPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// What to do when the minimum-variance program cannot be solved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MinVarianceFallback {
    /// Abort the run with an optimization error.
    #[default]
    Fail,
    /// Use inverse-volatility weights for that period.
    InverseVolatility,
}

/// Weighting policy together with its failure handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WeightingEngine {
    pub policy: WeightingPolicy,
    pub on_infeasible: MinVarianceFallback,
}

impl WeightingEngine {
    pub fn new(policy: WeightingPolicy) -> Self {
        Self {
            policy,
            on_infeasible: MinVarianceFallback::Fail,
        }
    }

    pub fn with_fallback(mut self, fallback: MinVarianceFallback) -> Self {
        self.on_infeasible = fallback;
        self
    }

    /// Weights for the selected assets.
    pub fn weights(&self, risk: &RiskEstimate) -> Result<Vec<f64>> {
        match self.policy.compute(risk) {
            Err(AllocError::OptimizationError(msg))
                if self.policy == WeightingPolicy::MinimumVariance
                    && self.on_infeasible == MinVarianceFallback::InverseVolatility =>
            {
                warn!("Minimum variance failed ({}), using inverse volatility", msg);
                WeightingPolicy::InverseVolatility.compute(risk)
            }
            other => other,
        }
    }
}

fn inverse_power_weights(volatilities: &[f64], power: i32) -> Result<Vec<f64>> {
    if let Some(v) = volatilities.iter().find(|v| !v.is_finite() || **v <= 0.0) {
        return Err(AllocError::OptimizationError(format!(
            "Inverse weighting needs positive volatility, got {}",
            v
        )));
    }

    let inverse: Vec<f64> = volatilities.iter().map(|v| 1.0 / v.powi(power)).collect();
    let total: f64 = inverse.iter().sum();
    Ok(inverse.into_iter().map(|x| x / total).collect())
}

/// Check positive semi-definiteness with a Cholesky pass on `m + eps * I`.
pub fn is_positive_semidefinite(m: &[Vec<f64>], eps: f64) -> bool {
    let n = m.len();
    let mut l = vec![vec![0.0; n]; n];
    for j in 0..n {
        let mut diag = m[j][j] + eps;
        for k in 0..j {
            diag -= l[j][k] * l[j][k];
        }
        if diag <= 0.0 || !diag.is_finite() {
            return false;
        }
        l[j][j] = diag.sqrt();
        for i in (j + 1)..n {
            let mut sum = m[i][j];
            for k in 0..j {
                sum -= l[i][k] * l[j][k];
            }
            l[i][j] = sum / l[j][j];
        }
    }
    true
}

/// Long-only, fully invested minimum-variance weights for `covariance`.
pub fn minimum_variance(covariance: &[Vec<f64>]) -> Result<Vec<f64>> {
    use clarabel::algebra::*;
    use clarabel::solver::*;

    let n = covariance.len();
    match n {
        0 => return Ok(Vec::new()),
        1 => return Ok(vec![1.0]),
        _ => {}
    }

    if covariance.iter().any(|row| row.len() != n) {
        return Err(AllocError::OptimizationError(
            "Covariance matrix must be square".to_string(),
        ));
    }
    if covariance.iter().flatten().any(|v| !v.is_finite()) {
        return Err(AllocError::OptimizationError(
            "Covariance matrix has non-finite entries".to_string(),
        ));
    }

    // The argmin is scale invariant; normalizing keeps the solver tolerances meaningful.
    let scale = (0..n).map(|i| covariance[i][i]).fold(0.0_f64, f64::max);
    if scale <= 0.0 {
        // Every feasible portfolio has zero variance.
        return Ok(vec![1.0 / n as f64; n]);
    }

    for i in 0..n {
        for j in (i + 1)..n {
            if (covariance[i][j] - covariance[j][i]).abs() > 1e-10 * scale {
                return Err(AllocError::OptimizationError(
                    "Covariance matrix is not symmetric".to_string(),
                ));
            }
        }
    }

    let scaled: Vec<Vec<f64>> = covariance
        .iter()
        .map(|row| row.iter().map(|v| v / scale).collect())
        .collect();
    if !is_positive_semidefinite(&scaled, 1e-10) {
        return Err(AllocError::OptimizationError(
            "Covariance matrix is not positive semi-definite".to_string(),
        ));
    }

    // P: upper triangle of the covariance in CSC format
    let mut p_data = Vec::new();
    let mut p_indices = Vec::new();
    let mut p_indptr = vec![0];
    for j in 0..n {
        for (i, row) in scaled.iter().enumerate().take(j + 1) {
            let val = row[j];
            if i == j || val != 0.0 {
                p_data.push(val);
                p_indices.push(i);
            }
        }
        p_indptr.push(p_data.len());
    }
    let p = CscMatrix::new(n, n, p_indptr, p_indices, p_data);

    let q = vec![0.0; n];

    // Constraint rows: [sum(w) = 1; -w <= 0; w <= 1]
    let mut a_data = Vec::with_capacity(3 * n);
    let mut a_indices = Vec::with_capacity(3 * n);
    let mut a_indptr = vec![0];
    for j in 0..n {
        a_data.push(1.0);
        a_indices.push(0);

        a_data.push(-1.0);
        a_indices.push(1 + j);

        a_data.push(1.0);
        a_indices.push(1 + n + j);

        a_indptr.push(a_data.len());
    }
    let a = CscMatrix::new(1 + 2 * n, n, a_indptr, a_indices, a_data);

    let mut b = vec![1.0];
    b.extend(vec![0.0; n]);
    b.extend(vec![1.0; n]);

    let cones = [ZeroConeT(1), NonnegativeConeT(2 * n)];

    let settings = DefaultSettingsBuilder::default()
        .max_iter(200)
        .verbose(false)
        .build()
        .map_err(|e| {
            AllocError::OptimizationError(format!("Failed to build solver settings: {}", e))
        })?;

    let mut solver = DefaultSolver::new(&p, &q, &a, &b, &cones, settings).map_err(|e| {
        AllocError::OptimizationError(format!("Failed to create solver: {:?}", e))
    })?;

    solver.solve();

    if !matches!(
        solver.solution.status,
        SolverStatus::Solved | SolverStatus::AlmostSolved
    ) {
        return Err(AllocError::OptimizationError(format!(
            "Minimum variance optimization failed with status: {:?}",
            solver.solution.status
        )));
    }

    // Interior-point iterates sit just inside the bounds; clamp and renormalize
    // so the result is exactly feasible.
    let clamped: Vec<f64> = solver
        .solution
        .x
        .iter()
        .map(|w| if w.is_finite() { w.clamp(0.0, 1.0) } else { 0.0 })
        .collect();
    let total: f64 = clamped.iter().sum();
    if total <= 0.0 {
        return Err(AllocError::OptimizationError(
            "Minimum variance solution has no positive weight".to_string(),
        ));
    }

    Ok(clamped.into_iter().map(|w| w / total).collect())
}
