//! Configuration file support for allocation runs.
//!
//! Allows loading allocation configurations from TOML files for
//! reproducibility. Momentum, volatility and correlation lookbacks have no
//! defaults and must each be given explicitly.

use crate::engine::AllocationConfig;
use crate::error::{AllocError, Result};
use crate::lookback::LookbackWeights;
use crate::momentum::{MomentumEngine, DEFAULT_ZERO_WEIGHT_TOLERANCE};
use crate::risk::RiskEstimator;
use crate::schedule::RebalanceUnit;
use crate::weighting::{MinVarianceFallback, WeightingEngine, WeightingPolicy};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::info;

/// Complete allocation configuration loaded from a file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocationFileConfig {
    /// Input files.
    #[serde(default)]
    pub data: DataSettings,
    /// Momentum scoring.
    pub momentum: MomentumSettings,
    /// Volatility estimation lookbacks.
    pub volatility: LookbackSettings,
    /// Correlation estimation lookbacks.
    pub correlation: LookbackSettings,
    #[serde(default)]
    pub selection: SelectionSettings,
    #[serde(default)]
    pub weighting: WeightingSettings,
    #[serde(default)]
    pub rebalance: RebalanceSettings,
    #[serde(default)]
    pub crash_protection: CrashProtectionSettings,
    #[serde(default)]
    pub report: ReportSettings,
}

/// Data settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DataSettings {
    /// Path to the primary return CSV.
    pub returns: Option<String>,
    /// Path to the canary return CSV.
    pub canary: Option<String>,
    /// Date format in the CSV files.
    pub date_format: Option<String>,
    /// The files hold prices rather than returns.
    #[serde(default)]
    pub prices: bool,
    /// Skip unparseable rows with a warning instead of failing.
    #[serde(default)]
    pub skip_invalid: bool,
}

/// Paired lookback lengths and weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LookbackSettings {
    pub lookbacks: Vec<usize>,
    pub weights: Vec<f64>,
}

impl LookbackSettings {
    fn to_lookback_weights(&self) -> Result<LookbackWeights> {
        LookbackWeights::new(&self.lookbacks, &self.weights)
    }
}

/// Momentum settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MomentumSettings {
    pub lookbacks: Vec<usize>,
    pub weights: Vec<f64>,
    /// Penalty applied to negative momentum of assets not held last period.
    #[serde(default)]
    pub penalty: f64,
    /// Prior weights at or below this count as not held.
    #[serde(default = "default_zero_weight_tolerance")]
    pub zero_weight_tolerance: f64,
}

fn default_zero_weight_tolerance() -> f64 { DEFAULT_ZERO_WEIGHT_TOLERANCE }

/// Selection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectionSettings {
    /// Momentum an asset must exceed to be held.
    #[serde(default)]
    pub threshold: f64,
    /// Maximum number of assets held.
    #[serde(default = "default_top_n")]
    pub top_n: usize,
}

fn default_top_n() -> usize { 3 }

impl Default for SelectionSettings {
    fn default() -> Self {
        Self {
            threshold: 0.0,
            top_n: 3,
        }
    }
}

/// Weighting settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeightingSettings {
    /// One of `ew`, `invVol`, `invVar`, `minVol`.
    #[serde(default = "default_policy")]
    pub policy: String,
    /// Behaviour when the minimum-variance program fails.
    #[serde(default)]
    pub on_infeasible: MinVarianceFallback,
}

fn default_policy() -> String { "ew".to_string() }

impl Default for WeightingSettings {
    fn default() -> Self {
        Self {
            policy: "ew".to_string(),
            on_infeasible: MinVarianceFallback::Fail,
        }
    }
}

/// Rebalance schedule settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RebalanceSettings {
    /// One of `months`, `quarters`, `years`.
    #[serde(default = "default_unit")]
    pub unit: String,
    /// Rows added to every natural period end (may be negative).
    #[serde(default)]
    pub offset: i64,
    /// Schedule periods per data window; one year of periods if unset.
    #[serde(default)]
    pub window_periods: Option<usize>,
}

fn default_unit() -> String { "months".to_string() }

impl Default for RebalanceSettings {
    fn default() -> Self {
        Self {
            unit: "months".to_string(),
            offset: 0,
            window_periods: None,
        }
    }
}

/// Crash protection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrashProtectionSettings {
    /// Defensive asset receiving the withheld allocation.
    #[serde(default)]
    pub asset: Option<String>,
    /// Leverage applied when every canary asset has positive momentum.
    #[serde(default = "default_leverage")]
    pub leverage: f64,
}

fn default_leverage() -> f64 { 1.0 }

impl Default for CrashProtectionSettings {
    fn default() -> Self {
        Self {
            asset: None,
            leverage: 1.0,
        }
    }
}

/// Reporting settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportSettings {
    /// Return rows per year, used to annualize statistics.
    #[serde(default = "default_periods_per_year")]
    pub periods_per_year: f64,
}

fn default_periods_per_year() -> f64 { 252.0 }

impl Default for ReportSettings {
    fn default() -> Self {
        Self {
            periods_per_year: 252.0,
        }
    }
}

impl AllocationFileConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading configuration from: {}", path.display());

        let content = fs::read_to_string(path)?;
        let config: AllocationFileConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| AllocError::ConfigError(e.to_string()))?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Validate and convert to the engine configuration.
    pub fn to_allocation_config(&self) -> Result<AllocationConfig> {
        let momentum = MomentumEngine::new(
            LookbackWeights::new(&self.momentum.lookbacks, &self.momentum.weights)?,
            self.momentum.penalty,
        )?
        .with_zero_weight_tolerance(self.momentum.zero_weight_tolerance)?;

        let risk = RiskEstimator::new(
            self.volatility.to_lookback_weights()?,
            self.correlation.to_lookback_weights()?,
        )?;

        let policy: WeightingPolicy = self.weighting.policy.parse()?;
        let unit: RebalanceUnit = self.rebalance.unit.parse()?;

        let mut config = AllocationConfig::new(momentum, risk)
            .with_selection(self.selection.threshold, self.selection.top_n)
            .with_weighting(WeightingEngine::new(policy).with_fallback(self.weighting.on_infeasible))
            .with_rebalance(unit, self.rebalance.offset)
            .with_leverage(self.crash_protection.leverage)
            .with_periods_per_year(self.report.periods_per_year);

        if let Some(periods) = self.rebalance.window_periods {
            config = config.with_window_periods(periods);
        }
        if let Some(asset) = &self.crash_protection.asset {
            config = config.with_crash_asset(asset.clone());
        }

        Ok(config)
    }

    /// Generate an example configuration file content.
    pub fn example() -> String {
        r#"# taa allocation configuration

[data]
returns = "data/returns.csv"
# canary = "data/canary.csv"
# date_format = "%Y-%m-%d"
# prices = false
# skip_invalid = false

# Momentum: weighted blend of 1, 3, 6 and 12 month returns
[momentum]
lookbacks = [21, 63, 126, 252]
weights = [12.0, 4.0, 2.0, 1.0]
penalty = 0.0
# zero_weight_tolerance = 1e-9

[volatility]
lookbacks = [21]
weights = [1.0]

[correlation]
lookbacks = [21, 63, 126, 252]
weights = [12.0, 4.0, 2.0, 1.0]

[selection]
threshold = 0.0
top_n = 3

[weighting]
policy = "minVol"          # ew | invVol | invVar | minVol
on_infeasible = "fail"     # fail | inverse_volatility

[rebalance]
unit = "months"            # months | quarters | years
offset = 0
# window_periods = 12

[crash_protection]
# asset = "IEF"
leverage = 1.0

[report]
periods_per_year = 252.0
"#
        .to_string()
    }
}
