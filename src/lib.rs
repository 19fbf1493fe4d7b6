//! taa - tactical asset allocation backtester.
//!
//! # Overview
//!
//! `taa` simulates a momentum-ranked, risk-weighted allocation strategy over a
//! matrix of historical asset returns:
//!
//! - **Momentum ranking**: weighted blend of cumulative returns over several
//!   horizons, with a penalty for re-entering weak assets
//! - **Risk weighting**: equal weight, inverse volatility, inverse variance or
//!   long-only minimum variance (quadratic program)
//! - **Crash protection**: a canary universe scales exposure down and routes
//!   the remainder to a defensive asset or cash
//! - **Simulation and statistics**: compounded equity curve, drawdowns, Calmar
//!   ratio and Ulcer Performance Index
//! - **Configuration files**: TOML-based configuration for reproducible runs
//!
//! # Quick Start
//!
//! ```no_run
//! use taa::{
//!     data::{load_returns_csv, DataConfig},
//!     engine::{AllocationConfig, AllocationEngine, RunMode},
//!     lookback::LookbackWeights,
//!     momentum::MomentumEngine,
//!     risk::RiskEstimator,
//!     weighting::{WeightingEngine, WeightingPolicy},
//! };
//!
//! # fn main() -> taa::Result<()> {
//! let momentum = MomentumEngine::new(
//!     LookbackWeights::new(&[21, 63, 126, 252], &[12.0, 4.0, 2.0, 1.0])?,
//!     0.0,
//! )?;
//! let risk = RiskEstimator::new(
//!     LookbackWeights::single(21)?,
//!     LookbackWeights::new(&[21, 63, 126, 252], &[12.0, 4.0, 2.0, 1.0])?,
//! )?;
//! let config = AllocationConfig::new(momentum, risk)
//!     .with_selection(0.0, 3)
//!     .with_weighting(WeightingEngine::new(WeightingPolicy::MinimumVariance));
//!
//! let returns = load_returns_csv("data/returns.csv", &DataConfig::default())?;
//! let engine = AllocationEngine::new(config)?;
//! let result = engine.run(&returns, None, RunMode::Full)?;
//!
//! if let Some(metrics) = result.metrics {
//!     println!("Annual return: {:.2}%", metrics.annual_return * 100.0);
//!     println!("Max drawdown:  {:.2}%", metrics.max_drawdown * 100.0);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! - [`types`]: Return matrix, weight vectors and weight history
//! - [`schedule`]: Rebalance schedule generation
//! - [`lookback`]: Weighted multi-horizon aggregation and its statistics
//! - [`momentum`]: Momentum scoring
//! - [`selection`]: Rank-and-threshold selection
//! - [`risk`]: Volatility, correlation and covariance estimates
//! - [`weighting`]: Weighting policies, including minimum variance
//! - [`overlay`]: Canary crash protection
//! - [`simulator`]: Return compounding
//! - [`analytics`]: Performance metrics and reporting
//! - [`engine`]: The allocation loop
//! - [`config`]: TOML configuration file support
//! - [`data`]: CSV loading

pub mod analytics;
pub mod config;
pub mod data;
pub mod engine;
pub mod error;
pub mod lookback;
pub mod momentum;
pub mod overlay;
pub mod risk;
pub mod schedule;
pub mod selection;
pub mod simulator;
pub mod types;
pub mod weighting;

pub use analytics::PerformanceMetrics;
pub use config::AllocationFileConfig;
pub use engine::{AllocationConfig, AllocationEngine, AllocationResult, RunMode};
pub use error::{AllocError, ErrorHelp, Result};
pub use schedule::{RebalanceSchedule, RebalanceUnit};
pub use types::{ReturnMatrix, StrategyReturns, WeightHistory, WeightVector};
pub use weighting::{MinVarianceFallback, WeightingPolicy};
