//! Error types for the allocation engine.

use thiserror::Error;

/// Main error type for the allocation engine.
#[derive(Error, Debug)]
pub enum AllocError {
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("Invalid rebalance schedule: {0}")]
    InvalidSchedule(String),

    #[error("Optimization error: {0}")]
    OptimizationError(String),

    #[error("Data error: {0}")]
    DataError(String),

    #[error("CSV parsing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Date parsing error: {0}")]
    DateParseError(#[from] chrono::ParseError),

    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),
}

/// Remediation hints attached to the domain errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorHelp {
    pub common_causes: Vec<&'static str>,
    pub quick_fixes: Vec<&'static str>,
}

impl AllocError {
    /// Hints for resolving the error, if any are known.
    pub fn help(&self) -> Option<ErrorHelp> {
        match self {
            AllocError::ConfigError(_) => Some(ErrorHelp {
                common_causes: vec![
                    "Lookback and weight lists have different lengths",
                    "Unknown weighting policy name",
                    "Crash asset is not a column of the return matrix",
                ],
                quick_fixes: vec![
                    "Give every lookback exactly one weight",
                    "Use one of: ew, invVol, invVar, minVol",
                    "Run `taa init` to see a complete example configuration",
                ],
            }),
            AllocError::InvalidSchedule(_) => Some(ErrorHelp {
                common_causes: vec![
                    "Return history is shorter than the momentum window",
                    "Longest lookback exceeds the number of rows",
                ],
                quick_fixes: vec![
                    "Load more history or shorten the lookbacks",
                    "Lower `window_periods` or rebalance more often",
                ],
            }),
            AllocError::OptimizationError(_) => Some(ErrorHelp {
                common_causes: vec![
                    "Too few observations relative to the number of selected assets",
                    "A selected asset has zero volatility over the lookback",
                ],
                quick_fixes: vec![
                    "Lengthen the volatility and correlation lookbacks",
                    "Reduce `top_n`",
                    "Set `on_infeasible = \"inverse_volatility\"` to fall back explicitly",
                ],
            }),
            _ => None,
        }
    }

    /// Whether [`AllocError::help`] has hints for this error.
    pub fn has_help(&self) -> bool {
        self.help().is_some()
    }
}

/// Result type alias for allocation operations.
pub type Result<T> = std::result::Result<T, AllocError>;
