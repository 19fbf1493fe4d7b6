//! Rebalance schedule generation.
//!
//! A schedule is a strictly increasing list of 1-based row indices, each
//! marking the last row of a rebalance period. Natural period ends come from
//! the calendar (month, quarter or year boundaries of the row timestamps) and
//! can be shifted by a day offset to study rebalance timing.

use crate::error::{AllocError, Result};
use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Calendar unit that defines a rebalance period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RebalanceUnit {
    #[default]
    Months,
    Quarters,
    Years,
}

impl RebalanceUnit {
    /// Number of periods that make up one year.
    pub fn periods_per_year(&self) -> usize {
        match self {
            RebalanceUnit::Months => 12,
            RebalanceUnit::Quarters => 4,
            RebalanceUnit::Years => 1,
        }
    }

    fn bucket_key(&self, timestamp: DateTime<Utc>) -> (i32, u32) {
        match self {
            RebalanceUnit::Months => (timestamp.year(), timestamp.month()),
            RebalanceUnit::Quarters => (timestamp.year(), (timestamp.month() - 1) / 3),
            RebalanceUnit::Years => (timestamp.year(), 0),
        }
    }
}

impl FromStr for RebalanceUnit {
    type Err = AllocError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "months" | "month" | "monthly" => Ok(RebalanceUnit::Months),
            "quarters" | "quarter" | "quarterly" => Ok(RebalanceUnit::Quarters),
            "years" | "year" | "yearly" | "annual" => Ok(RebalanceUnit::Years),
            other => Err(AllocError::ConfigError(format!(
                "Unknown rebalance unit '{}', expected months, quarters or years",
                other
            ))),
        }
    }
}

impl fmt::Display for RebalanceUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RebalanceUnit::Months => "months",
            RebalanceUnit::Quarters => "quarters",
            RebalanceUnit::Years => "years",
        };
        write!(f, "{}", name)
    }
}

/// 1-based index of the last row in each calendar period.
pub fn natural_period_ends(timestamps: &[DateTime<Utc>], unit: RebalanceUnit) -> Vec<usize> {
    let mut ends = Vec::new();
    for (i, pair) in timestamps.windows(2).enumerate() {
        if unit.bucket_key(pair[0]) != unit.bucket_key(pair[1]) {
            ends.push(i + 1);
        }
    }
    if !timestamps.is_empty() {
        ends.push(timestamps.len());
    }
    ends
}

/// Ordered rebalance points for one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebalanceSchedule {
    indices: Vec<usize>,
    unit: RebalanceUnit,
    offset: i64,
}

impl RebalanceSchedule {
    /// Derive the schedule for a set of row timestamps.
    ///
    /// Natural period ends are shifted by `offset` rows, clamped into
    /// `[1, rows]` and deduplicated. A trailing period of a single row carries
    /// no return to compound, so its end is dropped. At least
    /// `window_periods + 1` indices must remain: the first simulated period
    /// needs a full window of history behind it.
    pub fn generate(
        timestamps: &[DateTime<Utc>],
        unit: RebalanceUnit,
        offset: i64,
        window_periods: usize,
    ) -> Result<Self> {
        if timestamps.is_empty() {
            return Err(AllocError::InvalidSchedule(
                "Cannot build a schedule from an empty return matrix".to_string(),
            ));
        }

        let rows = timestamps.len() as i64;
        let mut indices: Vec<usize> = natural_period_ends(timestamps, unit)
            .into_iter()
            .map(|end| (end as i64 + offset).clamp(1, rows) as usize)
            .collect();
        // Clamping a sorted sequence keeps it sorted, so duplicates are adjacent.
        indices.dedup();

        let n = indices.len();
        if n >= 2 && indices[n - 1] - indices[n - 2] == 1 {
            indices.pop();
        }

        if indices.len() < window_periods + 1 {
            return Err(AllocError::InvalidSchedule(format!(
                "Only {} rebalance points from {} rows of {} data; need at least {}",
                indices.len(),
                rows,
                unit,
                window_periods + 1
            )));
        }

        Ok(Self {
            indices,
            unit,
            offset,
        })
    }

    /// Rebalance row indices (1-based).
    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn unit(&self) -> RebalanceUnit {
        self.unit
    }

    pub fn offset(&self) -> i64 {
        self.offset
    }

    /// Timestamps of the rebalance rows.
    pub fn dates(&self, timestamps: &[DateTime<Utc>]) -> Vec<DateTime<Utc>> {
        self.indices
            .iter()
            .filter_map(|&i| timestamps.get(i - 1).copied())
            .collect()
    }
}
