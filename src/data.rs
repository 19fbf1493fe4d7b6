//! Loading return matrices from wide CSV files.
//!
//! The expected layout is one date column followed by one column per asset:
//!
//! ```text
//! date,SPY,EFA,TLT
//! 2024-01-02,0.0012,-0.0031,0.0040
//! ```
//!
//! Files holding prices instead of returns can be loaded with
//! [`DataConfig::prices`] set; simple returns are derived on load.

use crate::error::{AllocError, Result};
use crate::types::ReturnMatrix;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use csv::{ReaderBuilder, StringRecord};
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use tracing::{debug, info, warn};

/// CSV loading options.
#[derive(Debug, Clone, Default)]
pub struct DataConfig {
    /// Date format string for parsing (e.g., "%Y-%m-%d").
    pub date_format: Option<String>,
    /// CSV delimiter character. If None, delimiter is auto-detected.
    pub delimiter: Option<u8>,
    /// Skip rows with missing or unparseable values instead of failing.
    pub skip_invalid: bool,
    /// The file holds prices; convert them to simple returns.
    pub prices: bool,
}

/// Detect the CSV delimiter from the first few lines of the file.
///
/// Picks the delimiter (comma, tab, semicolon, pipe) that splits every line
/// into the same number of fields, preferring the one with the most fields.
fn detect_delimiter(path: &Path) -> Result<u8> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);

    let lines: Vec<String> = reader.lines().take(5).filter_map(|l| l.ok()).collect();
    if lines.is_empty() {
        return Ok(b',');
    }

    let delimiters = [b',', b'\t', b';', b'|'];
    let mut best_delimiter = b',';
    let mut best_score = 0;

    for &delim in &delimiters {
        let counts: Vec<usize> = lines
            .iter()
            .map(|line| line.as_bytes().iter().filter(|&&b| b == delim).count() + 1)
            .collect();

        // A date column plus at least one asset
        let first_count = counts[0];
        if first_count >= 2 && counts.iter().all(|&c| c == first_count) && first_count > best_score
        {
            best_score = first_count;
            best_delimiter = delim;
        }
    }

    debug!(
        "Detected delimiter {:?} with {} fields",
        best_delimiter as char, best_score
    );
    Ok(best_delimiter)
}

/// Parse a date string with multiple format attempts.
pub fn parse_datetime(s: &str, format: Option<&str>) -> Result<DateTime<Utc>> {
    let s = s.trim();
    let midnight = |d: NaiveDate| Utc.from_utc_datetime(&d.and_time(NaiveTime::MIN));

    if let Some(fmt) = format {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(Utc.from_utc_datetime(&dt));
        }
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Ok(midnight(d));
        }
    }

    let datetime_formats = [
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H:%M:%SZ",
        "%Y/%m/%d %H:%M:%S",
    ];
    for fmt in &datetime_formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(Utc.from_utc_datetime(&dt));
        }
    }

    let date_formats = [
        "%Y-%m-%d",
        "%Y/%m/%d",
        "%d-%m-%Y",
        "%m/%d/%Y",
        "%d-%b-%Y",  // 15-Jan-2024
        "%b %d, %Y", // Jan 15, 2024
    ];
    for fmt in &date_formats {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Ok(midnight(d));
        }
    }

    Err(AllocError::DataError(format!(
        "Could not parse date: '{}'",
        s
    )))
}

/// Load a return (or price) matrix from a wide CSV file.
pub fn load_returns_csv(path: impl AsRef<Path>, config: &DataConfig) -> Result<ReturnMatrix> {
    let path = path.as_ref();
    info!("Loading data from: {}", path.display());

    let delimiter = match config.delimiter {
        Some(d) => d,
        None => detect_delimiter(path)?,
    };

    let reader = ReaderBuilder::new()
        .has_headers(true)
        .delimiter(delimiter)
        .trim(csv::Trim::All)
        .from_path(path)?;
    read_matrix(reader, config)
}

/// Parse a return (or price) matrix from CSV text.
pub fn returns_from_str(content: &str, config: &DataConfig) -> Result<ReturnMatrix> {
    let reader = ReaderBuilder::new()
        .has_headers(true)
        .delimiter(config.delimiter.unwrap_or(b','))
        .trim(csv::Trim::All)
        .from_reader(content.as_bytes());
    read_matrix(reader, config)
}

fn read_matrix<R: Read>(mut reader: csv::Reader<R>, config: &DataConfig) -> Result<ReturnMatrix> {
    let headers = reader.headers()?.clone();
    if headers.len() < 2 {
        return Err(AllocError::DataError(
            "CSV needs a date column and at least one asset column".to_string(),
        ));
    }
    let assets: Vec<String> = headers.iter().skip(1).map(|h| h.to_string()).collect();

    let mut rows: Vec<(DateTime<Utc>, Vec<f64>)> = Vec::new();
    let mut skipped = 0;

    for (i, record) in reader.records().enumerate() {
        let line = i + 2;
        let parsed = record
            .map_err(AllocError::from)
            .and_then(|r| parse_record(&r, assets.len(), config.date_format.as_deref()));

        match parsed {
            Ok(row) => rows.push(row),
            Err(e) if config.skip_invalid => {
                debug!("Skipping line {}: {}", line, e);
                skipped += 1;
            }
            Err(e) => {
                return Err(AllocError::DataError(format!("Line {}: {}", line, e)));
            }
        }
    }

    if skipped > 0 {
        warn!("Skipped {} invalid rows", skipped);
    }

    rows.sort_by_key(|(ts, _)| *ts);
    let original_len = rows.len();
    rows.dedup_by_key(|(ts, _)| *ts);
    if rows.len() < original_len {
        warn!("Removed {} duplicate timestamps", original_len - rows.len());
    }

    if rows.is_empty() {
        return Err(AllocError::DataError("No data rows found".to_string()));
    }

    info!(
        "Loaded {} rows x {} assets from {} to {}",
        rows.len(),
        assets.len(),
        rows[0].0.format("%Y-%m-%d"),
        rows[rows.len() - 1].0.format("%Y-%m-%d")
    );

    let (timestamps, values): (Vec<_>, Vec<_>) = rows.into_iter().unzip();
    if config.prices {
        ReturnMatrix::from_prices(assets, timestamps, values)
    } else {
        ReturnMatrix::new(assets, timestamps, values)
    }
}

fn parse_record(
    record: &StringRecord,
    num_assets: usize,
    date_format: Option<&str>,
) -> Result<(DateTime<Utc>, Vec<f64>)> {
    if record.len() != num_assets + 1 {
        return Err(AllocError::DataError(format!(
            "expected {} fields, found {}",
            num_assets + 1,
            record.len()
        )));
    }

    let timestamp = parse_datetime(&record[0], date_format)?;
    let values = record
        .iter()
        .skip(1)
        .map(|field| {
            field
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(|| AllocError::DataError(format!("invalid value '{}'", field)))
        })
        .collect::<Result<Vec<f64>>>()?;

    Ok((timestamp, values))
}
